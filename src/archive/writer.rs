//! DRPF serialisation.
//!
//! Layout is built in plaintext first (header, chunks, footer) and the
//! keystream procedures from [`crypt`](super::crypt) are applied afterwards
//! when the archive is encrypted, so both modes share one layout.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use super::crypt::{crypt_footer, crypt_header, encrypt_chunk};
use super::header::ArchiveHeader;
use super::{ArchiveError, DrpArchive};
use crate::codec::Codec;

impl DrpArchive {
    /// Serialise the archive, recomputing every seed and size.
    pub fn to_bytes(&self, codec: &dyn Codec) -> Result<Vec<u8>, ArchiveError> {
        let header = ArchiveHeader::new(self.count_u32()?, self.seed_table.clone());
        let table = &self.seed_table;

        let mut out = Vec::new();
        header.write(&mut out)?;
        if self.encrypted {
            crypt_header(&mut out, table, header.seed);
        }

        for entry in &self.entries {
            let mut chunk = entry.to_chunk(codec)?;
            if self.encrypted {
                encrypt_chunk(&mut chunk, table);
            }
            out.extend_from_slice(&chunk);
        }

        let footer_start = out.len();
        out.extend_from_slice(&self.footer);
        if self.encrypted {
            crypt_footer(&mut out[footer_start..], table, header.seed);
        }

        debug!(
            files = self.entries.len(),
            len = out.len(),
            seed = format_args!("{:#010x}", header.seed),
            "serialised archive"
        );
        Ok(out)
    }

    pub fn write_to<W: Write>(&self, mut writer: W, codec: &dyn Codec) -> Result<(), ArchiveError> {
        writer.write_all(&self.to_bytes(codec)?)?;
        Ok(())
    }

    /// Serialise to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P, codec: &dyn Codec) -> Result<(), ArchiveError> {
        let bytes = self.to_bytes(codec)?;
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        writer.write_all(&bytes)?;
        writer.flush()?;
        info!(path = %path.as_ref().display(), len = bytes.len(), "wrote archive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::header::{CHECKSUM_REGION, HEADER_SIZE};
    use super::super::FileEntry;
    use super::*;
    use crate::checksum::crc32;
    use crate::codec::Lz4Codec;
    use crate::keystream::{SeedTable, SEED_TABLE_LEN};
    use byteorder::{ByteOrder, LittleEndian};

    #[test]
    fn empty_archive_is_bare_header() {
        let arc = DrpArchive::new(SeedTable::new([0; SEED_TABLE_LEN]), false);
        let bytes = arc.to_bytes(&Lz4Codec).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(LittleEndian::read_u32(&bytes[4..]), crc32(&bytes[CHECKSUM_REGION]));
        assert_eq!(LittleEndian::read_u32(&bytes[0x10..]), 0);
    }

    #[test]
    fn aligned_payload_gets_no_extra_padding() {
        let mut arc = DrpArchive::new(SeedTable::new([9; SEED_TABLE_LEN]), false);
        arc.push(FileEntry::new("abc", 0, vec![0xEE; 8], false).unwrap());
        let bytes = arc.to_bytes(&Lz4Codec).unwrap();
        // header + 0x18 chunk header + 4-byte name field + 8 payload bytes
        assert_eq!(bytes.len(), HEADER_SIZE + 0x18 + 4 + 8);
        assert_eq!(bytes[bytes.len() - 8..], [0xEE; 8]);
    }

    #[test]
    fn save_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.drp");
        let mut arc = DrpArchive::new(SeedTable::new([0x33; SEED_TABLE_LEN]), true);
        arc.push(FileEntry::new("x.bin", 0, b"0123456789".to_vec(), true).unwrap());
        arc.save(&path, &Lz4Codec).unwrap();

        let back = DrpArchive::open(&path, &Lz4Codec).unwrap();
        assert!(back.is_encrypted());
        assert_eq!(back.entries()[0].data(), b"0123456789");
    }
}
