//! DRPF resource archives.
//!
//! # Reader
//! [`DrpArchive::from_bytes`] takes ownership of the whole file, decrypts it
//! in place (header, then each chunk in order, then the footer) and parses
//! every entry.  Parsing is all-or-nothing: any malformed chunk fails the
//! whole archive.
//!
//! # Writer
//! See [`writer`].  Serialisation recomputes every checksum and size from
//! the entry payloads; an archive that was parsed and not modified writes
//! back byte-identical.

pub mod crypt;
pub mod entry;
pub mod header;
pub mod writer;

use std::fs;
use std::io;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::{debug, trace};

use crate::checksum::crc32;
use crate::codec::{Codec, CodecError};
use crate::keystream::SeedTable;

pub use entry::{ChunkHeader, FileEntry};
pub use header::ArchiveHeader;

use entry::MIN_CHUNK_SIZE;
use header::{
    header_seed, ARCHIVE_MAGIC, CHECKSUM_REGION, CRYPTO_BLOCK_MAGIC, CRYPTO_BLOCK_SIZE,
    CRYPTO_MAGIC_OFFSET, HEADER_SIZE, SEED_OFFSET, SEED_TABLE_OFFSET,
};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive length {0:#x} is not a multiple of 4")]
    Misaligned(usize),
    #[error("Archive is too short ({0:#x} bytes)")]
    TooShort(usize),
    #[error("Invalid archive magic {0:#010x}")]
    InvalidMagic(u32),
    #[error("Invalid crypto block magic {0:#010x}")]
    InvalidCryptoMagic(u32),
    #[error("Invalid crypto block size {0:#x}")]
    InvalidHeaderSize(u32),
    #[error("Header checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("Chunk {index}: invalid file block magic {magic:#010x}")]
    InvalidBlockMagic { index: usize, magic: u32 },
    #[error("Chunk {index}: invalid chunk size {size:#x}")]
    InvalidChunkSize { index: usize, size: u32 },
    #[error("Chunk {index}: {size:#x} bytes at {offset:#x} run past the end of the archive")]
    ChunkOutOfBounds { index: usize, offset: usize, size: usize },
    #[error("Chunk {index}: invalid extents {offset:#x} + {size:#x} > {chunk:#x}")]
    InvalidExtents { index: usize, offset: usize, size: usize, chunk: usize },
    #[error("Chunk {index}: stored entry sizes differ ({compressed:#x} != {decompressed:#x})")]
    InvalidUncompressedExtents { index: usize, compressed: usize, decompressed: usize },
    #[error("Invalid file name {name:?}")]
    InvalidFileName { index: Option<usize>, name: String },
    #[error("Entry {name} does not fit a 32-bit chunk ({len} bytes)")]
    EntryTooLarge { name: String, len: usize },
    #[error("Too many entries: {0}")]
    TooManyEntries(usize),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveError {
    /// True for errors caused by the bytes of the input itself.
    pub fn is_malformed(&self) -> bool {
        !matches!(
            self,
            ArchiveError::Codec(_)
                | ArchiveError::Io(_)
                | ArchiveError::EntryTooLarge { .. }
                | ArchiveError::TooManyEntries(_)
                | ArchiveError::InvalidFileName { index: None, .. }
        )
    }
}

// ── DrpArchive ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DrpArchive {
    encrypted:  bool,
    seed_table: SeedTable,
    entries:    Vec<FileEntry>,
    footer:     Vec<u8>,
}

impl DrpArchive {
    /// Empty archive.  Entries are added with [`push`](Self::push).
    pub fn new(seed_table: SeedTable, encrypted: bool) -> Self {
        Self { encrypted, seed_table, entries: Vec::new(), footer: Vec::new() }
    }

    pub fn open<P: AsRef<Path>>(path: P, codec: &dyn Codec) -> Result<Self, ArchiveError> {
        let data = fs::read(path.as_ref())?;
        debug!(path = %path.as_ref().display(), len = data.len(), "read archive");
        Self::from_bytes(data, codec)
    }

    /// Parse a complete archive.  `data` is decrypted in place and dropped.
    pub fn from_bytes(mut data: Vec<u8>, codec: &dyn Codec) -> Result<Self, ArchiveError> {
        let len = data.len();
        if len % 4 != 0 {
            return Err(ArchiveError::Misaligned(len));
        }
        if len < HEADER_SIZE {
            return Err(ArchiveError::TooShort(len));
        }

        let magic = LittleEndian::read_u32(&data);
        if magic != ARCHIVE_MAGIC {
            return Err(ArchiveError::InvalidMagic(magic));
        }

        let seed_table = SeedTable::from_slice(&data[SEED_TABLE_OFFSET..HEADER_SIZE])
            .ok_or(ArchiveError::TooShort(len))?;
        let seed = LittleEndian::read_u32(&data[SEED_OFFSET..]);
        let encrypted = LittleEndian::read_u32(&data[CRYPTO_MAGIC_OFFSET..]) != CRYPTO_BLOCK_MAGIC;
        if encrypted {
            crypt::crypt_header(&mut data[..HEADER_SIZE], &seed_table, seed);
        }

        let header = ArchiveHeader::read(&data[..HEADER_SIZE])?;
        if header.crypto_magic != CRYPTO_BLOCK_MAGIC {
            return Err(ArchiveError::InvalidCryptoMagic(header.crypto_magic));
        }
        if header.crypto_size != CRYPTO_BLOCK_SIZE {
            return Err(ArchiveError::InvalidHeaderSize(header.crypto_size));
        }
        let computed = crc32(&data[CHECKSUM_REGION]);
        if computed != seed {
            return Err(ArchiveError::ChecksumMismatch { stored: seed, computed });
        }

        let count = header.file_count as usize;
        debug!(count, encrypted, seed = format_args!("{seed:#010x}"), "archive header");

        // The count is untrusted; cap the allocation by what could possibly fit.
        let mut entries = Vec::with_capacity(count.min((len - HEADER_SIZE) / MIN_CHUNK_SIZE));
        let mut offset = HEADER_SIZE;
        for index in 0..count {
            let size = if encrypted {
                crypt::decrypt_chunk(&mut data, offset, index, &seed_table)?
            } else {
                crypt::chunk_size(&data, offset, index)?
            };
            let entry = FileEntry::parse(&data[offset..offset + size], index, codec)?;
            trace!(index, offset, size, name = entry.name(), "chunk");
            entries.push(entry);
            offset += size;
        }

        if encrypted {
            crypt::crypt_footer(&mut data[offset..], &seed_table, seed);
        }
        let footer = data.split_off(offset);

        Ok(Self { encrypted, seed_table, entries, footer })
    }

    pub fn is_encrypted(&self) -> bool { self.encrypted }

    /// Choose whether the next write emits the encrypted form.
    pub fn set_encrypted(&mut self, encrypted: bool) {
        self.encrypted = encrypted;
    }

    pub fn seed_table(&self) -> &SeedTable { &self.seed_table }

    pub fn file_count(&self) -> usize { self.entries.len() }

    pub fn entries(&self) -> &[FileEntry] { &self.entries }

    pub fn entries_mut(&mut self) -> &mut [FileEntry] { &mut self.entries }

    pub fn push(&mut self, entry: FileEntry) {
        self.entries.push(entry);
    }

    /// First entry whose stored name or extraction name equals `name`.
    pub fn entry(&self, name: &str) -> Option<&FileEntry> {
        self.entries.iter().find(|e| e.name() == name || e.full_name() == name)
    }

    pub fn entry_mut(&mut self, name: &str) -> Option<&mut FileEntry> {
        self.entries.iter_mut().find(|e| e.name() == name || e.full_name() == name)
    }

    /// Trailing bytes after the last chunk, decrypted.
    pub fn footer(&self) -> &[u8] { &self.footer }

    pub fn set_footer(&mut self, footer: Vec<u8>) -> Result<(), ArchiveError> {
        if footer.len() % 4 != 0 {
            return Err(ArchiveError::Misaligned(footer.len()));
        }
        self.footer = footer;
        Ok(())
    }

    /// Header seed the next write will emit.
    pub fn header_seed(&self) -> Result<u32, ArchiveError> {
        Ok(header_seed(self.count_u32()?, &self.seed_table))
    }

    pub(crate) fn count_u32(&self) -> Result<u32, ArchiveError> {
        u32::try_from(self.entries.len()).map_err(|_| ArchiveError::TooManyEntries(self.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::extension_id;
    use crate::codec::ZstdCodec;
    use crate::keystream::SEED_TABLE_LEN;

    fn sample(encrypted: bool) -> DrpArchive {
        let mut table = [0u8; SEED_TABLE_LEN];
        for (i, b) in table.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        let mut arc = DrpArchive::new(SeedTable::new(table), encrypted);
        arc.push(FileEntry::new("title", extension_id("lm"), b"layout".to_vec(), false).unwrap());
        arc.push(FileEntry::new("bgm.nus3audio", 0, vec![7u8; 300], true).unwrap());
        arc.set_footer(vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        arc
    }

    #[test]
    fn parse_written_archive() {
        for encrypted in [false, true] {
            let bytes = sample(encrypted).to_bytes(&ZstdCodec).unwrap();
            let arc = DrpArchive::from_bytes(bytes.clone(), &ZstdCodec).unwrap();
            assert_eq!(arc.is_encrypted(), encrypted);
            assert_eq!(arc.file_count(), 2);
            assert_eq!(arc.entry("title.lm").unwrap().data(), b"layout");
            assert_eq!(arc.entry("bgm.nus3audio").unwrap().data(), &[7u8; 300][..]);
            assert_eq!(arc.footer(), &[1, 2, 3, 4, 5, 6, 7, 8]);
            assert_eq!(arc.to_bytes(&ZstdCodec).unwrap(), bytes);
        }
    }

    #[test]
    fn encryption_hides_header_fields() {
        let plain = sample(false).to_bytes(&ZstdCodec).unwrap();
        let enc = sample(true).to_bytes(&ZstdCodec).unwrap();
        assert_eq!(plain.len(), enc.len());
        assert_eq!(plain[..8], enc[..8]);
        assert_ne!(plain[8..0x14], enc[8..0x14]);
        assert_eq!(plain[0x14..HEADER_SIZE], enc[0x14..HEADER_SIZE]);
    }

    #[test]
    fn rejects_malformed_input() {
        let bytes = sample(true).to_bytes(&ZstdCodec).unwrap();

        let mut short = bytes.clone();
        short.pop();
        assert!(matches!(DrpArchive::from_bytes(short, &ZstdCodec), Err(ArchiveError::Misaligned(_))));

        assert!(matches!(
            DrpArchive::from_bytes(bytes[..0x90].to_vec(), &ZstdCodec),
            Err(ArchiveError::TooShort(0x90))
        ));

        let mut bad_magic = bytes.clone();
        bad_magic[0] ^= 1;
        assert!(matches!(DrpArchive::from_bytes(bad_magic, &ZstdCodec), Err(ArchiveError::InvalidMagic(_))));

        // A flipped seed-table byte changes the keystream and the checksum.
        let mut bad_table = bytes.clone();
        bad_table[0x40] ^= 0x01;
        let err = DrpArchive::from_bytes(bad_table, &ZstdCodec).unwrap_err();
        assert!(err.is_malformed(), "{err}");

        let truncated = bytes[..bytes.len() - 16].to_vec();
        let err = DrpArchive::from_bytes(truncated, &ZstdCodec).unwrap_err();
        assert!(err.is_malformed(), "{err}");
    }

    #[test]
    fn crypto_block_fields_are_checked_after_decryption() {
        // Words 0x08 and 0x0C sit outside the checksum region.
        let enc = sample(true).to_bytes(&ZstdCodec).unwrap();

        let mut bad = enc.clone();
        bad[CRYPTO_MAGIC_OFFSET] ^= 1;
        assert!(matches!(
            DrpArchive::from_bytes(bad, &ZstdCodec),
            Err(ArchiveError::InvalidCryptoMagic(m)) if m == CRYPTO_BLOCK_MAGIC ^ 1
        ));

        let mut bad = enc;
        bad[0x0C] ^= 1;
        assert!(matches!(
            DrpArchive::from_bytes(bad, &ZstdCodec),
            Err(ArchiveError::InvalidHeaderSize(0x91))
        ));

        let mut bad = sample(false).to_bytes(&ZstdCodec).unwrap();
        LittleEndian::write_u32(&mut bad[0x0C..], 0x98);
        assert!(matches!(
            DrpArchive::from_bytes(bad, &ZstdCodec),
            Err(ArchiveError::InvalidHeaderSize(0x98))
        ));
    }

    #[test]
    fn corrupt_compressed_body_is_a_codec_error() {
        let mut bytes = sample(false).to_bytes(&ZstdCodec).unwrap();
        let marker = entry::COMPRESSED_DATA_MAGIC.to_le_bytes();
        let at = bytes.windows(4).position(|w| w == marker).unwrap() + 4;
        // Break the zstd frame magic.
        bytes[at] ^= 0xFF;

        let err = DrpArchive::from_bytes(bytes, &ZstdCodec).unwrap_err();
        assert!(matches!(err, ArchiveError::Codec(_)), "{err}");
        assert!(!err.is_malformed());
    }

    #[test]
    fn plaintext_checksum_is_verified() {
        let mut bytes = sample(false).to_bytes(&ZstdCodec).unwrap();
        bytes[0x10] = bytes[0x10].wrapping_add(1);
        assert!(matches!(
            DrpArchive::from_bytes(bytes, &ZstdCodec),
            Err(ArchiveError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn footer_must_be_word_aligned() {
        let mut arc = sample(false);
        assert!(arc.set_footer(vec![0; 3]).is_err());
        assert!(arc.set_footer(Vec::new()).is_ok());
    }
}
