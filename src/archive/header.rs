//! Fixed 0x94-byte DRPF header.
//!
//! ```text
//! 0x00  u32  magic            crc32("DRPF"), never encrypted
//! 0x04  u32  seed             crc32 over 0x10..0x94; keys header and footer
//! 0x08  u32  crypto magic     crc32("fhdr") once decrypted
//! 0x0C  u32  crypto size      always 0x90
//! 0x10  u32  file count
//! 0x14  [u8; 0x80] seed table, never encrypted
//! ```

use std::io::{self, Read, Write};
use std::ops::Range;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::checksum::{crc32, crc32_resume};
use crate::keystream::{SeedTable, SEED_TABLE_LEN};

/// crc32("DRPF")
pub const ARCHIVE_MAGIC: u32 = 0x7F0E5359;
/// crc32("fhdr")
pub const CRYPTO_BLOCK_MAGIC: u32 = 0xC65753E8;
pub const CRYPTO_BLOCK_SIZE: u32 = 0x90;

pub const HEADER_SIZE: usize = 0x94;
pub const SEED_OFFSET: usize = 0x04;
pub const CRYPTO_MAGIC_OFFSET: usize = 0x08;
pub const SEED_TABLE_OFFSET: usize = 0x14;
/// Words XORed with the header keystream: crypto magic, crypto size, file count.
pub const ENCRYPTED_FIELDS: Range<usize> = 0x08..0x14;
/// Region covered by the header checksum: file count and seed table.
pub const CHECKSUM_REGION: Range<usize> = 0x10..HEADER_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub magic:        u32,
    pub seed:         u32,
    pub crypto_magic: u32,
    pub crypto_size:  u32,
    pub file_count:   u32,
    pub seed_table:   SeedTable,
}

impl ArchiveHeader {
    /// Plaintext header for `file_count` entries with a freshly derived seed.
    pub fn new(file_count: u32, seed_table: SeedTable) -> Self {
        Self {
            magic:        ARCHIVE_MAGIC,
            seed:         header_seed(file_count, &seed_table),
            crypto_magic: CRYPTO_BLOCK_MAGIC,
            crypto_size:  CRYPTO_BLOCK_SIZE,
            file_count,
            seed_table,
        }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.seed)?;
        writer.write_u32::<LittleEndian>(self.crypto_magic)?;
        writer.write_u32::<LittleEndian>(self.crypto_size)?;
        writer.write_u32::<LittleEndian>(self.file_count)?;
        writer.write_all(self.seed_table.as_bytes())?;
        Ok(())
    }

    /// Read the raw fields.  No validation; see `DrpArchive::from_bytes`.
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let magic        = reader.read_u32::<LittleEndian>()?;
        let seed         = reader.read_u32::<LittleEndian>()?;
        let crypto_magic = reader.read_u32::<LittleEndian>()?;
        let crypto_size  = reader.read_u32::<LittleEndian>()?;
        let file_count   = reader.read_u32::<LittleEndian>()?;
        let mut table = [0u8; SEED_TABLE_LEN];
        reader.read_exact(&mut table)?;
        Ok(Self {
            magic,
            seed,
            crypto_magic,
            crypto_size,
            file_count,
            seed_table: SeedTable::new(table),
        })
    }
}

/// Two-stage header seed: crc32 of the LE file count, resumed over the table.
pub fn header_seed(file_count: u32, seed_table: &SeedTable) -> u32 {
    let stage1 = crc32(&file_count.to_le_bytes());
    crc32_resume(seed_table.as_bytes(), stage1)
}
