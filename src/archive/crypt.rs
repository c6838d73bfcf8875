//! In-place keystream procedures for each DRPF block type.
//!
//! Every procedure XORs whole little-endian words with a fresh [`Keystream`]
//! and is its own inverse, except that decryption must read a chunk's size
//! before it knows how far to go.  Word order:
//!
//! | block  | key                  | words                              |
//! |--------|----------------------|------------------------------------|
//! | header | header seed (0x04)   | 0x08, 0x0C, 0x10                   |
//! | chunk  | chunk word 0         | 1, 2, then 3 .. size/4             |
//! | footer | header seed (0x04)   | every word after the last chunk    |

use byteorder::{ByteOrder, LittleEndian};

use super::entry::{FILE_BLOCK_MAGIC, MIN_CHUNK_SIZE};
use super::header::ENCRYPTED_FIELDS;
use super::ArchiveError;
use crate::keystream::SeedTable;

/// XOR the crypto magic, crypto size and file count words of a full header.
pub fn crypt_header(header: &mut [u8], table: &SeedTable, seed: u32) {
    table.keystream(seed).crypt_words(&mut header[ENCRYPTED_FIELDS]);
}

/// XOR every word of the footer region.
pub fn crypt_footer(footer: &mut [u8], table: &SeedTable, seed: u32) {
    table.keystream(seed).crypt_words(footer);
}

/// Encrypt a plaintext chunk produced by the writer.  Word 0 (the seed)
/// stays in the clear.
pub fn encrypt_chunk(chunk: &mut [u8], table: &SeedTable) {
    let seed = LittleEndian::read_u32(chunk);
    table.keystream(seed).crypt_words(&mut chunk[4..]);
}

/// Decrypt the chunk starting at `offset` in place and return its size.
pub fn decrypt_chunk(
    buf: &mut [u8],
    offset: usize,
    index: usize,
    table: &SeedTable,
) -> Result<usize, ArchiveError> {
    let remaining = buf.len().saturating_sub(offset);
    if remaining < MIN_CHUNK_SIZE {
        return Err(ArchiveError::ChunkOutOfBounds { index, offset, size: remaining });
    }

    let chunk = &mut buf[offset..];
    let mut ks = table.keystream(LittleEndian::read_u32(chunk));
    ks.crypt_words(&mut chunk[4..12]);

    let size = chunk_size(buf, offset, index)?;
    ks.crypt_words(&mut buf[offset + 12..offset + size]);
    Ok(size)
}

/// Validate the (plaintext) magic and size of the chunk at `offset`.
pub fn chunk_size(buf: &[u8], offset: usize, index: usize) -> Result<usize, ArchiveError> {
    let remaining = buf.len().saturating_sub(offset);
    if remaining < MIN_CHUNK_SIZE {
        return Err(ArchiveError::ChunkOutOfBounds { index, offset, size: remaining });
    }

    let magic = LittleEndian::read_u32(&buf[offset + 4..]);
    if magic != FILE_BLOCK_MAGIC {
        return Err(ArchiveError::InvalidBlockMagic { index, magic });
    }

    let size = LittleEndian::read_u32(&buf[offset + 8..]);
    if size % 4 != 0 || (size as usize) < MIN_CHUNK_SIZE {
        return Err(ArchiveError::InvalidChunkSize { index, size });
    }
    if size as usize > remaining {
        return Err(ArchiveError::ChunkOutOfBounds { index, offset, size: size as usize });
    }
    Ok(size as usize)
}
