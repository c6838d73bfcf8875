//! One file chunk inside a DRPF archive.
//!
//! ```text
//! 0x00  u32  seed               crc32 of the decompressed payload; chunk key
//! 0x04  u32  magic              crc32("resd")
//! 0x08  u32  size total         whole chunk, multiple of 4
//! 0x0C  u32  extension          crc32 of the lowercase extension
//! 0x10  u32  compressed size    stored bytes, including the "Oodl" marker
//! 0x14  u32  decompressed size
//! 0x18  name, NUL terminated, zero padded to the next 4-byte boundary
//!       [u32 "Oodl" marker] stored bytes, zero padded to 4
//! ```

use std::io::{self, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use super::ArchiveError;
use crate::checksum::{crc32, extension_name};
use crate::codec::Codec;

/// crc32("resd")
pub const FILE_BLOCK_MAGIC: u32 = 0xE0A331B4;
/// crc32("Oodl")
pub const COMPRESSED_DATA_MAGIC: u32 = 0xE42D98BA;
static COMPRESSED_MARKER: [u8; 4] = COMPRESSED_DATA_MAGIC.to_le_bytes();

pub const CHUNK_HEADER_SIZE: usize = 0x18;
/// Header plus the shortest possible name field.
pub const MIN_CHUNK_SIZE: usize = CHUNK_HEADER_SIZE + 4;

#[inline]
pub(crate) fn align4(n: usize) -> usize {
    (n + 3) & !3
}

// ── ChunkHeader ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub seed:              u32,
    pub magic:             u32,
    pub size_total:        u32,
    pub extension:         u32,
    pub compressed_size:   u32,
    pub decompressed_size: u32,
}

impl ChunkHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.seed)?;
        writer.write_u32::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.size_total)?;
        writer.write_u32::<LittleEndian>(self.extension)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.decompressed_size)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            seed:              reader.read_u32::<LittleEndian>()?,
            magic:             reader.read_u32::<LittleEndian>()?,
            size_total:        reader.read_u32::<LittleEndian>()?,
            extension:         reader.read_u32::<LittleEndian>()?,
            compressed_size:   reader.read_u32::<LittleEndian>()?,
            decompressed_size: reader.read_u32::<LittleEndian>()?,
        })
    }
}

// ── FileEntry ────────────────────────────────────────────────────────────────

/// A parsed entry.  The payload is held decrypted and decompressed and is
/// the only part a caller may change; every size field is recomputed from
/// it on write.
#[derive(Debug, Clone)]
pub struct FileEntry {
    header:     ChunkHeader,
    name:       String,
    data:       Vec<u8>,
    compressed: bool,
    /// Compressed bytes as read, reused on write until the payload changes.
    packed:     Option<Vec<u8>>,
}

impl FileEntry {
    /// Build a new entry.  `name` must be non-empty printable ASCII without
    /// path separators.
    pub fn new(name: &str, extension: u32, data: Vec<u8>, compressed: bool) -> Result<Self, ArchiveError> {
        let valid = !name.is_empty()
            && name.bytes().all(|b| b.is_ascii_graphic() || b == b' ')
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(ArchiveError::InvalidFileName { index: None, name: name.to_owned() });
        }
        let len = data.len() as u32;
        Ok(Self {
            header: ChunkHeader {
                seed:              crc32(&data),
                magic:             FILE_BLOCK_MAGIC,
                size_total:        0,
                extension,
                compressed_size:   len,
                decompressed_size: len,
            },
            name: name.to_owned(),
            data,
            compressed,
            packed: None,
        })
    }

    /// Header as last read from disk (sizes are stale after [`set_data`](Self::set_data)).
    pub fn header(&self) -> &ChunkHeader { &self.header }
    pub fn name(&self) -> &str { &self.name }
    pub fn extension(&self) -> u32 { self.header.extension }
    pub fn data(&self) -> &[u8] { &self.data }
    pub fn is_compressed(&self) -> bool { self.compressed }

    /// Swap in a new payload and return the old one.  Stored compressed
    /// bytes survive only when the payload is unchanged.
    pub fn set_data(&mut self, data: Vec<u8>) -> Vec<u8> {
        if data != self.data {
            self.packed = None;
        }
        std::mem::replace(&mut self.data, data)
    }

    /// Chunk seed the writer will emit for the current payload.
    pub fn checksum(&self) -> u32 {
        crc32(&self.data)
    }

    /// File name used on extraction: the stored name when it already carries
    /// an extension, otherwise the stored name plus `.{ext}`.
    pub fn full_name(&self) -> String {
        let ext = format!(".{}", extension_name(self.header.extension));
        if self.name.ends_with(&ext) || self.name.contains('.') {
            self.name.clone()
        } else {
            format!("{}{ext}", self.name)
        }
    }

    /// Interpret one decrypted chunk.  `chunk` is exactly `size_total` bytes.
    pub(crate) fn parse(chunk: &[u8], index: usize, codec: &dyn Codec) -> Result<Self, ArchiveError> {
        let header = ChunkHeader::read(chunk)?;
        if header.magic != FILE_BLOCK_MAGIC {
            return Err(ArchiveError::InvalidBlockMagic { index, magic: header.magic });
        }

        let name_field = &chunk[CHUNK_HEADER_SIZE..];
        let name_len = name_field
            .iter()
            .position(|&b| b == 0)
            .ok_or(ArchiveError::InvalidFileName { index: Some(index), name: String::new() })?;
        let name = std::str::from_utf8(&name_field[..name_len])
            .ok()
            .filter(|s| s.is_ascii())
            .ok_or_else(|| ArchiveError::InvalidFileName {
                index: Some(index),
                name:  String::from_utf8_lossy(&name_field[..name_len]).into_owned(),
            })?
            .to_owned();

        let data_offset = (CHUNK_HEADER_SIZE + name_len + 4) & !3;
        let compressed_size = header.compressed_size as usize;
        let decompressed_size = header.decompressed_size as usize;
        if align4(data_offset + compressed_size) > chunk.len() {
            return Err(ArchiveError::InvalidExtents {
                index,
                offset: data_offset,
                size:   compressed_size,
                chunk:  chunk.len(),
            });
        }

        let stored = &chunk[data_offset..data_offset + compressed_size];
        let compressed = stored.len() >= 4 && LittleEndian::read_u32(stored) == COMPRESSED_DATA_MAGIC;
        let mut packed = None;
        let data = if compressed {
            let body = &stored[4..];
            let data = codec.decompress(body, decompressed_size)?;
            packed = Some(body.to_vec());
            data
        } else {
            if compressed_size != decompressed_size {
                return Err(ArchiveError::InvalidUncompressedExtents {
                    index,
                    compressed:   compressed_size,
                    decompressed: decompressed_size,
                });
            }
            stored.to_vec()
        };

        Ok(Self { header, name, data, compressed, packed })
    }

    /// Serialise this entry as a plaintext chunk, recomputing seed and sizes
    /// from the current payload.
    pub(crate) fn to_chunk(&self, codec: &dyn Codec) -> Result<Vec<u8>, ArchiveError> {
        let fresh;
        let (marker, stored): (&[u8], &[u8]) = if self.compressed {
            let body = match &self.packed {
                Some(body) => body.as_slice(),
                None => {
                    fresh = codec.compress(&self.data)?;
                    fresh.as_slice()
                }
            };
            (&COMPRESSED_MARKER[..], body)
        } else {
            (&[][..], self.data.as_slice())
        };

        let stored_len = marker.len() + stored.len();
        let name_size = (self.name.len() | 3) + 1;
        let name_end = CHUNK_HEADER_SIZE + name_size;
        let size_total = name_end + align4(stored_len);

        let too_large = || ArchiveError::EntryTooLarge { name: self.name.clone(), len: size_total };
        let header = ChunkHeader {
            seed:              self.checksum(),
            magic:             self.header.magic,
            size_total:        u32::try_from(size_total).map_err(|_| too_large())?,
            extension:         self.header.extension,
            compressed_size:   u32::try_from(stored_len).map_err(|_| too_large())?,
            decompressed_size: u32::try_from(self.data.len()).map_err(|_| too_large())?,
        };

        let mut chunk = Vec::with_capacity(size_total);
        header.write(&mut chunk)?;
        chunk.extend_from_slice(self.name.as_bytes());
        chunk.resize(name_end, 0);
        chunk.extend_from_slice(marker);
        chunk.extend_from_slice(stored);
        chunk.resize(size_total, 0);
        Ok(chunk)
    }
}
