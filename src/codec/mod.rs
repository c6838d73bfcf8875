//! Block compression adapters.
//!
//! The DRPF container treats its compressor as an opaque transform: a
//! compressed chunk stores only the compressed bytes and the decompressed
//! length, so every adapter works on raw blocks with the output size known
//! up front.  Games ship Oodle for this; an Oodle build can be attached
//! through [`plugin`].  `zstd` and `lz4` are built in for repacking and tests.

pub mod plugin;

use thiserror::Error;

/// Default zstd level for repacked entries.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

// ── CodecId ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    Zstd,
    Lz4,
    /// Supplied at runtime through a [`plugin::CodecPlugin`] table.
    External,
}

impl CodecId {
    /// Human-readable name (diagnostics only; never parsed from disk).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::Zstd     => "zstd",
            CodecId::Lz4      => "lz4",
            CodecId::External => "external",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "zstd" => Some(CodecId::Zstd),
            "lz4"  => Some(CodecId::Lz4),
            _      => None,
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Decompressed {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Codec plugin error: {0}")]
    Plugin(String),
    #[error("Codec '{0}' has no built-in implementation")]
    Unavailable(&'static str),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

/// `compress(bytes) -> bytes` / `decompress(bytes, expected_len) -> bytes`.
///
/// A decompression failure is fatal for the entry being read.
pub trait Codec: Send + Sync {
    fn codec_id(&self) -> CodecId;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError>;
}

fn check_len(out: Vec<u8>, expected: usize) -> Result<Vec<u8>, CodecError> {
    if out.len() != expected {
        return Err(CodecError::SizeMismatch { expected, actual: out.len() });
    }
    Ok(out)
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn codec_id(&self) -> CodecId { CodecId::Zstd }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::bulk::compress(data, DEFAULT_ZSTD_LEVEL)
            .map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let out = zstd::bulk::decompress(data, expected_len)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        check_len(out, expected_len)
    }
}

pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn codec_id(&self) -> CodecId { CodecId::Lz4 }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::block::compress(data))
    }
    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let out = lz4_flex::block::decompress(data, expected_len)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        check_len(out, expected_len)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a CodecId to a built-in codec.
pub fn get_codec(id: CodecId) -> Result<Box<dyn Codec>, CodecError> {
    match id {
        CodecId::Zstd     => Ok(Box::new(ZstdCodec)),
        CodecId::Lz4      => Ok(Box::new(Lz4Codec)),
        CodecId::External => Err(CodecError::Unavailable(id.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_codecs_roundtrip_with_known_length() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        for id in [CodecId::Zstd, CodecId::Lz4] {
            let codec = get_codec(id).unwrap();
            let packed = codec.compress(&data).unwrap();
            assert!(packed.len() < data.len(), "{} did not compress", id.name());
            assert_eq!(codec.decompress(&packed, data.len()).unwrap(), data);
        }
    }

    #[test]
    fn wrong_expected_length_is_an_error() {
        let packed = Lz4Codec.compress(b"hello hello hello hello").unwrap();
        assert!(Lz4Codec.decompress(&packed, 3).is_err());
        assert!(ZstdCodec.decompress(b"not zstd", 16).is_err());
    }

    #[test]
    fn names_parse() {
        assert_eq!(CodecId::from_name("ZSTD"), Some(CodecId::Zstd));
        assert_eq!(CodecId::from_name("lz4"), Some(CodecId::Lz4));
        assert_eq!(CodecId::from_name("oodle"), None);
        assert!(get_codec(CodecId::External).is_err());
    }
}
