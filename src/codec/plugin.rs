//! C ABI for an externally linked block compressor.
//!
//! Shipping games compress DRPF chunks with a proprietary library that cannot
//! be bundled.  An embedder that links or loads such a library fills a
//! [`CodecPlugin`] table with thin `extern "C"` shims and hands it to
//! [`PluginCodec`], which exposes it as an ordinary [`Codec`].
//!
//! # Contract
//! - `abi_version` must not exceed [`CODEC_PLUGIN_ABI_VERSION`].
//! - `decompress` receives the exact decompressed length in `*out_len` and
//!   must fill the whole buffer; anything else is a failure.
//! - `compress_bound` must be a pure function of `in_len`.
//! - The host owns every buffer; the plugin never allocates on its behalf.

use super::{Codec, CodecError, CodecId};

/// ABI version of this table layout.
pub const CODEC_PLUGIN_ABI_VERSION: u32 = 1;

/// Return codes from plugin compress/decompress functions.
pub mod rc {
    /// Success: `*out_len` contains the number of bytes written.
    pub const OK:       i32 = 0;
    /// Output buffer too small.
    pub const OVERFLOW: i32 = -1;
    /// Input data is corrupt or truncated.
    pub const CORRUPT:  i32 = -2;
    /// Library-internal error.
    pub const INTERNAL: i32 = -3;
}

/// Function table for an external compressor.  `#[repr(C)]`; new fields go
/// at the end only.
#[repr(C)]
pub struct CodecPlugin {
    pub abi_version: u32,

    /// Compress `in_buf[..in_len]` into `out_buf[..*out_len]`; on `rc::OK`
    /// `*out_len` is the number of bytes written.
    pub compress: Option<unsafe extern "C" fn(
        in_buf:  *const u8, in_len:  u32,
        out_buf: *mut   u8, out_len: *mut u32,
    ) -> i32>,

    /// Decompress `in_buf[..in_len]` into exactly `*out_len` bytes.
    pub decompress: Option<unsafe extern "C" fn(
        in_buf:  *const u8, in_len:  u32,
        out_buf: *mut   u8, out_len: *mut u32,
    ) -> i32>,

    /// Upper bound on compressed size for `in_len` input bytes.
    pub compress_bound: Option<unsafe extern "C" fn(in_len: u32) -> u32>,
}

// Safety: the ABI contract declares all fn pointers reentrant.
unsafe impl Send for CodecPlugin {}
unsafe impl Sync for CodecPlugin {}

/// Safe wrapper around a static [`CodecPlugin`] table.
pub struct PluginCodec {
    desc: &'static CodecPlugin,
}

impl PluginCodec {
    pub fn new(desc: &'static CodecPlugin) -> Result<Self, CodecError> {
        if desc.abi_version > CODEC_PLUGIN_ABI_VERSION {
            return Err(CodecError::Plugin(format!(
                "plugin ABI version {} is newer than host ABI version {}",
                desc.abi_version, CODEC_PLUGIN_ABI_VERSION,
            )));
        }
        if desc.compress.is_none() || desc.decompress.is_none() || desc.compress_bound.is_none() {
            return Err(CodecError::Plugin("plugin table has a null entry".into()));
        }
        Ok(Self { desc })
    }
}

fn to_u32(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::Plugin(format!("buffer of {len} bytes exceeds u32")))
}

impl Codec for PluginCodec {
    fn codec_id(&self) -> CodecId { CodecId::External }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let (Some(f), Some(bound_fn)) = (self.desc.compress, self.desc.compress_bound) else {
            return Err(CodecError::Plugin("plugin missing compress fn".into()));
        };
        let in_len = to_u32(data.len())?;
        // SAFETY: pure function of its argument per the ABI contract.
        let cap = unsafe { bound_fn(in_len) };
        let mut out = vec![0u8; cap as usize];
        let mut out_len = cap;
        // SAFETY: both buffers are valid for the lengths passed and do not overlap.
        let code = unsafe { f(data.as_ptr(), in_len, out.as_mut_ptr(), &mut out_len) };
        if code != rc::OK {
            return Err(CodecError::Compression(format!("plugin compress returned {code}")));
        }
        if out_len > cap {
            return Err(CodecError::Plugin(format!("plugin wrote {out_len} bytes into {cap}")));
        }
        out.truncate(out_len as usize);
        Ok(out)
    }

    fn decompress(&self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
        let Some(f) = self.desc.decompress else {
            return Err(CodecError::Plugin("plugin missing decompress fn".into()));
        };
        let in_len = to_u32(data.len())?;
        let mut out = vec![0u8; expected_len];
        let mut out_len = to_u32(expected_len)?;
        // SAFETY: both buffers are valid for the lengths passed and do not overlap.
        let code = unsafe { f(data.as_ptr(), in_len, out.as_mut_ptr(), &mut out_len) };
        if code != rc::OK {
            return Err(CodecError::Decompression(format!("plugin decompress returned {code}")));
        }
        if out_len as usize != expected_len {
            return Err(CodecError::SizeMismatch { expected: expected_len, actual: out_len as usize });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::slice;

    // lz4 behind the C ABI, standing in for a dynamically linked library.
    unsafe extern "C" fn lz4_compress(i: *const u8, il: u32, o: *mut u8, ol: *mut u32) -> i32 {
        let input = slice::from_raw_parts(i, il as usize);
        let out = slice::from_raw_parts_mut(o, *ol as usize);
        match lz4_flex::block::compress_into(input, out) {
            Ok(n) => { *ol = n as u32; rc::OK }
            Err(_) => rc::OVERFLOW,
        }
    }

    unsafe extern "C" fn lz4_decompress(i: *const u8, il: u32, o: *mut u8, ol: *mut u32) -> i32 {
        let input = slice::from_raw_parts(i, il as usize);
        let out = slice::from_raw_parts_mut(o, *ol as usize);
        match lz4_flex::block::decompress_into(input, out) {
            Ok(n) => { *ol = n as u32; rc::OK }
            Err(_) => rc::CORRUPT,
        }
    }

    unsafe extern "C" fn lz4_bound(n: u32) -> u32 {
        lz4_flex::block::get_maximum_output_size(n as usize) as u32
    }

    static LZ4_PLUGIN: CodecPlugin = CodecPlugin {
        abi_version: CODEC_PLUGIN_ABI_VERSION,
        compress: Some(lz4_compress),
        decompress: Some(lz4_decompress),
        compress_bound: Some(lz4_bound),
    };

    static FUTURE_PLUGIN: CodecPlugin = CodecPlugin {
        abi_version: CODEC_PLUGIN_ABI_VERSION + 1,
        compress: None,
        decompress: None,
        compress_bound: None,
    };

    #[test]
    fn plugin_roundtrip() {
        let codec = PluginCodec::new(&LZ4_PLUGIN).unwrap();
        let data = b"plugin plugin plugin plugin plugin plugin".repeat(8);
        let packed = codec.compress(&data).unwrap();
        assert_eq!(codec.decompress(&packed, data.len()).unwrap(), data);
        assert_eq!(codec.codec_id(), CodecId::External);
    }

    #[test]
    fn plugin_failure_surfaces_as_error() {
        let codec = PluginCodec::new(&LZ4_PLUGIN).unwrap();
        assert!(codec.decompress(&[0xFF; 4], 64).is_err());
    }

    #[test]
    fn newer_abi_rejected() {
        assert!(PluginCodec::new(&FUTURE_PLUGIN).is_err());
    }
}
