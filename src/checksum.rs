//! CRC-32 / Adler-32 helpers and the extension-identifier table.
//!
//! Every magic constant in the DRPF format is the CRC-32 of a short ASCII
//! tag, and every entry's extension is stored as the CRC-32 of the lowercase
//! extension string.  The variant is the reflected IEEE one (`crc32fast`).
//!
//! CRC-32 doubles as key material: the archive header seed is a two-stage
//! checksum that resumes from a prior value rather than the default state.

use std::borrow::Cow;

use crc32fast::Hasher;

/// CRC-32 of `data` from the default initial state.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// CRC-32 of `data`, continuing from a previously finalised checksum.
///
/// `crc32_resume(b, crc32(a)) == crc32(a ++ b)`.
pub fn crc32_resume(data: &[u8], prior: u32) -> u32 {
    let mut hasher = Hasher::new_with_initial(prior);
    hasher.update(data);
    hasher.finalize()
}

pub fn adler32(data: &[u8]) -> u32 {
    adler::adler32_slice(data)
}

// ── Extension identifiers ────────────────────────────────────────────────────

/// Known `(crc32(extension), extension)` pairs seen inside DRPF archives.
pub static EXTENSIONS: &[(u32, &str)] = &[
    (0x1C375F45, "txt"),
    (0xBE1C9ACB, "msbt"),
    (0xB9715ED2, "msbp"),
    (0xBB922BB1, "lm"),
    (0x5C156DBC, "nutexb"),
    (0x950C38A5, "bnk"),
    (0xCD63FEC8, "lmb"),
    (0x53076B6B, "lme"),
    (0x31C91A2C, "luo"),
    (0xA9B87C9F, "rtd"),
    (0xA76EEEC0, "shb"),
    (0x8C43BD03, "skb"),
    (0x0FB47EED, "achd"),
    (0x89E759E1, "allb"),
    (0xE42AB2FE, "cbsb"),
    (0xE165A47B, "cesb"),
    (0xB20291CC, "cutb"),
    (0x7A390130, "ecbd"),
    (0x9B70EEC4, "facb"),
    (0xF78548DD, "ldtb"),
    (0xBAF0E4F7, "lprb"),
    (0xA3D90E1B, "mdcd"),
    (0x37CD5F6B, "mdfb"),
    (0xEADAF976, "mdrp"),
    (0xE1C38F19, "misd"),
    (0x6971203F, "navb"),
    (0xA459AA15, "nvhb"),
    (0x0B548B0F, "path"),
    (0x58284CA4, "pcnb"),
    (0x01AA8159, "pdcd"),
    (0x6CD5ECCD, "pflb"),
    (0xB894D312, "pfrb"),
    (0x0972120A, "picd"),
    (0xF423150F, "pstb"),
    (0xBE2D954D, "ptsb"),
    (0x753C041E, "silb"),
    (0x97948F6D, "bfotf"),
    (0x87E7C3FC, "bfttf"),
    (0x2E9EDB6D, "efxbn"),
    (0x509961FC, "characterb"),
    (0x623D9D06, "matinstb"),
    (0xDAB89279, "numatb"),
    (0x8E6610FB, "modelb"),
    (0x0032C3E4, "nuanmb"),
    (0x81D2341C, "nuhlpb"),
    (0x236DB83A, "numshb"),
    (0x67E93703, "nusktb"),
    (0x3F86D270, "nusrcmdlb"),
    (0xC3157ABE, "courseb"),
    (0x9C5515DE, "nufxlb"),
    (0x2F6D9B0B, "nushdb"),
    (0x7E309203, "reflectb"),
    (0xE57E2E01, "paramb"),
    (0x2E641827, "stfrolb"),
    (0xE9AB884F, "genderb"),
    (0xF59A44EB, "levelb"),
    (0x62BC395A, "navmshb"),
    // Still unnamed: 0xDC4A8177 (romfs), 0xC63E569C / 0xB519FC35 / 0x9B7A0B7C (savedata).
];

/// Look up a known extension by identifier.
pub fn known_extension(id: u32) -> Option<&'static str> {
    EXTENSIONS.iter().find(|(k, _)| *k == id).map(|(_, ext)| *ext)
}

/// Extension string for `id`, falling back to its 8-digit uppercase hex form.
pub fn extension_name(id: u32) -> Cow<'static, str> {
    match known_extension(id) {
        Some(ext) => Cow::Borrowed(ext),
        None => {
            tracing::debug!("unknown extension crc32 0x{id:08X}");
            Cow::Owned(hex::encode_upper(id.to_be_bytes()))
        }
    }
}

/// Identifier for an extension string (`crc32` of its lowercase ASCII form).
pub fn extension_id(ext: &str) -> u32 {
    crc32(ext.to_ascii_lowercase().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nutexb_fixed_point() {
        assert_eq!(crc32(b"nutexb"), 0x5C156DBC);
    }

    #[test]
    fn every_table_entry_is_its_own_crc() {
        for &(id, ext) in EXTENSIONS {
            assert_eq!(crc32(ext.as_bytes()), id, "extension {ext}");
        }
    }

    #[test]
    fn format_tags() {
        assert_eq!(crc32(b"DRPF"), 0x7F0E5359);
        assert_eq!(crc32(b"fhdr"), 0xC65753E8);
        assert_eq!(crc32(b"resd"), 0xE0A331B4);
        assert_eq!(crc32(b"Oodl"), 0xE42D98BA);
    }

    #[test]
    fn resume_equals_concatenation() {
        let head = crc32(b"abc");
        assert_eq!(crc32_resume(b"def", head), crc32(b"abcdef"));
        assert_eq!(crc32_resume(b"def", head), 0x4B8E39EF);
    }

    #[test]
    fn adler_known_value() {
        assert_eq!(adler32(b"Wikipedia"), 0x11E60398);
        assert_eq!(adler32(b""), 1);
    }

    #[test]
    fn unknown_extension_falls_back_to_hex() {
        assert_eq!(extension_name(0x5C156DBC), "nutexb");
        assert_eq!(extension_name(0x0000ABCD), "0000ABCD");
        assert_eq!(extension_name(0xDC4A8177), "DC4A8177");
        assert_eq!(extension_id("NUTEXB"), 0x5C156DBC);
    }
}
