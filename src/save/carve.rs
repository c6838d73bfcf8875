//! Photo carving from decrypted save entries.
//!
//! Album entries start with 0x10 bytes of metadata followed by a JFIF
//! image and trailing slack.  Anything else is kept as an opaque blob.

use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

const JPEG_OFFSET: usize = 0x10;
/// FF D8 read as a little-endian u16.
const JPEG_SOI: u16 = 0xD8FF;
/// "JFIF" read as a little-endian u32.
const JFIF_TAG: u32 = 0x4649_464A;
const JFIF_TAG_OFFSET: usize = 0x16;
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Jpeg,
    Binary,
}

impl EntryKind {
    pub fn extension(self) -> &'static str {
        match self {
            EntryKind::Jpeg   => "jpg",
            EntryKind::Binary => "bin",
        }
    }
}

/// True when `data` carries a JFIF image at offset 0x10.
pub fn is_jpeg(data: &[u8]) -> bool {
    data.len() > 0x20
        && LittleEndian::read_u16(&data[JPEG_OFFSET..]) == JPEG_SOI
        && LittleEndian::read_u32(&data[JFIF_TAG_OFFSET..]) == JFIF_TAG
}

/// The image bytes from the start-of-image marker through the last
/// end-of-image marker, or `None` when there is no end marker.
pub fn carve_jpeg(data: &[u8]) -> Option<&[u8]> {
    let image = &data[JPEG_OFFSET..];
    let end = image.windows(2).rposition(|w| w == JPEG_EOI)?;
    Some(&image[..end + 2])
}

/// Classify an entry and return the bytes worth writing out.  An image
/// without an end marker is kept whole as a blob.
pub fn carve(data: &[u8]) -> (EntryKind, &[u8]) {
    if !is_jpeg(data) {
        return (EntryKind::Binary, data);
    }
    match carve_jpeg(data) {
        Some(image) => (EntryKind::Jpeg, image),
        None => {
            warn!(len = data.len(), "JFIF entry has no end-of-image marker; keeping raw bytes");
            (EntryKind::Binary, data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(tail: &[u8]) -> Vec<u8> {
        let mut data = vec![0xAB; JPEG_OFFSET];
        data.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]);
        data.extend_from_slice(b"JFIF\0");
        data.extend_from_slice(&[0x11; 24]);
        data.extend_from_slice(tail);
        data
    }

    #[test]
    fn carves_through_last_eoi() {
        // An embedded thumbnail ends first; the outer image ends last.
        let data = photo(&[0xFF, 0xD9, 0x22, 0xFF, 0xD9, 0, 0, 0, 0]);
        assert!(is_jpeg(&data));
        let (kind, image) = carve(&data);
        assert_eq!(kind, EntryKind::Jpeg);
        assert_eq!(&image[..2], &[0xFF, 0xD8]);
        assert_eq!(&image[image.len() - 2..], &JPEG_EOI);
        assert_eq!(image.len(), data.len() - JPEG_OFFSET - 4);
    }

    #[test]
    fn non_images_stay_whole() {
        let data = vec![0u8; 0x40];
        assert_eq!(carve(&data), (EntryKind::Binary, &data[..]));

        // Exactly 0x20 bytes is too short to qualify.
        let short = photo(&[])[..0x20].to_vec();
        assert!(!is_jpeg(&short));
    }

    #[test]
    fn missing_eoi_falls_back_to_blob() {
        let data = photo(&[0x00; 8]);
        assert!(is_jpeg(&data));
        assert_eq!(carve_jpeg(&data), None);
        assert_eq!(carve(&data).0, EntryKind::Binary);
    }
}
