//! Per-user save vaults.
//!
//! A vault directory holds up to 16 files with fixed, generated names.  Each
//! file is a 0x30-byte header followed by `entry_count` fixed-size entries,
//! all AES-128-CBC under one global key.  IVs are stored masked: every IV
//! byte is XORed with `next_bounded(0xFE) + 1` from a keystream seeded with
//! the slot seed (header) or slot seed plus entry index (entries).
//!
//! ```text
//! header  0x00  32 bytes ciphertext    -> SaveFileHeader
//!         0x20  16 bytes masked IV
//! entry   0x00  16 bytes masked IV     (all-zero first 8 bytes: empty)
//!         0x10  ciphertext             -> 0x20-byte SaveEntry header + data
//! ```

pub mod carve;

use std::fs;
use std::io;
use std::path::Path;
use std::sync::OnceLock;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::checksum::{adler32, crc32};
use crate::keystream::Keystream;

pub use carve::EntryKind;

pub const VAULT_COUNT: usize = 16;
pub const SAVE_HEADER_SIZE: usize = 0x30;
/// Plaintext header and plaintext entry header length.
pub const RECORD_HEADER_SIZE: usize = 0x20;
pub const IV_SIZE: usize = 16;
const AES_BLOCK: usize = 16;

pub const SAVE_KEY: [u8; 16] = [
    0x1F, 0xC5, 0xD5, 0x71, 0xBD, 0xEF, 0xAF, 0x83,
    0xFC, 0x96, 0xEE, 0xFE, 0x70, 0xA1, 0x14, 0xEC,
];

/// Slot `i` uses `SLOT_SEED_BASE + i`.
pub const SLOT_SEED_BASE: u32 = 0xB519_FC35;

const NAME_STATE_LO: u64 = 0x2163_A6B3_8429_BC22;
const NAME_STATE_HI: u64 = 0x9B49_23E9_F5AA_B470;
/// How far `slot_index` walks the name sequence.
const NAME_SCAN_LIMIT: usize = 100;

const IV_MASK_LIMIT: u32 = 0xFE;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("Save slot {0} out of range (0..16)")]
    SlotOutOfRange(usize),
    #[error("Save data too short: need {needed:#x} bytes, have {len:#x}")]
    TooShort { needed: usize, len: usize },
    #[error("Ciphertext length {len:#x} is not a multiple of 16")]
    Misaligned { len: usize },
    #[error("Entry {index} out of range ({count} entries)")]
    EntryOutOfRange { index: usize, count: usize },
    #[error("Invalid entry sizes: encrypted {encrypted:#x}, decrypted {decrypted:#x}")]
    InvalidEntrySize { encrypted: u32, decrypted: u32 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Vault names and slot seeds ───────────────────────────────────────────────

fn name_sequence() -> impl Iterator<Item = String> {
    let mut ks = Keystream::from_state(NAME_STATE_LO, NAME_STATE_HI);
    std::iter::repeat_with(move || {
        let first = ks.next_word();
        let second = ks.next_word();
        format!("{first:08x}{second:08x}")
    })
}

/// The 16 vault file names, in slot order.
pub fn vault_names() -> &'static [String] {
    static NAMES: OnceLock<Vec<String>> = OnceLock::new();
    NAMES.get_or_init(|| name_sequence().take(VAULT_COUNT).collect())
}

/// Position of `file_name` in the generated name sequence.
pub fn slot_index(file_name: &str) -> Option<usize> {
    name_sequence().take(NAME_SCAN_LIMIT).position(|n| n == file_name)
}

/// True when every file in `dir` is one of the vault names.
pub fn is_complete_save_directory(dir: &Path) -> io::Result<bool> {
    let names = vault_names();
    for item in fs::read_dir(dir)? {
        let item = item?;
        if !item.file_type()?.is_file() {
            continue;
        }
        let known = item
            .file_name()
            .to_str()
            .is_some_and(|n| names.iter().any(|v| v == n));
        if !known {
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn slot_seed(slot: usize) -> Result<u32, SaveError> {
    if slot >= VAULT_COUNT {
        return Err(SaveError::SlotOutOfRange(slot));
    }
    Ok(SLOT_SEED_BASE + slot as u32)
}

// ── Cipher ───────────────────────────────────────────────────────────────────

/// Unmask a stored IV.  Masking is an XOR, so this also masks a clear IV.
pub fn derive_iv(stored: &[u8; IV_SIZE], seed: u32) -> [u8; IV_SIZE] {
    let mut ks = Keystream::new(seed);
    let mut iv = [0u8; IV_SIZE];
    for (out, &b) in iv.iter_mut().zip(stored) {
        *out = b ^ (ks.next_bounded(IV_MASK_LIMIT) + 1) as u8;
    }
    iv
}

fn cipher() -> Aes128 {
    Aes128::new(&GenericArray::from(SAVE_KEY))
}

fn cbc_decrypt(buf: &mut [u8], iv: [u8; IV_SIZE]) {
    let cipher = cipher();
    let mut prev = iv;
    for block in buf.chunks_exact_mut(AES_BLOCK) {
        let mut saved = [0u8; AES_BLOCK];
        saved.copy_from_slice(block);
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        for (b, p) in block.iter_mut().zip(prev) {
            *b ^= p;
        }
        prev = saved;
    }
}

fn cbc_encrypt(buf: &mut [u8], iv: [u8; IV_SIZE]) {
    let cipher = cipher();
    let mut prev = iv;
    for block in buf.chunks_exact_mut(AES_BLOCK) {
        for (b, p) in block.iter_mut().zip(prev) {
            *b ^= p;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        prev.copy_from_slice(block);
    }
}

fn stored_iv(bytes: &[u8]) -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&bytes[..IV_SIZE]);
    iv
}

/// Decrypt the 32-byte header region of a raw 0x30-byte save header.
pub fn decrypt_header(raw: &[u8], seed: u32) -> Result<[u8; RECORD_HEADER_SIZE], SaveError> {
    if raw.len() < SAVE_HEADER_SIZE {
        return Err(SaveError::TooShort { needed: SAVE_HEADER_SIZE, len: raw.len() });
    }
    let iv = derive_iv(&stored_iv(&raw[RECORD_HEADER_SIZE..]), seed);
    let mut plain = [0u8; RECORD_HEADER_SIZE];
    plain.copy_from_slice(&raw[..RECORD_HEADER_SIZE]);
    cbc_decrypt(&mut plain, iv);
    Ok(plain)
}

/// Decrypt one raw entry (IV included).  The result starts with the
/// 0x20-byte entry header.
pub fn decrypt_entry(raw: &[u8], seed: u32) -> Result<Vec<u8>, SaveError> {
    let needed = IV_SIZE + RECORD_HEADER_SIZE;
    if raw.len() < needed {
        return Err(SaveError::TooShort { needed, len: raw.len() });
    }
    let body = &raw[IV_SIZE..];
    if body.len() % AES_BLOCK != 0 {
        return Err(SaveError::Misaligned { len: body.len() });
    }
    let iv = derive_iv(&stored_iv(raw), seed);
    let mut plain = body.to_vec();
    cbc_decrypt(&mut plain, iv);
    Ok(plain)
}

/// Inverse of [`decrypt_header`]: encrypt `plain` under `iv` and append the
/// masked IV.
pub fn seal_header(plain: &[u8; RECORD_HEADER_SIZE], seed: u32, iv: [u8; IV_SIZE]) -> [u8; SAVE_HEADER_SIZE] {
    let mut out = [0u8; SAVE_HEADER_SIZE];
    out[..RECORD_HEADER_SIZE].copy_from_slice(plain);
    cbc_encrypt(&mut out[..RECORD_HEADER_SIZE], iv);
    out[RECORD_HEADER_SIZE..].copy_from_slice(&derive_iv(&iv, seed));
    out
}

/// Inverse of [`decrypt_entry`].  `plain` must be a whole number of blocks.
pub fn seal_entry(plain: &[u8], seed: u32, iv: [u8; IV_SIZE]) -> Result<Vec<u8>, SaveError> {
    if plain.len() % AES_BLOCK != 0 {
        return Err(SaveError::Misaligned { len: plain.len() });
    }
    let mut out = derive_iv(&iv, seed).to_vec();
    out.extend_from_slice(plain);
    cbc_encrypt(&mut out[IV_SIZE..], iv);
    Ok(out)
}

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFileHeader {
    pub magic:                u32,
    pub encrypted_entry_size: u32,
    pub decrypted_entry_size: u32,
    pub entry_count:          u32,
    /// Observed as 0x30, the raw header length.
    pub header_size:          u32,
    pub unk14:                u32,
    pub unk18:                u32,
    pub unk1c:                u32,
}

impl SaveFileHeader {
    pub fn parse(plain: &[u8; RECORD_HEADER_SIZE]) -> Self {
        let word = |at: usize| LittleEndian::read_u32(&plain[at..]);
        Self {
            magic:                word(0x00),
            encrypted_entry_size: word(0x04),
            decrypted_entry_size: word(0x08),
            entry_count:          word(0x0C),
            header_size:          word(0x10),
            unk14:                word(0x14),
            unk18:                word(0x18),
            unk1c:                word(0x1C),
        }
    }

    pub fn decrypt(raw: &[u8], slot: usize) -> Result<Self, SaveError> {
        Ok(Self::parse(&decrypt_header(raw, slot_seed(slot)?)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumStatus {
    pub adler: bool,
    pub crc:   bool,
}

impl ChecksumStatus {
    pub fn is_valid(self) -> bool {
        self.adler && self.crc
    }
}

#[derive(Debug, Clone)]
pub struct SaveEntry {
    pub adler:         u32,
    pub crc:           u32,
    pub magic:         u32,
    pub data_size:     u32,
    pub data_size_dup: u32,
    pub unk14:         u32,
    pub unk18:         u32,
    pub unk1c:         u32,
    pub data:          Vec<u8>,
}

impl SaveEntry {
    /// Split a decrypted entry into its header fields and payload.
    pub fn from_decrypted(mut plain: Vec<u8>) -> Result<Self, SaveError> {
        if plain.len() < RECORD_HEADER_SIZE {
            return Err(SaveError::TooShort { needed: RECORD_HEADER_SIZE, len: plain.len() });
        }
        let data = plain.split_off(RECORD_HEADER_SIZE);
        let word = |at: usize| LittleEndian::read_u32(&plain[at..]);
        Ok(Self {
            adler:         word(0x00),
            crc:           word(0x04),
            magic:         word(0x08),
            data_size:     word(0x0C),
            data_size_dup: word(0x10),
            unk14:         word(0x14),
            unk18:         word(0x18),
            unk1c:         word(0x1C),
            data,
        })
    }

    /// Both stored checksums against the payload.  Mismatches are reported,
    /// never enforced.
    pub fn checksum_status(&self) -> ChecksumStatus {
        ChecksumStatus {
            adler: adler32(&self.data) == self.adler,
            crc:   crc32(&self.data) == self.crc,
        }
    }

    pub fn carve(&self) -> (EntryKind, &[u8]) {
        carve::carve(&self.data)
    }
}

// ── SaveFile ─────────────────────────────────────────────────────────────────

/// One vault file held in memory.  Entries are decrypted on demand, so one
/// bad entry does not affect the others.
#[derive(Debug)]
pub struct SaveFile {
    slot:         usize,
    seed:         u32,
    header:       SaveFileHeader,
    plain_header: [u8; RECORD_HEADER_SIZE],
    /// Declared count, capped at the entries the file actually holds.
    entry_count:  usize,
    data:         Vec<u8>,
}

impl SaveFile {
    pub fn open<P: AsRef<Path>>(path: P, slot: usize) -> Result<Self, SaveError> {
        Self::from_bytes(fs::read(path)?, slot)
    }

    pub fn from_bytes(data: Vec<u8>, slot: usize) -> Result<Self, SaveError> {
        let seed = slot_seed(slot)?;
        let plain_header = decrypt_header(&data, seed)?;
        let header = SaveFileHeader::parse(&plain_header);

        let enc = header.encrypted_entry_size;
        let dec = header.decrypted_entry_size;
        let min_enc = (IV_SIZE + RECORD_HEADER_SIZE) as u32;
        if enc < min_enc || (enc as usize - IV_SIZE) % AES_BLOCK != 0 || dec > enc - min_enc {
            return Err(SaveError::InvalidEntrySize { encrypted: enc, decrypted: dec });
        }

        let declared = header.entry_count as usize;
        let present = (data.len() - SAVE_HEADER_SIZE) / enc as usize;
        let entry_count = declared.min(present);
        if entry_count < declared {
            warn!(slot, declared, present, "vault file is shorter than its header declares");
        }

        debug!(
            slot,
            magic = format_args!("{:#010x}", header.magic),
            entries = header.entry_count,
            "save header"
        );
        Ok(Self { slot, seed, header, plain_header, entry_count, data })
    }

    pub fn slot(&self) -> usize { self.slot }
    pub fn header(&self) -> &SaveFileHeader { &self.header }
    /// Entries present in the file; never more than the header declares.
    pub fn entry_count(&self) -> usize { self.entry_count }

    /// Raw bytes of entry `index`, IV included.
    pub fn raw_entry(&self, index: usize) -> Result<&[u8], SaveError> {
        let count = self.entry_count();
        if index >= count {
            return Err(SaveError::EntryOutOfRange { index, count });
        }
        let size = self.header.encrypted_entry_size as usize;
        let start = SAVE_HEADER_SIZE + index * size;
        self.data
            .get(start..start + size)
            .ok_or(SaveError::TooShort { needed: start + size, len: self.data.len() })
    }

    /// Decrypt entry `index`.  `Ok(None)` for an empty entry.  The payload
    /// is cut to the declared decrypted entry size.
    pub fn entry(&self, index: usize) -> Result<Option<SaveEntry>, SaveError> {
        let raw = self.raw_entry(index)?;
        if LittleEndian::read_u64(raw) == 0 {
            return Ok(None);
        }
        let mut entry = SaveEntry::from_decrypted(decrypt_entry(raw, self.seed.wrapping_add(index as u32))?)?;
        entry.data.truncate(self.header.decrypted_entry_size as usize);
        Ok(Some(entry))
    }

    /// Decrypted header followed by every entry's payload at a fixed stride
    /// of `decrypted_entry_size`; empty entries stay zero.  Fails unless the
    /// file holds every declared entry.
    pub fn decrypted_image(&self) -> Result<Vec<u8>, SaveError> {
        let declared = self.header.entry_count as usize;
        if self.entry_count < declared {
            let needed = declared
                .saturating_mul(self.header.encrypted_entry_size as usize)
                .saturating_add(SAVE_HEADER_SIZE);
            return Err(SaveError::TooShort { needed, len: self.data.len() });
        }

        let stride = self.header.decrypted_entry_size as usize;
        let size = self
            .entry_count()
            .checked_mul(stride)
            .and_then(|n| n.checked_add(RECORD_HEADER_SIZE))
            .ok_or(SaveError::InvalidEntrySize {
                encrypted: self.header.encrypted_entry_size,
                decrypted: self.header.decrypted_entry_size,
            })?;

        let mut image = vec![0u8; size];
        image[..RECORD_HEADER_SIZE].copy_from_slice(&self.plain_header);
        for index in 0..self.entry_count() {
            if let Some(entry) = self.entry(index)? {
                let at = RECORD_HEADER_SIZE + index * stride;
                image[at..at + entry.data.len()].copy_from_slice(&entry.data);
            }
        }
        Ok(image)
    }
}
