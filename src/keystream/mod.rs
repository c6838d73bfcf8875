//! 128-bit xorshift keystream used by both container formats.
//!
//! Seeding:  32-bit seed expanded by four LCG steps, or a raw 64+64-bit state.
//! Keystream word:  `next_bounded(0xFFFF_FFFF)`, XORed over one LE `u32`.
//!
//! Call order and call count are part of the wire format.  Every block
//! (archive header, each chunk, footer, each save IV) owns a fresh
//! [`Keystream`]; nothing is shared between blocks.

use std::fmt;

/// Byte length of the seed table embedded in the DRPF header.
pub const SEED_TABLE_LEN: usize = 0x80;

/// Limit that turns `next_bounded` into a full 32-bit keystream word.
pub const WORD_LIMIT: u32 = u32::MAX;

const LCG_MUL: u32 = 0x41C6_4E6D;
const LCG_ADD: u32 = 12345;

// ── Keystream ────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct Keystream {
    x: u32,
    y: u32,
    z: u32,
    w: u32,
}

impl fmt::Debug for Keystream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keystream({:08x} {:08x} {:08x} {:08x})", self.x, self.y, self.z, self.w)
    }
}

impl Keystream {
    /// Expand a 32-bit seed into the 128-bit state.
    pub fn new(seed: u32) -> Self {
        let w = LCG_MUL.wrapping_mul(seed).wrapping_add(LCG_ADD);
        let z = LCG_MUL.wrapping_mul(w).wrapping_add(LCG_ADD);
        let y = LCG_MUL.wrapping_mul(z).wrapping_add(LCG_ADD);
        let x = LCG_MUL.wrapping_mul(y).wrapping_add(LCG_ADD);
        Self { x, y, z, w }
    }

    /// Inject the state directly: `lo` fills `w`/`z`, `hi` fills `y`/`x`.
    pub fn from_state(lo: u64, hi: u64) -> Self {
        Self {
            w: lo as u32,
            z: (lo >> 32) as u32,
            y: hi as u32,
            x: (hi >> 32) as u32,
        }
    }

    /// Advance once and return a 31-bit value.
    #[inline]
    pub fn next(&mut self) -> u32 {
        let t = self.x ^ (self.x << 11);
        self.x = self.y;
        self.y = self.z;
        self.z = self.w;
        self.w = self.w ^ sar(self.w, 19) ^ (t ^ sar(t, 8));
        self.w & 0x7FFF_FFFF
    }

    /// Draw a value in `0..=limit` exactly the way the game engine does.
    pub fn next_bounded(&mut self, limit: u32) -> u32 {
        match limit {
            0 => 0,
            0x7FFF_FFFF => self.next(),
            0x8000_0000..=u32::MAX => self.next_wide(limit),
            _ => self.next_within(limit),
        }
    }

    fn next_within(&mut self, limit: u32) -> u32 {
        debug_assert!(limit < 0x7FFF_FFFF);
        let divisor = 0x8000_0000 / (limit + 1);
        loop {
            let result = self.next() / divisor;
            if result <= limit {
                return result;
            }
        }
    }

    /// Limits at or above 2^31 compose two draws; a rejected attempt throws
    /// away all partial state and starts over.
    fn next_wide(&mut self, limit: u32) -> u32 {
        debug_assert!(limit > 0x7FFF_FFFF);
        let maximum = limit.wrapping_add(1);
        let passes = if limit == u32::MAX { 2 } else { 1 };
        let mut result = 0u32;
        let mut carry = 1u32;
        loop {
            result = result.wrapping_add(self.next().wrapping_mul(carry));

            // 0x8000_0000 and 0x8000_0001 terminate here on the first or second round.
            if 0x7FFF_FFFFu32.wrapping_mul(carry) == maximum.wrapping_sub(carry) {
                return result;
            }

            carry <<= 31;
            if carry <= passes {
                continue;
            }

            let high = self.next_bounded(limit / carry);
            if high <= u32::MAX / carry {
                let combined = result.wrapping_add(high.wrapping_mul(carry));
                if combined >= result && combined <= limit {
                    return combined;
                }
            }

            result = 0;
            carry = 1;
        }
    }

    /// One full 32-bit keystream word.
    #[inline]
    pub fn next_word(&mut self) -> u32 {
        self.next_bounded(WORD_LIMIT)
    }

    /// XOR the little-endian word at the start of `buf` with the next keystream
    /// word.  Self-inverse: the same call encrypts and decrypts.
    #[inline]
    pub fn crypt_word(&mut self, buf: &mut [u8]) {
        let key = self.next_word().to_le_bytes();
        for (b, k) in buf[..4].iter_mut().zip(key) {
            *b ^= k;
        }
    }

    /// [`crypt_word`](Self::crypt_word) over every whole word of `buf`, in order.
    pub fn crypt_words(&mut self, buf: &mut [u8]) {
        for word in buf.chunks_exact_mut(4) {
            self.crypt_word(word);
        }
    }
}

#[inline]
fn sar(v: u32, n: u32) -> u32 {
    ((v as i32) >> n) as u32
}

// ── Seed table ───────────────────────────────────────────────────────────────

/// The 128-byte remapping table stored unencrypted in every DRPF header.
#[derive(Clone, PartialEq, Eq)]
pub struct SeedTable([u8; SEED_TABLE_LEN]);

impl fmt::Debug for SeedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeedTable({}..)", hex::encode(&self.0[..8]))
    }
}

impl SeedTable {
    pub fn new(bytes: [u8; SEED_TABLE_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a table out of a slice.  Returns `None` unless exactly 128 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; SEED_TABLE_LEN] {
        &self.0
    }

    /// Fresh keystream for one block keyed by `raw_seed`.
    pub fn keystream(&self, raw_seed: u32) -> Keystream {
        Keystream::new(effective_seed(raw_seed, self))
    }
}

/// Remap `raw_seed` through `table`: each seed byte (low 7 bits) indexes the
/// table and the gathered byte lands in the same byte position.
pub fn effective_seed(raw_seed: u32, table: &SeedTable) -> u32 {
    raw_seed
        .to_le_bytes()
        .iter()
        .enumerate()
        .fold(0u32, |key, (i, &b)| {
            key | (u32::from(table.0[usize::from(b & 0x7F)]) << (i * 8))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn high_table() -> SeedTable {
        let mut t = [0u8; SEED_TABLE_LEN];
        for (i, b) in t.iter_mut().enumerate() {
            *b = 0x80 + i as u8;
        }
        SeedTable::new(t)
    }

    #[test]
    fn lcg_expansion_vectors() {
        let mut ks = Keystream::new(0);
        assert_eq!(
            [ks.next(), ks.next(), ks.next(), ks.next()],
            [0x017AC869, 0x78C62D46, 0x4B9AABC6, 0x4A1ADB74]
        );

        let mut ks = Keystream::new(0x12345678);
        assert_eq!([ks.next(), ks.next(), ks.next()], [0x31CE5759, 0x0B43CB05, 0x59BB6DD6]);
    }

    #[test]
    fn bounded_vectors() {
        let cases: &[(u32, [u32; 4])] = &[
            (0x0000_0000, [0, 0, 0, 0]),
            (0x0000_0001, [1, 0, 1, 0]),
            (0x0000_00FE, [0xB4, 0x27, 0xBE, 0x32]),
            (0x7FFF_FFFF, [0x5A7EA949, 0x139956FB, 0x5FBD7101, 0x1924B2D4]),
            (0x8000_0000, [0x5A7EA949, 0x5FBD7101, 0x24C98C8B, 0x14A45359]),
            (0x8000_0001, [0x5A7EA949, 0x5FBD7101, 0x24C98C8B, 0x14A45359]),
            (0xFFFF_FFFE, [0x5A7EA949, 0x5FBD7101, 0xC9BF6458, 0x24C98C8B]),
            (0xFFFF_FFFF, [0x5A7EA949, 0x5FBD7101, 0xC9BF6458, 0x24C98C8B]),
        ];
        for &(limit, expect) in cases {
            let mut ks = Keystream::new(0xB519FC35);
            let got = [
                ks.next_bounded(limit),
                ks.next_bounded(limit),
                ks.next_bounded(limit),
                ks.next_bounded(limit),
            ];
            assert_eq!(got, expect, "limit {limit:#x}");
        }
    }

    #[test]
    fn zero_limit_does_not_advance() {
        let mut a = Keystream::new(7);
        let b = a.clone();
        assert_eq!(a.next_bounded(0), 0);
        assert_eq!(a, b);
    }

    #[test]
    fn crypt_word_is_self_inverse() {
        let original = *b"resdOodl";
        let mut buf = original;
        Keystream::new(99).crypt_words(&mut buf);
        assert_ne!(buf, original);
        Keystream::new(99).crypt_words(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn effective_seed_gathers_by_byte_position() {
        let table = high_table();
        assert_eq!(effective_seed(0x00FF_7F01, &table), 0x80FF_FF81);
        // High bit of each byte is ignored.
        assert_eq!(effective_seed(0x8080_8080, &table), 0x8080_8080);
        assert_eq!(effective_seed(0x1234_5678, &table), effective_seed(0x1234_5678, &table));
    }

    #[test]
    fn state_injection_layout() {
        let ks = Keystream::from_state(0x2163A6B3_8429BC22, 0x9B4923E9_F5AAB470);
        assert_eq!(
            format!("{ks:?}"),
            "Keystream(9b4923e9 f5aab470 2163a6b3 8429bc22)"
        );
    }
}
