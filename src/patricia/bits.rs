//! Bit numbering for the trie.
//!
//! A bit number packs a byte index and an inverted single-bit mask:
//!
//! ```text
//! bit = (byte << 8) | (!mask & 0xff)
//! ```
//!
//! The most significant bit of byte 0 is `0x007f` and the least significant
//! bit of byte 1 is `0x01fe`, so comparing bit numbers as integers orders them
//! by position in the key. `0xff` in the low byte never names a real bit and
//! marks "the whole byte": a key of `n` bytes has length `((n - 1) << 8) | 0xff`,
//! which is greater than every bit inside it. `NOBIT` (0) is below all of them.

use crate::config::PAT_MAX_KEY;

pub const NOBIT: u16 = 0;

const BIT_MASKS: [u8; 8] = [0x7f, 0xbf, 0xdf, 0xef, 0xf7, 0xfb, 0xfd, 0xfe];

/// Highest set bit of a non-zero byte.
#[inline]
fn hibit(byte: u8) -> u8 {
    0x80 >> byte.leading_zeros()
}

/// Bit-format length of a `len` byte key. `len` must be 1..=PAT_MAX_KEY.
#[inline]
pub fn length_to_bit(len: usize) -> u16 {
    debug_assert!((1..=PAT_MAX_KEY).contains(&len));
    (((len - 1) << 8) | 0xff) as u16
}

#[inline]
pub fn bit_to_len(bit: u16) -> usize {
    (bit as usize >> 8) + 1
}

/// Bit-format form of a prefix length given in bits.
pub fn plen_to_bit(plen: usize) -> u16 {
    let base = (plen >> 3) << 8;
    let bit = if plen & 7 != 0 {
        base | BIT_MASKS[plen & 7] as usize
    } else {
        base - 1
    };
    bit as u16
}

#[inline]
pub fn makebit(byte: usize, xor: u8) -> u16 {
    (((byte & 0xff) << 8) | (!hibit(xor) as usize & 0xff)) as u16
}

/// Whether `bit` is set in `key`. Bits past the end of the key read as clear.
#[inline]
pub fn key_test(key: &[u8], bit: u16) -> bool {
    key.get(bit as usize >> 8)
        .is_some_and(|&b| b & (!bit as u8) != 0)
}

/// First bit at which `k1` and `k2` differ, looking no further than
/// `bitlen`. Returns `bitlen` when they agree that far.
pub fn mismatch(k1: &[u8], k2: &[u8], bitlen: u16) -> u16 {
    let len = bit_to_len(bitlen);
    k1.iter()
        .zip(k2)
        .take(len)
        .position(|(a, b)| a != b)
        .map_or(bitlen, |i| makebit(i, k1[i] ^ k2[i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_numbers_order_by_position() {
        assert_eq!(makebit(0, 0x80), 0x007f);
        assert_eq!(makebit(0, 0x01), 0x00fe);
        assert_eq!(makebit(1, 0x80), 0x017f);
        assert!(makebit(0, 0x01) < length_to_bit(1));
        assert!(length_to_bit(1) < makebit(1, 0x80));
        assert!(NOBIT < makebit(0, 0x80));
    }

    #[test]
    fn lengths() {
        assert_eq!(length_to_bit(1), 0x00ff);
        assert_eq!(length_to_bit(PAT_MAX_KEY), 0xffff);
        assert_eq!(bit_to_len(0x02ff), 3);
        assert_eq!(bit_to_len(makebit(2, 0x10)), 3);
    }

    #[test]
    fn prefix_lengths() {
        assert_eq!(plen_to_bit(8), length_to_bit(1));
        assert_eq!(plen_to_bit(16), length_to_bit(2));
        // A 1-bit prefix ends just before the second bit of byte 0.
        assert_eq!(plen_to_bit(1), 0x00bf);
        assert_eq!(plen_to_bit(1), makebit(0, 0x40));
        // A 12-bit prefix ends at the fourth bit of byte 1.
        assert_eq!(plen_to_bit(12), 0x01f7);
    }

    #[test]
    fn key_test_reads_msb_first() {
        let key = [0b1000_0001u8, 0b0100_0000];

        assert!(key_test(&key, makebit(0, 0x80)));
        assert!(!key_test(&key, makebit(0, 0x40)));
        assert!(key_test(&key, makebit(0, 0x01)));
        assert!(key_test(&key, makebit(1, 0x40)));
        assert!(!key_test(&key, makebit(5, 0x40)));
    }

    #[test]
    fn mismatch_finds_first_difference() {
        assert_eq!(mismatch(b"abc", b"abd", length_to_bit(3)), makebit(2, b'c' ^ b'd'));
        assert_eq!(mismatch(b"abc", b"abc", length_to_bit(3)), length_to_bit(3));
        assert_eq!(mismatch(b"abc", b"abd", length_to_bit(2)), length_to_bit(2));
        // Differences past a partial-byte prefix still sort after it.
        let diff = mismatch(&[0xf0, 0x0f], &[0xf0, 0x0e], plen_to_bit(12));
        assert!(diff > plen_to_bit(12));
    }
}
