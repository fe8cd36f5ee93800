//! Short strings: the empty string and every one-byte string have fixed atoms
//! and need no storage.
//!
//! ```text
//! atom 1        ""
//! atom 2 + b    the single byte b   (2..=257)
//! atom 258..    interned strings (index pool atom + ISTR_SHORT_MAX)
//! ```

use crate::atom::IstrAtom;
use crate::config::ISTR_SHORT_MAX;

pub const EMPTY_STRING: IstrAtom = IstrAtom::new(1);

const FIRST_BYTE_ATOM: u32 = 2;

const fn build_table() -> [[u8; 2]; 256] {
    let mut table = [[0u8; 2]; 256];
    let mut i = 0;
    while i < 256 {
        table[i][0] = i as u8;
        i += 1;
    }
    table
}

/// Each one-byte string followed by its NUL.
static SINGLE_BYTES: [[u8; 2]; 256] = build_table();

static EMPTY: [u8; 1] = [0];

const _: () = assert!(FIRST_BYTE_ATOM + 255 == ISTR_SHORT_MAX);

pub fn is_short(atom: IstrAtom) -> bool {
    !atom.is_null() && atom.raw() <= ISTR_SHORT_MAX
}

/// The reserved atom for `bytes`, if it is short enough to have one.
pub fn short_atom(bytes: &[u8]) -> Option<IstrAtom> {
    match bytes {
        [] => Some(EMPTY_STRING),
        [b] => Some(IstrAtom::new(FIRST_BYTE_ATOM + *b as u32)),
        _ => None,
    }
}

/// The string of a reserved atom, including its NUL.
pub fn short_string(atom: IstrAtom) -> Option<&'static [u8]> {
    match atom.raw() {
        1 => Some(&EMPTY[..]),
        n if (FIRST_BYTE_ATOM..=ISTR_SHORT_MAX).contains(&n) => {
            Some(&SINGLE_BYTES[(n - FIRST_BYTE_ATOM) as usize][..])
        }
        _ => None,
    }
}
