//! Persistent trie records.

use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::atom::{PatAtom, PatDataAtom};
use crate::config::PAT_NODE_SIZE;

use super::bits::{bit_to_len, NOBIT};

/// One trie node, stored in a fixed-size pool slot.
///
/// ```text
/// Offset  Size  Field   Description
/// ------  ----  ------  ---------------------------------------------
/// 0       2     length  Key length in bit format
/// 2       2     bit     Bit tested here (NOBIT for the anchor leaf)
/// 4       4     left    Child, or up-link when its bit is not greater
/// 8       4     right   Same, for keys with the bit set
/// 12      4     data    Payload atom the key is read from
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PatNode {
    length: U16,
    bit: U16,
    left: U32,
    right: U32,
    data: U32,
}

const _: () = assert!(std::mem::size_of::<PatNode>() == PAT_NODE_SIZE as usize);

impl PatNode {
    zerocopy_accessors! {
        length: u16,
        bit: u16,
    }

    pub(crate) fn detached(length: u16, data: PatDataAtom) -> Self {
        Self {
            length: U16::new(length),
            bit: U16::new(NOBIT),
            left: U32::new(0),
            right: U32::new(0),
            data: U32::new(data.raw()),
        }
    }

    pub fn left(&self) -> PatAtom {
        PatAtom::new(self.left.get())
    }

    pub fn right(&self) -> PatAtom {
        PatAtom::new(self.right.get())
    }

    pub fn data(&self) -> PatDataAtom {
        PatDataAtom::new(self.data.get())
    }

    pub(crate) fn set_left(&mut self, atom: PatAtom) {
        self.left = U32::new(atom.raw());
    }

    pub(crate) fn set_right(&mut self, atom: PatAtom) {
        self.right = U32::new(atom.raw());
    }

    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        bit_to_len(self.length())
    }
}

/// Tree root, kept in the named header `<name>.root`.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PatInfo {
    root: U32,
    count: U32,
}

pub const PAT_INFO_SIZE: usize = 8;
const _: () = assert!(std::mem::size_of::<PatInfo>() == PAT_INFO_SIZE);

impl PatInfo {
    zerocopy_accessors! {
        root: u32,
        count: u32,
    }
}
