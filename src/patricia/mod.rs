//! # Patricia Trie
//!
//! An ordered index of byte-string keys. Each node tests one bit; a search
//! examines only the bits that distinguish keys from one another and then
//! compares the single key it lands on.
//!
//! ## Storage
//!
//! ```text
//! "<name>"       fixed-size pool of 16-byte nodes (see `node::PatNode`)
//! "<name>.root"  named header: root atom, node count
//! ```
//!
//! A node does not hold its key. It holds a data atom, and the tree asks a
//! [`KeySource`] for the bytes. The usual source is a [`StringPool`], so a
//! trie over interned strings costs 16 bytes per entry; [`FixedPool`] and
//! [`ArbPool`] work as sources too.
//!
//! ## Shape
//!
//! With `n` keys there are `n` nodes. Each node is internal once (testing
//! the bit at which its subtrees diverge) and a leaf once (the target of a
//! link to a node whose bit is not greater). The anchor node tests `NOBIT`,
//! is never internal, and ends every descent that only goes left.
//!
//! ```text
//!            [bit 0x00fd]
//!            /          \
//!      [bit 0x01bf]     "b\0"
//!      /        \
//!   "a\0"     "ab\0"
//! ```
//!
//! ## Keys
//!
//! Keys are 1 to 256 bytes. No key may equal or be a prefix of another, so
//! variable-length keys are normally stored with their terminating NUL; the
//! string pool's key source includes it.
//!
//! [`StringPool`]: crate::istr::StringPool

mod bits;
mod node;
mod tree;

pub use bits::{length_to_bit, plen_to_bit, NOBIT};
pub use node::{PatInfo, PatNode, PAT_INFO_SIZE};
pub use tree::{Iter, PatriciaTree};

use crate::arb::ArbPool;
use crate::atom::{ArbAtom, FixedAtom, PatDataAtom};
use crate::fixed::FixedPool;
use crate::storage::Arena;

/// Resolves a node's data atom to its key bytes.
///
/// The returned slice may run past the key; the tree only reads as many bytes
/// as the node's recorded length.
pub trait KeySource {
    fn key<'a>(&self, arena: &'a Arena, data: PatDataAtom) -> Option<&'a [u8]>;
}

impl<K: KeySource + ?Sized> KeySource for &K {
    fn key<'a>(&self, arena: &'a Arena, data: PatDataAtom) -> Option<&'a [u8]> {
        (**self).key(arena, data)
    }
}

impl KeySource for FixedPool {
    fn key<'a>(&self, arena: &'a Arena, data: PatDataAtom) -> Option<&'a [u8]> {
        self.addr(arena, FixedAtom::new(data.raw()))
    }
}

impl KeySource for ArbPool {
    fn key<'a>(&self, arena: &'a Arena, data: PatDataAtom) -> Option<&'a [u8]> {
        self.addr(arena, ArbAtom::new(data.raw()))
    }
}
