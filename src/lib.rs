//! # parrotdb - Atom-Addressed Storage over a Memory-Mapped Arena
//!
//! parrotdb is a family of allocators that live inside one growable,
//! optionally file-backed memory mapping. Everything is addressed by 32-bit
//! atoms rather than pointers, so a file can be closed, reopened at another
//! address and used as is.
//!
//! ## Quick Start
//!
//! ```ignore
//! use parrotdb::{Arena, PatriciaTree, StringPool};
//!
//! let mut arena = Arena::open("./names.pdb")?;
//! let strings = StringPool::open(&mut arena, "strings", 12, 3, 1 << 24)?;
//! let tree = PatriciaTree::open(&mut arena, "names", strings, 8, 1 << 24)?;
//!
//! let atom = tree.keys().intern_str(&mut arena, "parrot");
//! tree.add(&mut arena, atom.into(), 0);
//!
//! let found = tree.get(&arena, b"parrot\0");
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Patricia Trie          │  Sparse Bitmaps     │
//! ├─────────────────────────┴─────────────────────┤
//! │  Immutable String Pool                        │
//! ├───────────────────────┬───────────────────────┤
//! │  Fixed-Size Pool      │  Arbitrary-Size Pool  │
//! ├───────────────────────┴───────────────────────┤
//! │  Arena: mmap region, free list, named headers │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Pools find their persistent state through named headers in the arena's
//! first page, so reopening a file and calling the same `open` functions
//! restores every pool.
//!
//! ## Rules of Use
//!
//! - Atoms are only meaningful to the pool that issued them, and each pool
//!   has its own atom type.
//! - Any allocation may grow and remap the arena. Slices returned by `addr`
//!   style functions borrow the arena, so the borrow checker ends them before
//!   the next allocation.
//! - Exhaustion returns a null atom. Caller mistakes are reported through
//!   [`Diagnostics`] and ignored. Only opening returns `eyre::Result`.
//! - One writer per arena. There is no internal locking.
//!
//! ## Module Overview
//!
//! - [`storage`]: the arena, its free list and named headers
//! - [`fixed`]: paged pool of uniform atoms
//! - [`arb`]: size-class allocator for arbitrary sizes
//! - [`istr`]: append-only string interning
//! - [`patricia`]: ordered index over byte keys
//! - [`bitmap`]: sparse bitmaps on a fixed pool
//! - [`config`]: layout constants and `name.key=value` overrides

#[macro_use]
mod macros;

pub mod arb;
pub mod atom;
pub mod bitmap;
pub mod config;
pub mod diag;
pub mod fixed;
pub mod istr;
pub mod patricia;
pub mod storage;

pub use arb::ArbPool;
pub use atom::{
    ArbAtom, ArenaAtom, BitmapId, FixedAtom, IstrAtom, IstrDataAtom, PatAtom, PatDataAtom,
};
pub use bitmap::BitmapPool;
pub use config::Config;
pub use diag::{Diagnostic, DiagnosticKind, Diagnostics};
pub use fixed::FixedPool;
pub use istr::StringPool;
pub use patricia::{KeySource, PatriciaTree};
pub use storage::{Arena, ArenaBuilder};
