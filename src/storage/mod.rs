//! # Storage Module
//!
//! The arena layer everything else allocates from: one growable memory-mapped
//! region per arena, addressed in 4 KiB atoms, with persistent named headers in
//! page 0 and a size-sorted free list threaded through released pages.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Arena (alloc / free / named headers / dump)  │
//! ├──────────────────────┬───────────────────────┤
//! │  FreeList            │  ArenaHeader          │
//! │  (in free pages)     │  NamedHeader × n      │
//! ├──────────────────────┴───────────────────────┤
//! │  Region (mmap, grow, relocate, msync)         │
//! ├──────────────────────────────────────────────┤
//! │  AddressRegistry (placement hints)            │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Zero-Copy Access
//!
//! Pools never copy arena data. They parse their persistent structs straight
//! out of the mapping with zerocopy and write through `&mut` slices. Because
//! growth may relocate the mapping, every slice borrows the arena and the
//! borrow checker rejects holding one across an allocation:
//!
//! ```text
//! let node = arena.addr(atom, 16)?;   // &[u8] borrowing arena
//! arena.alloc(4096);                  // ERROR: cannot borrow mutably
//! ```
//!
//! ## Persistence
//!
//! A file-backed arena is reopened by path. The header records magic, version
//! and length; all three must match or the open fails. Pools find their state
//! again through their named headers.
//!
//! ## Module Organization
//!
//! - `arena`: `Arena` and `ArenaBuilder`
//! - `headers`: arena header and named header layouts
//! - `freelist`: free block layout and list maintenance
//! - `region`: the mapping itself
//! - `registry`: placement hints

mod arena;
mod freelist;
mod headers;
mod region;
mod registry;

pub use arena::{Arena, ArenaBuilder, HeaderInfo, HeaderSlot};
pub use freelist::{FreeBlock, FREE_BLOCK_SIZE};
pub use headers::{ArenaHeader, HeaderType, NamedHeader};
pub use region::Region;
pub use registry::AddressRegistry;
