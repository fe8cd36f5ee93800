//! # parrotdb Configuration Constants
//!
//! This module centralizes the numeric layout constants of the arena and of
//! every pool built on it. Interdependent values are co-located and their
//! relationships are checked at compile time.
//!
//! ## Dependency Graph
//!
//! ```text
//! ARENA_ATOM_SHIFT (12)
//!       │
//!       ├─> ARENA_ATOM_SIZE (4096 bytes, one arena page)
//!       │     │
//!       │     ├─> ARENA_HEADER_SIZE + named headers must fit in page 0
//!       │     │
//!       │     ├─> ARB_PAGE_SIZE (equal: a small-block page is one arena atom)
//!       │     │     └─> ARB_OFFSET_SHIFT (8): 4096 / 16 offsets fit in 8 bits
//!       │     │
//!       │     └─> ISTR data pages must be a whole number of arena atoms
//!       │
//!       └─> ARENA_DEFAULT_ATOMS (32): initial size and growth quantum
//!
//! BITMAP_BLOCK_SHIFT (10)
//!       │
//!       ├─> BITMAP_BITS_PER_CHUNK (8192)
//!       ├─> BITMAP_CHUNKS_PER_MAP (256 atoms of 4 bytes fill one block)
//!       └─> BITMAP_MAX_BIT (2^21)
//! ```
//!
//! ## Address Registry
//!
//! Arenas are mapped at hinted addresses handed out by the address registry.
//! Candidates start at `REGISTRY_START`, advance by `REGISTRY_INCREMENT` per
//! mapping and are never reclaimed. Opening fails once `REGISTRY_MAX` is
//! reached.
//!
//! ## Modifying Constants
//!
//! The on-disk format depends on the arena, arbitrary-pool and string-pool
//! constants. Changing any of them requires bumping `ARENA_VERSION_MINOR` at
//! least, since existing files would otherwise be misread.

// ============================================================================
// ARENA LAYOUT
// ============================================================================

/// Arena granularity as a shift. Every arena atom is one page.
pub const ARENA_ATOM_SHIFT: u32 = 12;

pub const ARENA_ATOM_SIZE: usize = 1 << ARENA_ATOM_SHIFT;

/// Initial arena size, and the quantum requests are rounded up to on growth.
pub const ARENA_DEFAULT_ATOMS: u32 = 32;

pub const ARENA_MAGIC: u16 = 0xBE1E;

/// `ARENA_MAGIC` read back on a host of the other endianness.
pub const ARENA_MAGIC_SWAPPED: u16 = 0x1EBE;

pub const ARENA_VERSION_MAJOR: u8 = 1;
pub const ARENA_VERSION_MINOR: u8 = 0;

pub const ARENA_HEADER_SIZE: usize = 32;

/// Maximum length of a named header's name, including the NUL.
pub const HEADER_NAME_LEN: usize = 64;

/// Name, type, flags and size preceding each named header's content.
pub const NAMED_HEADER_PREFIX_SIZE: usize = HEADER_NAME_LEN + 8;

/// Named header content is padded to this alignment.
pub const NAMED_HEADER_ALIGN: usize = 8;

/// Tag at the start of every block on the arena free list.
pub const FREE_BLOCK_MAGIC: u32 = 0xCABB_1E16;

pub const DEFAULT_FILE_MODE: u32 = 0o644;

const _: () = assert!(ARENA_ATOM_SIZE == 4096, "arena pages must be 4 KiB");
const _: () = assert!(
    ARENA_HEADER_SIZE + NAMED_HEADER_PREFIX_SIZE < ARENA_ATOM_SIZE,
    "page 0 must hold the arena header and at least one named header"
);
const _: () = assert!(ARENA_DEFAULT_ATOMS >= 2, "atom 0 is the header page");

// ============================================================================
// ADDRESS REGISTRY
// ============================================================================

pub const REGISTRY_START: usize = 0x2000_0000_0000;

/// 4 GiB of address space reserved per arena. Larger arenas relocate when
/// they outgrow the reservation.
pub const REGISTRY_INCREMENT: usize = 0x0001_0000_0000;

pub const REGISTRY_MAX: usize = 0x6000_0000_0000;

const _: () = assert!(REGISTRY_START < REGISTRY_MAX);
const _: () = assert!(REGISTRY_INCREMENT % ARENA_ATOM_SIZE == 0);

// ============================================================================
// FIXED-SIZE POOL
// ============================================================================

/// Smallest slot size; a free slot must hold the free-chain link.
pub const FIXED_MIN_ATOM_SIZE: u32 = 8;

/// Tag stored beside the next pointer in a free slot.
pub const FIXED_FREE_TAG: u32 = 0xF7EE_A70E;

/// Zero-fill slots on `alloc`.
pub const FIXED_INIT_ZERO: u8 = 1 << 0;

/// Largest supported page shift (atoms per page).
pub const FIXED_MAX_SHIFT: u32 = 24;

// ============================================================================
// ARBITRARY-SIZE POOL
// ============================================================================

/// Allocation granularity of the arbitrary-size pool (16 bytes).
pub const ARB_ATOM_SHIFT: u32 = 4;

pub const ARB_PAGE_SIZE: usize = ARENA_ATOM_SIZE;

/// Bits of an `ArbAtom` holding the 16-byte offset within the page.
pub const ARB_OFFSET_SHIFT: u32 = 8;

pub const ARB_BLOCK_HEADER_SIZE: usize = 8;

/// Small size classes: chunks of `16 << slot` bytes for slot 0..=8.
pub const ARB_NUM_SLOTS: usize = 9;

/// Largest block the pool will allocate.
pub const ARB_MAX_ALLOC: usize = 256 << 20;

pub const ARB_MAGIC_SMALL_INUSE: u16 = 0x5EA1;
pub const ARB_MAGIC_SMALL_FREE: u16 = 0x5EB2;
pub const ARB_MAGIC_LARGE_INUSE: u16 = 0xB161;
pub const ARB_MAGIC_LARGE_FREE: u16 = 0xB172;

const _: () = assert!(ARB_PAGE_SIZE >> ARB_ATOM_SHIFT == 1 << ARB_OFFSET_SHIFT);
const _: () = assert!(16 << (ARB_NUM_SLOTS - 1) == ARB_PAGE_SIZE);

// ============================================================================
// IMMUTABLE STRING POOL
// ============================================================================

/// Atoms 1..=SHORT_MAX are the empty string and every single-byte string.
pub const ISTR_SHORT_MAX: u32 = 257;

/// Bytes of the length prefix in front of each string record.
pub const ISTR_LEN_PREFIX: usize = 4;

pub const ISTR_DEFAULT_SHIFT: u32 = 12;
pub const ISTR_DEFAULT_ATOM_SHIFT: u32 = 3;
pub const ISTR_DEFAULT_MAX_ATOMS: u32 = 1 << 24;

pub const ISTR_INDEX_SHIFT: u32 = 10;
pub const ISTR_INDEX_MAX_ATOMS: u32 = 1 << 22;

const _: () = assert!(ISTR_SHORT_MAX == 1 + 256);
const _: () = assert!(ISTR_DEFAULT_SHIFT + ISTR_DEFAULT_ATOM_SHIFT >= ARENA_ATOM_SHIFT);

// ============================================================================
// PATRICIA TRIE
// ============================================================================

/// Longest key, in bytes.
pub const PAT_MAX_KEY: usize = 256;

pub const PAT_NODE_SIZE: u32 = 16;

pub const PAT_DEFAULT_SHIFT: u32 = 8;
pub const PAT_DEFAULT_MAX_ATOMS: u32 = 1 << 24;

// ============================================================================
// BITMAP
// ============================================================================

pub const BITMAP_BLOCK_SHIFT: u32 = 10;
pub const BITMAP_BLOCK_SIZE: usize = 1 << BITMAP_BLOCK_SHIFT;

pub const BITMAP_BITS_PER_CHUNK: u32 = (BITMAP_BLOCK_SIZE * 8) as u32;
pub const BITMAP_CHUNKS_PER_MAP: u32 = (BITMAP_BLOCK_SIZE / 4) as u32;
pub const BITMAP_MAX_BIT: u32 = BITMAP_BITS_PER_CHUNK * BITMAP_CHUNKS_PER_MAP;

pub const BITMAP_POOL_SHIFT: u32 = 4;
pub const BITMAP_MAX_ATOMS: u32 = 1 << 16;

const _: () = assert!(BITMAP_MAX_BIT == 1 << 21);
