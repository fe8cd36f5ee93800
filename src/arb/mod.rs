//! # Arbitrary-Size Pool
//!
//! A malloc-style allocator over the arena. Every block starts with an 8-byte
//! header that the caller never sees:
//!
//! ```text
//! Offset  Size  Field   Description
//! ------  ----  ------  ---------------------------------------------
//! 0       2     magic   small-free / small-inuse / large-free / large-inuse
//! 2       1     slot    size class (small blocks)
//! 3       1     chunk   index of the chunk within its page (small blocks)
//! 4       4     pages   arena pages owned (large blocks)
//! 8       ...   user data; a small free block keeps its next link here
//! ```
//!
//! ## Size Classes
//!
//! Requests are measured with the header included. Slot `s` holds chunks of
//! `16 << s` bytes, so slots 0..=8 cover everything up to one arena page.
//! A page is carved into `max(1, 256 >> s)` equal chunks the first time its
//! slot runs dry, and chunks are reused LIFO afterwards. Anything larger is a
//! large block: whole arena pages straight from the arena, returned to it on
//! free.
//!
//! ## Atoms
//!
//! ```text
//! ArbAtom = arena atom << 8 | byte offset within the page / 16
//! ```
//!
//! Large blocks always have a zero offset. The encoding caps the arena at
//! 2^24 pages for blocks of this pool.
//!
//! ## Block States
//!
//! ```text
//! SMALL_FREE  --alloc-->  SMALL_INUSE  --free-->  SMALL_FREE
//! (new)       --alloc-->  LARGE_INUSE  --free-->  LARGE_FREE (pages back to arena)
//! ```
//!
//! Freeing a block whose magic is not an in-use magic is reported and
//! ignored, which catches double frees.

use eyre::Result;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::atom::{ArbAtom, ArenaAtom};
use crate::config::{
    ARB_ATOM_SHIFT, ARB_BLOCK_HEADER_SIZE, ARB_MAGIC_LARGE_FREE, ARB_MAGIC_LARGE_INUSE,
    ARB_MAGIC_SMALL_FREE, ARB_MAGIC_SMALL_INUSE, ARB_MAX_ALLOC, ARB_NUM_SLOTS, ARB_OFFSET_SHIFT,
    ARB_PAGE_SIZE, ARENA_ATOM_SIZE,
};
use crate::storage::{Arena, HeaderType};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BlockHeader {
    magic: U16,
    slot: u8,
    chunk: u8,
    pages: U32,
}

const _: () = assert!(std::mem::size_of::<BlockHeader>() == ARB_BLOCK_HEADER_SIZE);

impl BlockHeader {
    fn small(magic: u16, slot: u8, chunk: u8) -> Self {
        Self {
            magic: U16::new(magic),
            slot,
            chunk,
            pages: U32::new(0),
        }
    }

    fn large(pages: u32) -> Self {
        Self {
            magic: U16::new(ARB_MAGIC_LARGE_INUSE),
            slot: 0,
            chunk: 0,
            pages: U32::new(pages),
        }
    }

    zerocopy_accessors! {
        magic: u16,
        slot: u8,
        chunk: u8,
        pages: u32,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ArbInfo {
    free: [U32; ARB_NUM_SLOTS],
}

const ARB_INFO_SIZE: usize = std::mem::size_of::<ArbInfo>();

/// Size class for a request of `size` user bytes, or `None` for large blocks.
pub fn slot_for(size: usize) -> Option<usize> {
    let full = size.checked_add(ARB_BLOCK_HEADER_SIZE)?;
    if full > ARB_PAGE_SIZE {
        return None;
    }
    let bits = full.next_power_of_two().trailing_zeros();
    Some(bits.saturating_sub(ARB_ATOM_SHIFT) as usize)
}

pub fn chunk_size(slot: usize) -> usize {
    1 << (slot as u32 + ARB_ATOM_SHIFT)
}

pub fn chunks_per_page(slot: usize) -> u32 {
    ((1u32 << ARB_OFFSET_SHIFT) >> slot).max(1)
}

fn make_atom(page: ArenaAtom, offset_units: u32) -> Option<ArbAtom> {
    if page.raw() >= 1 << (32 - ARB_OFFSET_SHIFT) {
        return None;
    }
    Some(ArbAtom::new(page.raw() << ARB_OFFSET_SHIFT | offset_units))
}

fn block_offset(atom: ArbAtom) -> usize {
    let page = (atom.raw() >> ARB_OFFSET_SHIFT) as usize;
    let units = (atom.raw() & ((1 << ARB_OFFSET_SHIFT) - 1)) as usize;
    page * ARENA_ATOM_SIZE + (units << ARB_ATOM_SHIFT)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbPool {
    name: String,
    info: usize,
}

impl ArbPool {
    pub fn open(arena: &mut Arena, name: &str) -> Result<Self> {
        let slot = arena
            .named_header(name, HeaderType::Arb, ARB_INFO_SIZE)
            .ok_or_else(|| eyre::eyre!("arb pool header '{}' is unavailable", name))?;

        if slot.created() {
            tracing::debug!(name, "created arb pool");
        }

        Ok(Self {
            name: name.to_string(),
            info: slot.offset(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn info<'a>(&self, arena: &'a Arena) -> Option<&'a ArbInfo> {
        ArbInfo::ref_from_bytes(arena.bytes(self.info, ARB_INFO_SIZE)?).ok()
    }

    fn info_mut<'a>(&self, arena: &'a mut Arena) -> Option<&'a mut ArbInfo> {
        ArbInfo::mut_from_bytes(arena.bytes_mut(self.info, ARB_INFO_SIZE)?).ok()
    }

    fn head(&self, arena: &Arena, slot: usize) -> ArbAtom {
        self.info(arena)
            .map_or(ArbAtom::NULL, |i| ArbAtom::new(i.free[slot].get()))
    }

    fn set_head(&self, arena: &mut Arena, slot: usize, atom: ArbAtom) {
        if let Some(info) = self.info_mut(arena) {
            info.free[slot] = U32::new(atom.raw());
        }
    }

    fn header(arena: &Arena, atom: ArbAtom) -> Option<BlockHeader> {
        if atom.is_null() {
            return None;
        }
        BlockHeader::read_from_bytes(arena.bytes(block_offset(atom), ARB_BLOCK_HEADER_SIZE)?).ok()
    }

    fn write_header(arena: &mut Arena, atom: ArbAtom, header: BlockHeader) -> Option<()> {
        arena
            .bytes_mut(block_offset(atom), ARB_BLOCK_HEADER_SIZE)?
            .copy_from_slice(header.as_bytes());
        Some(())
    }

    fn next_free(arena: &Arena, atom: ArbAtom) -> Option<ArbAtom> {
        let bytes = arena.bytes(block_offset(atom) + ARB_BLOCK_HEADER_SIZE, 4)?;
        U32::read_from_bytes(bytes).ok().map(|v| ArbAtom::new(v.get()))
    }

    fn set_next_free(arena: &mut Arena, atom: ArbAtom, next: ArbAtom) -> Option<()> {
        arena
            .bytes_mut(block_offset(atom) + ARB_BLOCK_HEADER_SIZE, 4)?
            .copy_from_slice(U32::new(next.raw()).as_bytes());
        Some(())
    }

    /// Carves a fresh page into chunks of `slot` and pushes them on its list.
    fn make_page(&self, arena: &mut Arena, slot: usize) -> Option<()> {
        let page = arena.alloc(ARB_PAGE_SIZE);
        if page.is_null() {
            return None;
        }

        let chunks = chunks_per_page(slot);
        let step = 1u32 << slot;
        let Some(first) = make_atom(page, 0) else {
            arena.free(page, ARB_PAGE_SIZE);
            arena
                .diagnostics()
                .exhausted(format!("arb pool '{}': arena page {} is not addressable", self.name, page));
            return None;
        };

        let tail = self.head(arena, slot);
        for i in 0..chunks {
            let atom = ArbAtom::new(first.raw() | i * step);
            let next = if i + 1 < chunks {
                ArbAtom::new(first.raw() | (i + 1) * step)
            } else {
                tail
            };
            Self::write_header(
                arena,
                atom,
                BlockHeader::small(ARB_MAGIC_SMALL_FREE, slot as u8, i as u8),
            )?;
            Self::set_next_free(arena, atom, next)?;
        }

        self.set_head(arena, slot, first);
        Some(())
    }

    /// Allocates a block with at least `size` usable bytes.
    pub fn alloc(&self, arena: &mut Arena, size: usize) -> ArbAtom {
        if size == 0 {
            arena
                .diagnostics()
                .logic(format!("arb pool '{}': zero-size alloc", self.name));
            return ArbAtom::NULL;
        }

        if arena.is_read_only() {
            arena
                .diagnostics()
                .logic(format!("arb pool '{}': alloc on a read-only arena", self.name));
            return ArbAtom::NULL;
        }

        match slot_for(size) {
            Some(slot) => self.alloc_small(arena, slot),
            None => self.alloc_large(arena, size),
        }
    }

    fn alloc_small(&self, arena: &mut Arena, slot: usize) -> ArbAtom {
        if self.head(arena, slot).is_null() && self.make_page(arena, slot).is_none() {
            return ArbAtom::NULL;
        }

        let atom = self.head(arena, slot);
        let header = Self::header(arena, atom);
        let valid = header.is_some_and(|h| {
            h.magic() == ARB_MAGIC_SMALL_FREE && h.slot() as usize == slot
        });
        let next = Self::next_free(arena, atom);

        let (Some(header), Some(next), true) = (header, next, valid) else {
            arena.diagnostics().format(format!(
                "arb pool '{}': free list of slot {} is corrupt at {}",
                self.name, slot, atom
            ));
            return ArbAtom::NULL;
        };

        self.set_head(arena, slot, next);
        if Self::write_header(
            arena,
            atom,
            BlockHeader::small(ARB_MAGIC_SMALL_INUSE, slot as u8, header.chunk()),
        )
        .is_none()
        {
            return ArbAtom::NULL;
        }

        atom
    }

    fn alloc_large(&self, arena: &mut Arena, size: usize) -> ArbAtom {
        let full = size.saturating_add(ARB_BLOCK_HEADER_SIZE);
        if full > ARB_MAX_ALLOC {
            arena.diagnostics().exhausted(format!(
                "arb pool '{}': allocation size limit exceeded: {}",
                self.name, size
            ));
            return ArbAtom::NULL;
        }

        let bytes = full.next_multiple_of(ARENA_ATOM_SIZE);
        let page = arena.alloc(bytes);
        if page.is_null() {
            return ArbAtom::NULL;
        }

        let Some(atom) = make_atom(page, 0) else {
            arena.free(page, bytes);
            arena
                .diagnostics()
                .exhausted(format!("arb pool '{}': arena page {} is not addressable", self.name, page));
            return ArbAtom::NULL;
        };

        let pages = (bytes / ARENA_ATOM_SIZE) as u32;
        if Self::write_header(arena, atom, BlockHeader::large(pages)).is_none() {
            arena.free(page, bytes);
            return ArbAtom::NULL;
        }

        atom
    }

    /// Allocates a block and copies `data` into it.
    pub fn alloc_bytes(&self, arena: &mut Arena, data: &[u8]) -> ArbAtom {
        let atom = self.alloc(arena, data.len());
        if let Some(dest) = self.addr_mut(arena, atom) {
            dest[..data.len()].copy_from_slice(data);
        }
        atom
    }

    pub fn free(&self, arena: &mut Arena, atom: ArbAtom) {
        if atom.is_null() {
            arena
                .diagnostics()
                .logic(format!("arb pool '{}': free of the null atom", self.name));
            return;
        }

        if arena.is_read_only() {
            arena
                .diagnostics()
                .logic(format!("arb pool '{}': free on a read-only arena", self.name));
            return;
        }

        let Some(header) = Self::header(arena, atom) else {
            arena
                .diagnostics()
                .logic(format!("arb pool '{}': free of {} outside the arena", self.name, atom));
            return;
        };

        match header.magic() {
            ARB_MAGIC_SMALL_INUSE if (header.slot() as usize) < ARB_NUM_SLOTS => {
                let slot = header.slot() as usize;
                let head = self.head(arena, slot);
                Self::set_next_free(arena, atom, head);
                Self::write_header(
                    arena,
                    atom,
                    BlockHeader::small(ARB_MAGIC_SMALL_FREE, header.slot(), header.chunk()),
                );
                self.set_head(arena, slot, atom);
            }
            ARB_MAGIC_LARGE_INUSE if block_offset(atom) % ARENA_ATOM_SIZE == 0 => {
                let mut freed = header;
                freed.set_magic(ARB_MAGIC_LARGE_FREE);
                Self::write_header(arena, atom, freed);
                arena.free(
                    ArenaAtom::new(atom.raw() >> ARB_OFFSET_SHIFT),
                    header.pages() as usize * ARENA_ATOM_SIZE,
                );
            }
            ARB_MAGIC_SMALL_FREE | ARB_MAGIC_LARGE_FREE => {
                arena
                    .diagnostics()
                    .logic(format!("arb pool '{}': attempt to double free {}", self.name, atom));
            }
            magic => {
                arena.diagnostics().logic(format!(
                    "arb pool '{}': bad magic number at {}: {:#06x}",
                    self.name, atom, magic
                ));
            }
        }
    }

    /// Usable bytes of a live block.
    pub fn usable_size(&self, arena: &Arena, atom: ArbAtom) -> Option<usize> {
        let header = Self::header(arena, atom)?;
        match header.magic() {
            ARB_MAGIC_SMALL_INUSE if (header.slot() as usize) < ARB_NUM_SLOTS => {
                Some(chunk_size(header.slot() as usize) - ARB_BLOCK_HEADER_SIZE)
            }
            ARB_MAGIC_LARGE_INUSE => {
                Some(header.pages() as usize * ARENA_ATOM_SIZE - ARB_BLOCK_HEADER_SIZE)
            }
            _ => None,
        }
    }

    pub fn addr<'a>(&self, arena: &'a Arena, atom: ArbAtom) -> Option<&'a [u8]> {
        let len = self.usable_size(arena, atom)?;
        arena.bytes(block_offset(atom) + ARB_BLOCK_HEADER_SIZE, len)
    }

    pub fn addr_mut<'a>(&self, arena: &'a mut Arena, atom: ArbAtom) -> Option<&'a mut [u8]> {
        let len = self.usable_size(arena, atom)?;
        arena.bytes_mut(block_offset(atom) + ARB_BLOCK_HEADER_SIZE, len)
    }

    /// Number of chunks on the free list of `slot`.
    pub fn free_chunks(&self, arena: &Arena, slot: usize) -> usize {
        self.walk_slot(arena, slot).0.len()
    }

    fn walk_slot(&self, arena: &Arena, slot: usize) -> (Vec<ArbAtom>, Option<ArbAtom>) {
        let mut out = Vec::new();
        if slot >= ARB_NUM_SLOTS {
            return (out, None);
        }

        let limit = arena.atoms() as usize * chunks_per_page(0) as usize;
        let mut atom = self.head(arena, slot);
        while !atom.is_null() {
            let ok = Self::header(arena, atom).is_some_and(|h| h.magic() == ARB_MAGIC_SMALL_FREE);
            if !ok || out.len() > limit {
                return (out, Some(atom));
            }
            out.push(atom);
            atom = Self::next_free(arena, atom).unwrap_or(ArbAtom::NULL);
        }
        (out, None)
    }

    pub fn dump(&self, arena: &Arena) {
        tracing::debug!(name = %self.name, "begin arb pool dump");

        for slot in 0..ARB_NUM_SLOTS {
            let (chain, bad) = self.walk_slot(arena, slot);
            if chain.is_empty() && bad.is_none() {
                continue;
            }

            tracing::debug!(slot, head = %self.head(arena, slot), count = chain.len(), "arb slot");
            for atom in &chain {
                let chunk = Self::header(arena, *atom).map_or(0, |h| h.chunk());
                tracing::debug!(atom = %atom, chunk, "arb free chunk");
            }
            if let Some(atom) = bad {
                let magic = Self::header(arena, atom).map(|h| h.magic());
                tracing::debug!(atom = %atom, magic = ?magic, "arb free chain ends in bad magic");
            }
        }

        tracing::debug!(name = %self.name, "end arb pool dump");
    }
}
