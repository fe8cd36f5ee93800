//! # Arena Free List
//!
//! Released arena ranges are kept on a singly linked list threaded through the
//! free pages themselves. The head lives in the arena header; each free range
//! starts with a `FreeBlock`:
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  ---------------------------------------
//! 0       4     magic (0xCABB1E16)
//! 4       4     size: length of the range in arena atoms
//! 8       4     next: first atom of the next free range, 0 = end
//! 12      4     reserved
//! ```
//!
//! ## Ordering
//!
//! The list is sorted by ascending size, so the first block large enough for a
//! request is also the tightest fit. Adjacent ranges are never coalesced.
//!
//! ## Splitting
//!
//! A request smaller than the chosen block is carved from the block's tail. The
//! remainder keeps its start atom and is re-inserted at its new size position.
//!
//! ## Corruption
//!
//! Every hop checks the magic and the bounds of the block. A walk longer than
//! the arena has atoms means a cycle. Both are reported as errors rather than
//! followed.

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::headers::ArenaHeader;
use crate::config::{ARENA_ATOM_SHIFT, ARENA_ATOM_SIZE, ARENA_HEADER_SIZE, FREE_BLOCK_MAGIC};

pub const FREE_BLOCK_SIZE: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FreeBlock {
    magic: U32,
    size: U32,
    next: U32,
    reserved: U32,
}

const _: () = assert!(std::mem::size_of::<FreeBlock>() == FREE_BLOCK_SIZE);

impl FreeBlock {
    pub fn new(size: u32, next: u32) -> Self {
        Self {
            magic: U32::new(FREE_BLOCK_MAGIC),
            size: U32::new(size),
            next: U32::new(next),
            reserved: U32::new(0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic.get() == FREE_BLOCK_MAGIC
    }

    zerocopy_accessors! {
        size: u32,
        next: u32,
    }
}

/// View of the free list over a whole mapped arena.
pub struct FreeList<'a> {
    mem: &'a mut [u8],
}

impl<'a> FreeList<'a> {
    pub fn new(mem: &'a mut [u8]) -> Self {
        Self { mem }
    }

    fn total_atoms(&self) -> u32 {
        (self.mem.len() >> ARENA_ATOM_SHIFT) as u32
    }

    pub fn head(&self) -> Result<u32> {
        read_head(&self.mem[..])
    }

    fn set_head(&mut self, atom: u32) -> Result<()> {
        ArenaHeader::from_bytes_mut(&mut self.mem[..])?.set_free(atom);
        Ok(())
    }

    fn block(&self, atom: u32) -> Result<&FreeBlock> {
        read_block(&self.mem[..], atom)
    }

    fn block_mut(&mut self, atom: u32) -> Result<&mut FreeBlock> {
        self.block(atom)?;

        let offset = (atom as usize) << ARENA_ATOM_SHIFT;
        FreeBlock::mut_from_bytes(&mut self.mem[offset..offset + FREE_BLOCK_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse FreeBlock: {:?}", e))
    }

    fn set_link(&mut self, prev: u32, target: u32) -> Result<()> {
        if prev == 0 {
            self.set_head(target)?;
        } else {
            self.block_mut(prev)?.set_next(target);
        }
        Ok(())
    }

    pub fn blocks(&self) -> Result<Vec<(u32, u32)>> {
        walk(&self.mem[..])
    }

    /// True if `[atom, atom + atoms)` intersects any free block.
    pub fn overlaps(&self, atom: u32, atoms: u32) -> Result<bool> {
        let end = atom as u64 + atoms as u64;
        Ok(self.blocks()?.iter().any(|&(start, size)| {
            let block_end = start as u64 + size as u64;
            (atom as u64) < block_end && (start as u64) < end
        }))
    }

    /// Removes `atoms` atoms from the tightest fitting block.
    pub fn take(&mut self, atoms: u32) -> Result<Option<u32>> {
        ensure!(atoms > 0, "cannot take an empty range from the free list");

        let mut prev = 0;
        let mut cur = self.head()?;
        let mut hops = 0u32;
        let limit = self.total_atoms();

        while cur != 0 {
            let block = self.block(cur)?;
            if block.size() >= atoms {
                break;
            }
            hops += 1;
            if hops > limit {
                bail!("free list cycle detected after {} blocks", hops);
            }
            prev = cur;
            cur = block.next();
        }

        if cur == 0 {
            return Ok(None);
        }

        let block = *self.block(cur)?;
        self.set_link(prev, block.next())?;

        if block.size() == atoms {
            return Ok(Some(cur));
        }

        let remainder = block.size() - atoms;
        self.insert(cur, remainder)?;
        Ok(Some(cur + remainder))
    }

    /// Puts `[atom, atom + atoms)` on the list at its size position.
    pub fn insert(&mut self, atom: u32, atoms: u32) -> Result<()> {
        ensure!(
            atom != 0 && atoms > 0 && atom as u64 + atoms as u64 <= self.total_atoms() as u64,
            "invalid free range: atom {} size {} (arena has {})",
            atom,
            atoms,
            self.total_atoms()
        );

        let mut prev = 0;
        let mut cur = self.head()?;
        let mut hops = 0u32;
        let limit = self.total_atoms();

        while cur != 0 {
            let block = self.block(cur)?;
            if block.size() >= atoms {
                break;
            }
            hops += 1;
            if hops > limit {
                bail!("free list cycle detected after {} blocks", hops);
            }
            prev = cur;
            cur = block.next();
        }

        let offset = (atom as usize) << ARENA_ATOM_SHIFT;
        self.mem[offset..offset + FREE_BLOCK_SIZE]
            .copy_from_slice(FreeBlock::new(atoms, cur).as_bytes());
        self.set_link(prev, atom)
    }
}

fn read_head(mem: &[u8]) -> Result<u32> {
    let bytes = mem.get(..ARENA_HEADER_SIZE).ok_or_else(|| {
        eyre::eyre!("buffer too small for ArenaHeader: {} < {}", mem.len(), ARENA_HEADER_SIZE)
    })?;
    let header = ArenaHeader::ref_from_bytes(bytes)
        .map_err(|e| eyre::eyre!("failed to parse ArenaHeader: {:?}", e))?;
    Ok(header.free())
}

fn read_block(mem: &[u8], atom: u32) -> Result<&FreeBlock> {
    let total = (mem.len() >> ARENA_ATOM_SHIFT) as u32;
    ensure!(
        atom != 0 && atom < total,
        "free list points outside the arena: atom {} (arena has {})",
        atom,
        total
    );

    let offset = (atom as usize) << ARENA_ATOM_SHIFT;
    let block = FreeBlock::ref_from_bytes(&mem[offset..offset + FREE_BLOCK_SIZE])
        .map_err(|e| eyre::eyre!("failed to parse FreeBlock: {:?}", e))?;

    ensure!(block.is_valid(), "free block at atom {} has a bad magic", atom);
    Ok(block)
}

/// Walks the list of a mapped arena, yielding `(atom, size)` for each block.
pub fn walk(mem: &[u8]) -> Result<Vec<(u32, u32)>> {
    let mut out = Vec::new();
    let mut cur = read_head(mem)?;
    let limit = (mem.len() >> ARENA_ATOM_SHIFT) as u32;

    while cur != 0 {
        ensure!(
            (out.len() as u32) < limit,
            "free list cycle detected after {} blocks",
            out.len()
        );
        let block = read_block(mem, cur)?;
        out.push((cur, block.size()));
        cur = block.next();
    }

    Ok(out)
}

const _: () = assert!(FREE_BLOCK_SIZE <= ARENA_ATOM_SIZE);
