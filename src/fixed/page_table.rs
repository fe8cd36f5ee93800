//! Page table shared by the fixed-size pool and the string pool's data area.
//!
//! The table is one arena allocation holding `pages` little-endian u32
//! entries. Entry `n` is the arena atom backing page `n`, or 0 while the page
//! is unrealized. An entry is written once and never reassigned.

use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, IntoBytes};

use crate::atom::ArenaAtom;
use crate::config::ARENA_ATOM_SIZE;
use crate::storage::Arena;

const ENTRY_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageTable {
    table: ArenaAtom,
    pages: u32,
}

impl PageTable {
    pub fn new(table: ArenaAtom, pages: u32) -> Self {
        Self { table, pages }
    }

    /// Allocates a zeroed table of `pages` entries.
    pub fn create(arena: &mut Arena, pages: u32) -> Option<Self> {
        let bytes = pages as usize * ENTRY_SIZE;
        let table = arena.alloc(bytes);
        if table.is_null() {
            return None;
        }
        arena.addr_mut(table, bytes)?.fill(0);
        Some(Self { table, pages })
    }

    pub fn table(&self) -> ArenaAtom {
        self.table
    }

    /// True when the table lies inside the arena.
    pub fn is_valid(&self, arena: &Arena) -> bool {
        !self.table.is_null()
            && arena
                .addr(self.table, self.pages as usize * ENTRY_SIZE)
                .is_some()
    }

    fn entry_offset(&self, page: u32) -> usize {
        self.table.raw() as usize * ARENA_ATOM_SIZE + page as usize * ENTRY_SIZE
    }

    pub fn get(&self, arena: &Arena, page: u32) -> ArenaAtom {
        if page >= self.pages {
            return ArenaAtom::NULL;
        }
        arena
            .bytes(self.entry_offset(page), ENTRY_SIZE)
            .and_then(|b| U32::read_from_bytes(b).ok())
            .map_or(ArenaAtom::NULL, |v| ArenaAtom::new(v.get()))
    }

    pub fn set(&self, arena: &mut Arena, page: u32, atom: ArenaAtom) -> bool {
        if page >= self.pages {
            return false;
        }
        match arena.bytes_mut(self.entry_offset(page), ENTRY_SIZE) {
            Some(b) => {
                b.copy_from_slice(U32::new(atom.raw()).as_bytes());
                true
            }
            None => false,
        }
    }

    /// First unrealized page at or after `from`.
    pub fn next_empty(&self, arena: &Arena, from: u32) -> Option<u32> {
        (from..self.pages).find(|&page| self.get(arena, page).is_null())
    }

    pub fn realized(&self, arena: &Arena) -> u32 {
        (0..self.pages)
            .filter(|&page| !self.get(arena, page).is_null())
            .count() as u32
    }
}
