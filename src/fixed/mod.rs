//! # Fixed-Size Pool
//!
//! A paged array of uniform atoms built on the arena. Part of an atom number
//! selects a page through the page table, the rest selects a slot on it:
//!
//! ```text
//! atom  = page << shift | slot
//! page  -> page table entry -> arena atom (1 << shift slots of atom_size bytes)
//! ```
//!
//! Our pages are the arena's atoms; our atoms are slots within them.
//!
//! ## Persistent Info (24 bytes)
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  -------------------------------------------
//! 0       1     shift      log2(slots per page)
//! 1       1     flags      FIXED_INIT_ZERO
//! 2       2     atom_size  Slot size in bytes (multiple of 8, >= 8)
//! 4       4     max_atoms  Capacity, a whole number of pages
//! 8       4     free       Head of the free chain, 0 = full
//! 12      4     table      Arena atom of the page table
//! 16      4     pages      Page table entries (max_atoms >> shift)
//! 20      4     reserved
//! ```
//!
//! The info lives in a named header of type `Fixed`, or embedded in another
//! pool's header (see [`FixedPool::setup`]).
//!
//! ## Free Chain
//!
//! A free slot holds a [`FreeLink`]: the next free atom plus a tag. Pages are
//! realized lazily. When the chain head sits on an unrealized page, the page
//! is allocated and its slots are threaded in order; the last slot points at
//! the first atom of the next unrealized page, so the chain only ends when
//! the table is full.
//!
//! ## Two Access Styles
//!
//! `alloc`/`free` manage slots through the chain. `element`/`element_if_exists`
//! treat the pool as a plain paged array and realize zeroed pages on touch. A
//! given pool is used in one style only; mixing them would let `alloc` hand
//! out slots `element` already uses.

mod page_table;

pub(crate) use page_table::PageTable;

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::atom::{ArenaAtom, FixedAtom};
use crate::config::{ARENA_ATOM_SIZE, FIXED_FREE_TAG, FIXED_MAX_SHIFT, FIXED_MIN_ATOM_SIZE};
use crate::storage::{Arena, HeaderType};

pub use crate::config::FIXED_INIT_ZERO;

pub const FIXED_INFO_SIZE: usize = 24;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FixedInfo {
    shift: u8,
    flags: u8,
    atom_size: U16,
    max_atoms: U32,
    free: U32,
    table: U32,
    pages: U32,
    reserved: U32,
}

const _: () = assert!(std::mem::size_of::<FixedInfo>() == FIXED_INFO_SIZE);

impl FixedInfo {
    zerocopy_accessors! {
        shift: u8,
        flags: u8,
        atom_size: u16,
        max_atoms: u32,
        free: u32,
        table: u32,
        pages: u32,
    }

    fn page_table(&self) -> PageTable {
        PageTable::new(ArenaAtom::new(self.table()), self.pages())
    }

    fn page_bytes(&self) -> usize {
        (1usize << self.shift) * self.atom_size() as usize
    }
}

/// Overlay of a free slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FreeLink {
    next: U32,
    tag: U32,
}

const FREE_LINK_SIZE: usize = 8;
const _: () = assert!(std::mem::size_of::<FreeLink>() == FREE_LINK_SIZE);
const _: () = assert!(FREE_LINK_SIZE as u32 <= FIXED_MIN_ATOM_SIZE);

impl FreeLink {
    fn new(next: u32) -> Self {
        Self {
            next: U32::new(next),
            tag: U32::new(FIXED_FREE_TAG),
        }
    }

    fn is_free(&self) -> bool {
        self.tag.get() == FIXED_FREE_TAG
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPool {
    name: String,
    info: usize,
}

impl FixedPool {
    /// Opens the pool stored in the named header `name`, creating it if the
    /// arena has none. `shift`, `atom-size` and `max-atoms` may be overridden
    /// by the arena's config under `name`.
    pub fn open(
        arena: &mut Arena,
        name: &str,
        shift: u32,
        atom_size: u32,
        max_atoms: u32,
    ) -> Result<Self> {
        let slot = arena
            .named_header(name, HeaderType::Fixed, FIXED_INFO_SIZE)
            .ok_or_else(|| eyre::eyre!("fixed pool header '{}' is unavailable", name))?;

        Self::setup(arena, name, slot.offset(), shift, atom_size, max_atoms)
    }

    /// Attaches to an info block at byte offset `info` of the arena, usually
    /// embedded in another pool's named header. A zeroed block is initialized.
    pub fn setup(
        arena: &mut Arena,
        name: &str,
        info: usize,
        shift: u32,
        atom_size: u32,
        max_atoms: u32,
    ) -> Result<Self> {
        let pool = Self {
            name: name.to_string(),
            info,
        };

        let existing = *pool
            .info(arena)
            .ok_or_else(|| eyre::eyre!("fixed pool '{}' info block is out of range", name))?;

        if existing.table() != 0 {
            pool.validate(arena, &existing)?;
            return Ok(pool);
        }

        let config = arena.config();
        let shift = config.value32(name, "shift", shift);
        let atom_size = config.value32_min(name, "atom-size", atom_size);
        let max_atoms = config.value32(name, "max-atoms", max_atoms);

        ensure!(
            shift <= FIXED_MAX_SHIFT,
            "fixed pool '{}' shift {} exceeds {}",
            name,
            shift,
            FIXED_MAX_SHIFT
        );

        let atom_size = atom_size.max(FIXED_MIN_ATOM_SIZE).next_multiple_of(FIXED_MIN_ATOM_SIZE);
        ensure!(
            atom_size <= u16::MAX as u32,
            "fixed pool '{}' atom size {} is too large",
            name,
            atom_size
        );

        let per_page = 1u32 << shift;
        let max_atoms = max_atoms
            .max(1)
            .checked_next_multiple_of(per_page)
            .ok_or_else(|| eyre::eyre!("fixed pool '{}' max atoms overflow", name))?;
        let pages = max_atoms >> shift;

        let table = PageTable::create(arena, pages).ok_or_else(|| {
            eyre::eyre!("could not allocate page table for fixed pool '{}'", name)
        })?;

        let info = pool
            .info_mut(arena)
            .ok_or_else(|| eyre::eyre!("arena is read-only, cannot create fixed pool '{}'", name))?;
        info.set_shift(shift as u8);
        info.set_flags(0);
        info.set_atom_size(atom_size as u16);
        info.set_max_atoms(max_atoms);
        info.set_free(1);
        info.set_table(table.table().raw());
        info.set_pages(pages);

        tracing::debug!(name, shift, atom_size, max_atoms, "created fixed pool");
        Ok(pool)
    }

    fn validate(&self, arena: &Arena, info: &FixedInfo) -> Result<()> {
        let ok = (info.shift() as u32) <= FIXED_MAX_SHIFT
            && info.atom_size() as u32 >= FIXED_MIN_ATOM_SIZE
            && info.pages() == info.max_atoms() >> info.shift()
            && info.page_table().is_valid(arena);

        if !ok {
            let msg = format!("fixed pool '{}' info is corrupt: {:?}", self.name, info);
            arena.diagnostics().format(msg.clone());
            eyre::bail!(msg);
        }
        Ok(())
    }

    fn info<'a>(&self, arena: &'a Arena) -> Option<&'a FixedInfo> {
        FixedInfo::ref_from_bytes(arena.bytes(self.info, FIXED_INFO_SIZE)?).ok()
    }

    fn info_mut<'a>(&self, arena: &'a mut Arena) -> Option<&'a mut FixedInfo> {
        FixedInfo::mut_from_bytes(arena.bytes_mut(self.info, FIXED_INFO_SIZE)?).ok()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shift(&self, arena: &Arena) -> u32 {
        self.info(arena).map_or(0, |i| i.shift() as u32)
    }

    pub fn atom_size(&self, arena: &Arena) -> usize {
        self.info(arena).map_or(0, |i| i.atom_size() as usize)
    }

    pub fn max_atoms(&self, arena: &Arena) -> u32 {
        self.info(arena).map_or(0, |i| i.max_atoms())
    }

    pub fn set_flags(&self, arena: &mut Arena, flags: u8) {
        if let Some(info) = self.info_mut(arena) {
            info.set_flags(info.flags() | flags);
        }
    }

    pub fn clear_flags(&self, arena: &mut Arena, flags: u8) {
        if let Some(info) = self.info_mut(arena) {
            info.set_flags(info.flags() & !flags);
        }
    }

    pub fn test_flags(&self, arena: &Arena, flags: u8) -> bool {
        self.info(arena).is_some_and(|i| i.flags() & flags != 0)
    }

    /// Byte offset of `atom` in the arena, if its page is realized.
    fn offset(&self, arena: &Arena, info: &FixedInfo, atom: u32) -> Option<usize> {
        if atom == 0 || atom >= info.max_atoms() {
            return None;
        }
        let page = info.page_table().get(arena, atom >> info.shift());
        if page.is_null() {
            return None;
        }
        let slot = (atom & ((1u32 << info.shift()) - 1)) as usize;
        Some(page.raw() as usize * ARENA_ATOM_SIZE + slot * info.atom_size() as usize)
    }

    fn link(&self, arena: &Arena, info: &FixedInfo, atom: u32) -> Option<FreeLink> {
        let offset = self.offset(arena, info, atom)?;
        FreeLink::read_from_bytes(arena.bytes(offset, FREE_LINK_SIZE)?).ok()
    }

    fn realize(&self, arena: &mut Arena, info: &FixedInfo, page: u32) -> Option<usize> {
        let atom = arena.alloc(info.page_bytes());
        if atom.is_null() {
            return None;
        }
        if !info.page_table().set(arena, page, atom) {
            arena.free(atom, info.page_bytes());
            return None;
        }
        Some(atom.raw() as usize * ARENA_ATOM_SIZE)
    }

    fn thread_page(&self, arena: &mut Arena, info: &FixedInfo, page: u32) -> Option<()> {
        let base = self.realize(arena, info, page)?;
        let count = 1u32 << info.shift();
        let first = page << info.shift();
        let size = info.atom_size() as usize;

        let following = info
            .page_table()
            .next_empty(arena, page + 1)
            .map_or(0, |p| p << info.shift());

        let mem = arena.bytes_mut(base, info.page_bytes())?;
        for i in 0..count {
            let next = if i + 1 < count { first + i + 1 } else { following };
            let at = i as usize * size;
            mem[at..at + FREE_LINK_SIZE].copy_from_slice(FreeLink::new(next).as_bytes());
        }
        Some(())
    }

    /// Pops the free chain. Returns `FixedAtom::NULL` when the pool is full.
    pub fn alloc(&self, arena: &mut Arena) -> FixedAtom {
        if arena.is_read_only() {
            arena
                .diagnostics()
                .logic(format!("alloc from fixed pool '{}' on a read-only arena", self.name));
            return FixedAtom::NULL;
        }

        let Some(info) = self.info(arena).copied() else {
            return FixedAtom::NULL;
        };

        let atom = info.free();
        if atom == 0 {
            arena
                .diagnostics()
                .exhausted(format!("fixed pool '{}' is full ({} atoms)", self.name, info.max_atoms()));
            return FixedAtom::NULL;
        }

        if atom >= info.max_atoms() {
            arena.diagnostics().format(format!(
                "fixed pool '{}' free chain points past capacity: {}",
                self.name, atom
            ));
            return FixedAtom::NULL;
        }

        let page = atom >> info.shift();
        if info.page_table().get(arena, page).is_null()
            && self.thread_page(arena, &info, page).is_none()
        {
            return FixedAtom::NULL;
        }

        let Some(link) = self.link(arena, &info, atom) else {
            return FixedAtom::NULL;
        };
        if !link.is_free() {
            arena.diagnostics().logic(format!(
                "fixed pool '{}' free chain is corrupt at atom {}",
                self.name, atom
            ));
            return FixedAtom::NULL;
        }

        let Some(offset) = self.offset(arena, &info, atom) else {
            return FixedAtom::NULL;
        };
        let clear = if info.flags() & FIXED_INIT_ZERO != 0 {
            info.atom_size() as usize
        } else {
            FREE_LINK_SIZE
        };
        if let Some(bytes) = arena.bytes_mut(offset, clear) {
            bytes.fill(0);
        }

        if let Some(info) = self.info_mut(arena) {
            info.set_free(link.next.get());
        }

        FixedAtom::new(atom)
    }

    /// Pushes `atom` onto the free chain.
    pub fn free(&self, arena: &mut Arena, atom: FixedAtom) {
        if atom.is_null() {
            arena
                .diagnostics()
                .logic(format!("free of the null atom in fixed pool '{}'", self.name));
            return;
        }

        if arena.is_read_only() {
            arena
                .diagnostics()
                .logic(format!("free in fixed pool '{}' on a read-only arena", self.name));
            return;
        }

        let Some(info) = self.info(arena).copied() else {
            return;
        };
        let Some(offset) = self.offset(arena, &info, atom.raw()) else {
            arena.diagnostics().logic(format!(
                "free of {} outside the realized range of fixed pool '{}'",
                atom, self.name
            ));
            return;
        };

        if self.link(arena, &info, atom.raw()).is_some_and(|l| l.is_free())
            && self.on_chain(arena, &info, atom.raw())
        {
            arena
                .diagnostics()
                .logic(format!("double free of {} in fixed pool '{}'", atom, self.name));
            return;
        }

        if let Some(bytes) = arena.bytes_mut(offset, FREE_LINK_SIZE) {
            bytes.copy_from_slice(FreeLink::new(info.free()).as_bytes());
        }
        if let Some(info) = self.info_mut(arena) {
            info.set_free(atom.raw());
        }
    }

    fn on_chain(&self, arena: &Arena, info: &FixedInfo, atom: u32) -> bool {
        let mut cur = info.free();
        let mut hops = 0u32;

        while cur != 0 && hops <= info.max_atoms() {
            if cur == atom {
                return true;
            }
            match self.link(arena, info, cur) {
                Some(link) if link.is_free() => cur = link.next.get(),
                _ => break,
            }
            hops += 1;
        }
        false
    }

    /// The `atom_size` bytes of a live atom.
    pub fn addr<'a>(&self, arena: &'a Arena, atom: FixedAtom) -> Option<&'a [u8]> {
        let info = self.info(arena)?;
        let offset = self.offset(arena, info, atom.raw())?;
        arena.bytes(offset, info.atom_size() as usize)
    }

    pub fn addr_mut<'a>(&self, arena: &'a mut Arena, atom: FixedAtom) -> Option<&'a mut [u8]> {
        let info = *self.info(arena)?;
        let offset = self.offset(arena, &info, atom.raw())?;
        arena.bytes_mut(offset, info.atom_size() as usize)
    }

    /// True when `atom` sits in a realized page and its slot does not hold a
    /// free link. A live atom whose bytes 4..8 equal the free tag reads as free.
    pub fn is_allocated(&self, arena: &Arena, atom: FixedAtom) -> bool {
        let Some(info) = self.info(arena) else {
            return false;
        };
        self.link(arena, info, atom.raw())
            .is_some_and(|link| !link.is_free())
    }

    /// Element `n` of the paged array, realizing its page (zero-filled) on
    /// first touch. Element 0 does not exist.
    pub fn element<'a>(&self, arena: &'a mut Arena, n: u32) -> Option<&'a mut [u8]> {
        let info = *self.info(arena)?;
        if n == 0 || n >= info.max_atoms() {
            return None;
        }

        let page = n >> info.shift();
        if info.page_table().get(arena, page).is_null() {
            let base = self.realize(arena, &info, page)?;
            arena.bytes_mut(base, info.page_bytes())?.fill(0);
        }

        let offset = self.offset(arena, &info, n)?;
        arena.bytes_mut(offset, info.atom_size() as usize)
    }

    /// Element `n`, only if its page already exists.
    pub fn element_if_exists<'a>(&self, arena: &'a Arena, n: u32) -> Option<&'a [u8]> {
        self.addr(arena, FixedAtom::new(n))
    }

    pub fn dump(&self, arena: &Arena) {
        let Some(info) = self.info(arena) else {
            tracing::debug!(name = %self.name, "fixed pool dump: info unreadable");
            return;
        };

        tracing::debug!(
            name = %self.name,
            shift = info.shift(),
            flags = info.flags(),
            atom_size = info.atom_size(),
            max_atoms = info.max_atoms(),
            free = info.free(),
            table = info.table(),
            pages = info.pages(),
            realized = info.page_table().realized(arena),
            "fixed pool dump"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::{Diagnostic, DiagnosticKind};
    use crate::Config;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn recording_arena() -> (Arena, Arc<Mutex<Vec<Diagnostic>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let arena = Arena::builder()
            .diagnostics(move |d| sink.lock().push(d.clone()))
            .open()
            .unwrap();
        (arena, seen)
    }

    #[test]
    fn open_rounds_parameters() {
        let mut arena = Arena::anonymous().unwrap();
        let pool = FixedPool::open(&mut arena, "nodes", 4, 5, 20).unwrap();

        assert_eq!(pool.atom_size(&arena), 8);
        assert_eq!(pool.max_atoms(&arena), 32);
        assert_eq!(pool.shift(&arena), 4);
    }

    #[test]
    fn alloc_hands_out_sequential_atoms() {
        let mut arena = Arena::anonymous().unwrap();
        let pool = FixedPool::open(&mut arena, "nodes", 2, 16, 64).unwrap();

        let atoms: Vec<u32> = (0..6).map(|_| pool.alloc(&mut arena).raw()).collect();

        assert_eq!(atoms, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn threaded_slots_are_not_allocated() {
        let mut arena = Arena::anonymous().unwrap();
        let pool = FixedPool::open(&mut arena, "nodes", 3, 16, 64).unwrap();

        assert!(!pool.is_allocated(&arena, FixedAtom::new(1)));
        let a = pool.alloc(&mut arena);

        assert!(pool.is_allocated(&arena, a));
        assert!(!pool.is_allocated(&arena, FixedAtom::new(a.raw() + 1)));
        assert!(!pool.is_allocated(&arena, FixedAtom::new(40)));
        assert!(!pool.is_allocated(&arena, FixedAtom::NULL));

        pool.free(&mut arena, a);
        assert!(!pool.is_allocated(&arena, a));
    }

    #[test]
    fn free_is_lifo() {
        let mut arena = Arena::anonymous().unwrap();
        let pool = FixedPool::open(&mut arena, "nodes", 3, 16, 64).unwrap();
        let a = pool.alloc(&mut arena);
        let b = pool.alloc(&mut arena);

        pool.free(&mut arena, a);
        pool.free(&mut arena, b);

        assert_eq!(pool.alloc(&mut arena), b);
        assert_eq!(pool.alloc(&mut arena), a);
    }

    #[test]
    fn alloc_stops_at_capacity() {
        let (mut arena, seen) = recording_arena();
        let pool = FixedPool::open(&mut arena, "tiny", 2, 8, 8).unwrap();

        let live: Vec<FixedAtom> = (0..7).map(|_| pool.alloc(&mut arena)).collect();

        assert!(live.iter().all(|a| !a.is_null()));
        assert!(pool.alloc(&mut arena).is_null());
        assert_eq!(seen.lock()[0].kind, DiagnosticKind::Exhausted);
    }

    #[test]
    fn live_atoms_never_share_bytes() {
        let mut arena = Arena::anonymous().unwrap();
        let pool = FixedPool::open(&mut arena, "slots", 3, 24, 256).unwrap();

        let atoms: Vec<FixedAtom> = (0..40).map(|_| pool.alloc(&mut arena)).collect();
        for (i, &atom) in atoms.iter().enumerate() {
            pool.addr_mut(&mut arena, atom).unwrap().fill(i as u8);
        }

        for (i, &atom) in atoms.iter().enumerate() {
            assert!(pool.addr(&arena, atom).unwrap().iter().all(|&b| b == i as u8));
        }
        let unique: HashSet<_> = atoms.iter().collect();
        assert_eq!(unique.len(), atoms.len());
    }

    #[test]
    fn double_free_is_ignored() {
        let (mut arena, seen) = recording_arena();
        let pool = FixedPool::open(&mut arena, "nodes", 3, 16, 64).unwrap();
        let a = pool.alloc(&mut arena);
        let b = pool.alloc(&mut arena);

        pool.free(&mut arena, a);
        pool.free(&mut arena, a);

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(pool.alloc(&mut arena), a);
        assert_ne!(pool.alloc(&mut arena), a);
        assert_ne!(a, b);
    }

    #[test]
    fn init_zero_clears_reused_atoms() {
        let mut arena = Arena::anonymous().unwrap();
        let pool = FixedPool::open(&mut arena, "zeroed", 3, 32, 64).unwrap();
        pool.set_flags(&mut arena, FIXED_INIT_ZERO);
        assert!(pool.test_flags(&arena, FIXED_INIT_ZERO));

        let a = pool.alloc(&mut arena);
        pool.addr_mut(&mut arena, a).unwrap().fill(0xEE);
        pool.free(&mut arena, a);
        let b = pool.alloc(&mut arena);

        assert_eq!(a, b);
        assert!(pool.addr(&arena, b).unwrap().iter().all(|&x| x == 0));

        pool.clear_flags(&mut arena, FIXED_INIT_ZERO);
        assert!(!pool.test_flags(&arena, FIXED_INIT_ZERO));
    }

    #[test]
    fn element_realizes_pages_lazily() {
        let mut arena = Arena::anonymous().unwrap();
        let pool = FixedPool::open(&mut arena, "array", 4, 8, 1024).unwrap();

        assert!(pool.element_if_exists(&arena, 100).is_none());
        pool.element(&mut arena, 100).unwrap()[0] = 42;

        assert_eq!(pool.element_if_exists(&arena, 100).unwrap()[0], 42);
        assert_eq!(pool.element_if_exists(&arena, 101).unwrap()[0], 0);
        assert!(pool.element_if_exists(&arena, 500).is_none());
        assert!(pool.element(&mut arena, 0).is_none());
        assert!(pool.element(&mut arena, 1024).is_none());
    }

    #[test]
    fn config_overrides_parameters() {
        let mut config = Config::new();
        config.set("nodes.shift", "5").set("nodes.atom-size", "4").set("nodes.max-atoms", "1<<10");
        let mut arena = Arena::builder().config(config).open().unwrap();

        let pool = FixedPool::open(&mut arena, "nodes", 2, 16, 64).unwrap();

        assert_eq!(pool.shift(&arena), 5);
        assert_eq!(pool.atom_size(&arena), 16);
        assert_eq!(pool.max_atoms(&arena), 1024);
    }

    #[test]
    fn reopen_keeps_chain_and_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixed.pdb");

        let (a, b) = {
            let mut arena = Arena::open(&path).unwrap();
            let pool = FixedPool::open(&mut arena, "nodes", 3, 16, 64).unwrap();
            let a = pool.alloc(&mut arena);
            let b = pool.alloc(&mut arena);
            pool.addr_mut(&mut arena, a).unwrap()[..3].copy_from_slice(b"abc");
            pool.free(&mut arena, b);
            (a, b)
        };

        let mut arena = Arena::open(&path).unwrap();
        let pool = FixedPool::open(&mut arena, "nodes", 0, 0, 0).unwrap();

        assert_eq!(pool.atom_size(&arena), 16);
        assert_eq!(&pool.addr(&arena, a).unwrap()[..3], b"abc");
        assert_eq!(pool.alloc(&mut arena), b);
    }
}
