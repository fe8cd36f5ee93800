//! # Immutable String Pool
//!
//! Append-only string interning. Strings are never freed individually; the
//! pool lives as long as its arena.
//!
//! ## Two Layers
//!
//! ```text
//! IstrAtom ──> index pool (FixedPool "<name>.index") ──> IstrDataAtom
//!                                                          │
//!                      data area (own page table) <────────┘
//! ```
//!
//! Callers only ever hold index atoms. The index slot stores the physical
//! data atom, so records could later move without changing identities.
//! Atoms 1..=257 are reserved for the empty string and one-byte strings,
//! which need no storage at all (see `short`).
//!
//! ## Record Format
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  -------------------------
//! 0       4     byte length (little-endian)
//! 4       len   bytes
//! 4+len   1     NUL
//! ```
//!
//! A record takes `ceil((4 + len + 1) / atom_size)` data atoms. Records are
//! bump-allocated from the remainder of the current data page. When that
//! runs short a new page is started at the next empty page table entry and
//! its leftover becomes the new remainder. A record longer than a page gets a
//! block of several pages of its own, registered under a single entry.
//!
//! Interning the same bytes twice yields two atoms. Deduplication belongs to
//! an index on top, typically a patricia trie keyed by these strings.
//!
//! ## Persistent Info (48 bytes, named header of type `Istr`)
//!
//! ```text
//! 0    24   FixedInfo of the index pool
//! 24   24   DataInfo: shift, atom_shift, max_atoms, free, left, table, pages
//! ```

mod short;

pub use short::{is_short, short_atom, short_string, EMPTY_STRING};

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::atom::{ArenaAtom, FixedAtom, IstrAtom, IstrDataAtom, PatDataAtom};
use crate::config::{
    Config, ARENA_ATOM_SHIFT, ARENA_ATOM_SIZE, ISTR_INDEX_MAX_ATOMS, ISTR_INDEX_SHIFT,
    ISTR_LEN_PREFIX, ISTR_SHORT_MAX,
};
use crate::fixed::{FixedPool, PageTable, FIXED_INFO_SIZE};
use crate::patricia::KeySource;
use crate::storage::{Arena, HeaderType};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DataInfo {
    shift: u8,
    atom_shift: u8,
    reserved: U16,
    max_atoms: U32,
    free: U32,
    left: U32,
    table: U32,
    pages: U32,
}

const DATA_INFO_SIZE: usize = 24;
const _: () = assert!(std::mem::size_of::<DataInfo>() == DATA_INFO_SIZE);

const ISTR_INFO_SIZE: usize = FIXED_INFO_SIZE + DATA_INFO_SIZE;

impl DataInfo {
    zerocopy_accessors! {
        shift: u8,
        atom_shift: u8,
        max_atoms: u32,
        free: u32,
        left: u32,
        table: u32,
        pages: u32,
    }

    fn page_table(&self) -> PageTable {
        PageTable::new(ArenaAtom::new(self.table()), self.pages())
    }

    fn atoms_per_page(&self) -> u32 {
        1 << self.shift
    }

    fn page_bytes(&self) -> usize {
        (self.atoms_per_page() as usize) << self.atom_shift
    }

    fn atoms_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(1 << self.atom_shift)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringPool {
    name: String,
    data: usize,
    index: FixedPool,
}

impl StringPool {
    /// Opens or creates the pool `name`. `shift`, `atom_shift` and
    /// `max_atoms` size the data area and may be overridden under
    /// `<name>.data`; the index pool reads `<name>.index`.
    pub fn open(
        arena: &mut Arena,
        name: &str,
        shift: u32,
        atom_shift: u32,
        max_atoms: u32,
    ) -> Result<Self> {
        let slot = arena
            .named_header(name, HeaderType::Istr, ISTR_INFO_SIZE)
            .ok_or_else(|| eyre::eyre!("string pool header '{}' is unavailable", name))?;

        let index = FixedPool::setup(
            arena,
            &Config::name(name, "index"),
            slot.offset(),
            ISTR_INDEX_SHIFT,
            4,
            ISTR_INDEX_MAX_ATOMS,
        )?;

        let pool = Self {
            name: name.to_string(),
            data: slot.offset() + FIXED_INFO_SIZE,
            index,
        };

        let existing = *pool
            .info(arena)
            .ok_or_else(|| eyre::eyre!("string pool '{}' info is out of range", name))?;
        if existing.table() != 0 {
            pool.validate(arena, &existing)?;
            return Ok(pool);
        }

        pool.init_data(arena, shift, atom_shift, max_atoms)?;
        Ok(pool)
    }

    fn init_data(&self, arena: &mut Arena, shift: u32, atom_shift: u32, max_atoms: u32) -> Result<()> {
        let base = Config::name(&self.name, "data");
        let config = arena.config();
        let mut shift = config.value32(&base, "shift", shift);
        let atom_shift = config.value32(&base, "atom-shift", atom_shift);
        let max_atoms = config.value32(&base, "max-atoms", max_atoms);

        ensure!(
            atom_shift <= ARENA_ATOM_SHIFT,
            "string pool '{}' atom shift {} exceeds a page",
            self.name,
            atom_shift
        );
        // Data pages are whole arena pages.
        shift = shift.max(ARENA_ATOM_SHIFT - atom_shift);
        ensure!(
            shift + atom_shift <= 24,
            "string pool '{}' data page of 2^{} bytes is too large",
            self.name,
            shift + atom_shift
        );

        let max_atoms = max_atoms
            .max(1 << shift)
            .checked_next_multiple_of(1 << shift)
            .ok_or_else(|| eyre::eyre!("string pool '{}' max atoms overflow", self.name))?;
        let pages = max_atoms >> shift;

        let table = PageTable::create(arena, pages).ok_or_else(|| {
            eyre::eyre!("could not allocate page table for string pool '{}'", self.name)
        })?;

        let info = self
            .info_mut(arena)
            .ok_or_else(|| eyre::eyre!("arena is read-only, cannot create string pool '{}'", self.name))?;
        info.set_shift(shift as u8);
        info.set_atom_shift(atom_shift as u8);
        info.set_max_atoms(max_atoms);
        info.set_free(0);
        info.set_left(0);
        info.set_table(table.table().raw());
        info.set_pages(pages);

        tracing::debug!(name = %self.name, shift, atom_shift, max_atoms, "created string pool");
        Ok(())
    }

    fn validate(&self, arena: &Arena, info: &DataInfo) -> Result<()> {
        let ok = info.atom_shift() as u32 <= ARENA_ATOM_SHIFT
            && info.pages() == info.max_atoms() >> info.shift()
            && info.free() as u64 + info.left() as u64 <= info.max_atoms() as u64
            && info.page_table().is_valid(arena);

        if !ok {
            let msg = format!("string pool '{}' data info is corrupt: {:?}", self.name, info);
            arena.diagnostics().format(msg.clone());
            eyre::bail!(msg);
        }
        Ok(())
    }

    fn info<'a>(&self, arena: &'a Arena) -> Option<&'a DataInfo> {
        DataInfo::ref_from_bytes(arena.bytes(self.data, DATA_INFO_SIZE)?).ok()
    }

    fn info_mut<'a>(&self, arena: &'a mut Arena) -> Option<&'a mut DataInfo> {
        DataInfo::mut_from_bytes(arena.bytes_mut(self.data, DATA_INFO_SIZE)?).ok()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &FixedPool {
        &self.index
    }

    fn data_offset(&self, arena: &Arena, info: &DataInfo, atom: IstrDataAtom) -> Option<usize> {
        let raw = atom.raw();
        if atom.is_null() || raw >= info.max_atoms() {
            return None;
        }
        let page = info.page_table().get(arena, raw >> info.shift());
        if page.is_null() {
            return None;
        }
        let slot = (raw & (info.atoms_per_page() - 1)) as usize;
        Some(page.raw() as usize * ARENA_ATOM_SIZE + (slot << info.atom_shift()))
    }

    /// Interns `bytes` and returns its index atom.
    pub fn intern(&self, arena: &mut Arena, bytes: &[u8]) -> IstrAtom {
        if let Some(atom) = short_atom(bytes) {
            return atom;
        }

        if arena.is_read_only() {
            arena
                .diagnostics()
                .logic(format!("string pool '{}': intern on a read-only arena", self.name));
            return IstrAtom::NULL;
        }

        let Ok(len) = u32::try_from(bytes.len()) else {
            arena
                .diagnostics()
                .logic(format!("string pool '{}': string of {} bytes is too long", self.name, bytes.len()));
            return IstrAtom::NULL;
        };

        let Some(data) = self.place(arena, bytes.len()) else {
            return IstrAtom::NULL;
        };

        let Some(info) = self.info(arena).copied() else {
            return IstrAtom::NULL;
        };
        let Some(offset) = self.data_offset(arena, &info, data) else {
            return IstrAtom::NULL;
        };
        let Some(record) = arena.bytes_mut(offset, ISTR_LEN_PREFIX + bytes.len() + 1) else {
            return IstrAtom::NULL;
        };
        record[..ISTR_LEN_PREFIX].copy_from_slice(U32::new(len).as_bytes());
        record[ISTR_LEN_PREFIX..ISTR_LEN_PREFIX + bytes.len()].copy_from_slice(bytes);
        record[ISTR_LEN_PREFIX + bytes.len()] = 0;

        let slot = self.index.alloc(arena);
        if slot.is_null() {
            return IstrAtom::NULL;
        }
        if let Some(entry) = self.index.addr_mut(arena, slot) {
            entry[..4].copy_from_slice(U32::new(data.raw()).as_bytes());
        }

        IstrAtom::new(slot.raw() + ISTR_SHORT_MAX)
    }

    pub fn intern_str(&self, arena: &mut Arena, s: &str) -> IstrAtom {
        self.intern(arena, s.as_bytes())
    }

    /// Reserves data atoms for a record of `len` bytes.
    fn place(&self, arena: &mut Arena, len: usize) -> Option<IstrDataAtom> {
        let info = *self.info(arena)?;
        let record = ISTR_LEN_PREFIX + len + 1;
        let needed = info.atoms_for(record);

        if needed <= info.left() as usize {
            let atom = info.free();
            let info = self.info_mut(arena)?;
            info.set_free(atom + needed as u32);
            info.set_left(info.left() - needed as u32);
            return Some(IstrDataAtom::new(atom));
        }

        let table = info.page_table();
        let Some(page) = table.next_empty(arena, 1) else {
            arena
                .diagnostics()
                .exhausted(format!("string pool '{}' is out of data pages", self.name));
            return None;
        };

        let size = record.next_multiple_of(info.page_bytes());
        let block = arena.alloc(size);
        if block.is_null() {
            return None;
        }
        table.set(arena, page, block);

        let first = page << info.shift();
        let per_page = info.atoms_per_page() as usize;
        if size == info.page_bytes() && needed < per_page {
            let info = self.info_mut(arena)?;
            info.set_free(first + needed as u32);
            info.set_left((per_page - needed) as u32);
        }

        Some(IstrDataAtom::new(first))
    }

    /// Physical location of an interned string's record.
    pub fn data_atom(&self, arena: &Arena, atom: IstrAtom) -> Option<IstrDataAtom> {
        if atom.raw() <= ISTR_SHORT_MAX {
            return None;
        }
        let slot = FixedAtom::new(atom.raw() - ISTR_SHORT_MAX);
        if !self.index.is_allocated(arena, slot) {
            return None;
        }
        let entry = self.index.addr(arena, slot)?;
        let data = U32::read_from_bytes(&entry[..4]).ok()?.get();
        IstrDataAtom::new(data).non_null()
    }

    /// The interned bytes followed by their NUL.
    pub fn resolve_nul<'a>(&self, arena: &'a Arena, atom: IstrAtom) -> Option<&'a [u8]> {
        if atom.is_null() {
            return None;
        }
        if let Some(short) = short_string(atom) {
            return Some(short);
        }

        let info = self.info(arena)?;
        let data = self.data_atom(arena, atom)?;
        let offset = self.data_offset(arena, info, data)?;
        let len = U32::read_from_bytes(arena.bytes(offset, ISTR_LEN_PREFIX)?).ok()?.get() as usize;
        arena.bytes(offset + ISTR_LEN_PREFIX, len + 1)
    }

    pub fn resolve<'a>(&self, arena: &'a Arena, atom: IstrAtom) -> Option<&'a [u8]> {
        self.resolve_nul(arena, atom)
            .map(|bytes| &bytes[..bytes.len() - 1])
    }

    pub fn dump(&self, arena: &Arena) {
        let Some(info) = self.info(arena) else {
            tracing::debug!(name = %self.name, "string pool dump: info unreadable");
            return;
        };

        tracing::debug!(
            name = %self.name,
            shift = info.shift(),
            atom_shift = info.atom_shift(),
            max_atoms = info.max_atoms(),
            free = info.free(),
            left = info.left(),
            table = info.table(),
            pages = info.page_table().realized(arena),
            "string pool dump"
        );
        self.index.dump(arena);
    }
}

impl KeySource for StringPool {
    fn key<'a>(&self, arena: &'a Arena, data: PatDataAtom) -> Option<&'a [u8]> {
        self.resolve_nul(arena, IstrAtom::new(data.raw()))
    }
}
