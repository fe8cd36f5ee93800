//! # Arena
//!
//! The arena is one growable memory-mapped region, file-backed or anonymous,
//! carved into 4 KiB atoms. Every pool in the crate allocates its pages here.
//!
//! ## Layout
//!
//! ```text
//! atom 0      arena header + named headers (see headers.rs)
//! atom 1..    allocated ranges and free blocks
//! ```
//!
//! Atom 0 is never handed out, which is what makes `ArenaAtom::NULL` safe.
//!
//! ## Allocation
//!
//! `alloc` takes the tightest fitting free block (the free list is sorted by
//! size) and splits from its tail. When nothing fits the region grows by
//! `max(request rounded to 32 atoms, current size)`, falling back to smaller
//! steps when a configured `max-size` would be exceeded. The first atoms of
//! the new space satisfy the request and the rest goes on the free list.
//!
//! ## Addressing
//!
//! Atoms are offsets from the region base. Growth may relocate the mapping,
//! so every byte slice handed out borrows the arena and cannot outlive the
//! next `alloc`:
//!
//! ```text
//! addr(&self, ..) -> Option<&[u8]>
//! alloc(&mut self, ..)             // exclusive, ends every outstanding borrow
//! ```
//!
//! ## Errors
//!
//! - `open` returns `eyre::Result`; OS and format failures are also reported
//!   through the diagnostic hook.
//! - `alloc` returns `ArenaAtom::NULL` on exhaustion.
//! - Misuse (double free, out-of-range free, writes to a read-only arena) is
//!   reported and ignored.
//!
//! ## Usage
//!
//! ```ignore
//! let mut arena = Arena::builder()
//!     .path("/var/db/strings.pdb")
//!     .max_size(1 << 30)
//!     .open()?;
//!
//! let atom = arena.alloc(10_000);
//! arena.addr_mut(atom, 10_000).unwrap().fill(0xFF);
//! arena.free(atom, 10_000);
//! ```

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Result, WrapErr};
use zerocopy::IntoBytes;

use super::freelist::{self, FreeList, FREE_BLOCK_SIZE};
use super::headers::{ArenaHeader, HeaderType, NamedHeader};
use super::region::Region;
use super::registry::AddressRegistry;
use crate::atom::ArenaAtom;
use crate::config::{
    Config, ARENA_ATOM_SHIFT, ARENA_ATOM_SIZE, ARENA_DEFAULT_ATOMS, ARENA_HEADER_SIZE,
    DEFAULT_FILE_MODE, NAMED_HEADER_ALIGN, NAMED_HEADER_PREFIX_SIZE,
};
use crate::diag::{Diagnostic, Diagnostics};

const DEFAULT_CONFIG_NAME: &str = "arena";

/// Location of a named header's content inside page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderSlot {
    offset: usize,
    size: usize,
    kind: HeaderType,
    created: bool,
}

impl HeaderSlot {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn kind(&self) -> HeaderType {
        self.kind
    }

    /// True when this call appended the header, so its content is zeroed.
    pub fn created(&self) -> bool {
        self.created
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
    pub name: String,
    pub kind: HeaderType,
    pub flags: u16,
    pub size: u32,
}

pub struct ArenaBuilder {
    path: Option<PathBuf>,
    name: String,
    read_only: bool,
    mode: Option<u32>,
    initial_size: Option<usize>,
    max_size: Option<usize>,
    config: Config,
    registry: Option<Arc<AddressRegistry>>,
    diagnostics: Diagnostics,
}

impl ArenaBuilder {
    pub fn new() -> Self {
        Self {
            path: None,
            name: DEFAULT_CONFIG_NAME.to_string(),
            read_only: false,
            mode: None,
            initial_size: None,
            max_size: None,
            config: Config::new(),
            registry: None,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Backs the arena with a file. Without a path the arena is anonymous.
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Base name for `size`, `max-size` and `perm` config lookups.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Size of a newly created arena, in bytes.
    pub fn initial_size(mut self, bytes: usize) -> Self {
        self.initial_size = Some(bytes);
        self
    }

    /// Growth cap of a newly created arena, in bytes.
    pub fn max_size(mut self, bytes: usize) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: Arc<AddressRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn diagnostics<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        self.diagnostics = Diagnostics::with_hook(Arc::new(hook));
        self
    }

    pub fn open(self) -> Result<Arena> {
        let registry = self.registry.clone().unwrap_or_else(AddressRegistry::global);

        let initial_atoms = {
            let bytes = self.initial_size.unwrap_or_else(|| {
                self.config.value32(
                    &self.name,
                    "size",
                    ARENA_DEFAULT_ATOMS << ARENA_ATOM_SHIFT,
                ) as usize
            });
            (bytes.div_ceil(ARENA_ATOM_SIZE)).max(2)
        };
        let max_atoms = {
            let bytes = self
                .max_size
                .unwrap_or_else(|| self.config.value32(&self.name, "max-size", 0) as usize);
            (bytes >> ARENA_ATOM_SHIFT).min(u32::MAX as usize) as u32
        };

        let (region, created) = match &self.path {
            None => {
                let len = initial_atoms << ARENA_ATOM_SHIFT;
                let region = Region::map(None, len, true, registry).map_err(|e| {
                    self.os_failure("failed to map anonymous arena", e)
                })?;
                (region, true)
            }
            Some(path) => self.map_file(path, initial_atoms, registry)?,
        };

        let mut arena = Arena {
            region,
            path: self.path.clone(),
            read_only: self.read_only,
            config: self.config,
            diagnostics: self.diagnostics,
        };

        if created {
            arena.initialize(max_atoms)?;
        } else {
            arena.validate()?;
        }

        tracing::debug!(
            path = ?arena.path,
            len = arena.len(),
            created,
            read_only = arena.read_only,
            "opened arena"
        );

        Ok(arena)
    }

    fn map_file(
        &self,
        path: &Path,
        initial_atoms: usize,
        registry: Arc<AddressRegistry>,
    ) -> Result<(Region, bool)> {
        let mode = self
            .mode
            .unwrap_or_else(|| self.config.value32(&self.name, "perm", DEFAULT_FILE_MODE));

        let (file, created) = match OpenOptions::new()
            .read(true)
            .write(!self.read_only)
            .open(path)
        {
            Ok(file) => (file, false),
            Err(e) if e.kind() == io::ErrorKind::NotFound && !self.read_only => {
                let file = self.create_file(path, mode, initial_atoms)?;
                (file, true)
            }
            Err(e) => {
                return Err(self.os_failure(
                    format!("could not open arena file '{}'", path.display()),
                    e,
                ))
            }
        };

        let len = file
            .metadata()
            .map_err(|e| self.os_failure(format!("could not stat '{}'", path.display()), e))?
            .len() as usize;

        if len == 0 || len % ARENA_ATOM_SIZE != 0 {
            let msg = format!(
                "arena file '{}' length {} is not a non-zero multiple of {}",
                path.display(),
                len,
                ARENA_ATOM_SIZE
            );
            self.diagnostics.format(msg.clone());
            return Err(eyre::eyre!(msg));
        }

        let region = Region::map(Some(file), len, !self.read_only, registry).map_err(|e| {
            self.os_failure(format!("failed to memory-map '{}'", path.display()), e)
        })?;

        Ok((region, created))
    }

    fn create_file(&self, path: &Path, mode: u32, atoms: usize) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(path)
            .map_err(|e| {
                self.os_failure(format!("could not create arena file '{}'", path.display()), e)
            })?;

        let len = (atoms << ARENA_ATOM_SHIFT) as u64;
        file.set_len(len).map_err(|e| {
            self.os_failure(format!("could not extend '{}' to {} bytes", path.display(), len), e)
        })?;

        Ok(file)
    }

    fn os_failure(&self, msg: impl Into<String>, err: io::Error) -> eyre::Report {
        let msg = msg.into();
        self.diagnostics.report_os(msg.clone(), &err);
        eyre::Report::new(err).wrap_err(msg)
    }
}

impl Default for ArenaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Arena {
    region: Region,
    path: Option<PathBuf>,
    read_only: bool,
    config: Config,
    diagnostics: Diagnostics,
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("path", &self.path)
            .field("len", &self.region.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl Arena {
    pub fn builder() -> ArenaBuilder {
        ArenaBuilder::new()
    }

    pub fn anonymous() -> Result<Self> {
        ArenaBuilder::new().open()
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        ArenaBuilder::new().path(path).open()
    }

    fn initialize(&mut self, max_atoms: u32) -> Result<()> {
        let len = self.region.len();
        let mem = self.region.as_mut_slice();
        mem[..ARENA_HEADER_SIZE].copy_from_slice(ArenaHeader::new(len as u64, max_atoms).as_bytes());

        let atoms = (len >> ARENA_ATOM_SHIFT) as u32;
        FreeList::new(mem)
            .insert(1, atoms - 1)
            .wrap_err("failed to seed the arena free list")
    }

    fn validate(&self) -> Result<()> {
        let header = match ArenaHeader::from_bytes(self.region.as_slice()) {
            Ok(h) => h,
            Err(e) => {
                self.diagnostics.format(format!("{:#}", e));
                return Err(e.wrap_err(format!("invalid arena header in {:?}", self.path)));
            }
        };

        if header.len() != self.region.len() as u64 {
            let msg = format!(
                "arena length mismatch: header records {} bytes, file has {}",
                header.len(),
                self.region.len()
            );
            self.diagnostics.format(msg.clone());
            return Err(eyre::eyre!(msg));
        }

        Ok(())
    }

    fn header(&self) -> Option<&ArenaHeader> {
        ArenaHeader::from_bytes(self.region.as_slice()).ok()
    }

    fn header_mut(&mut self) -> Option<&mut ArenaHeader> {
        ArenaHeader::from_bytes_mut(self.region.as_mut_slice()).ok()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    pub fn atoms(&self) -> u32 {
        (self.region.len() >> ARENA_ATOM_SHIFT) as u32
    }

    /// Growth cap in atoms; zero means unlimited.
    pub fn max_atoms(&self) -> u32 {
        self.header().map_or(0, |h| h.max_size())
    }

    pub fn free_blocks(&self) -> Vec<(ArenaAtom, u32)> {
        match freelist::walk(self.region.as_slice()) {
            Ok(blocks) => blocks
                .into_iter()
                .map(|(atom, size)| (ArenaAtom::new(atom), size))
                .collect(),
            Err(e) => {
                self.diagnostics.format(format!("{:#}", e));
                Vec::new()
            }
        }
    }

    pub fn free_atoms(&self) -> u64 {
        self.free_blocks().iter().map(|&(_, size)| size as u64).sum()
    }

    /// Allocates at least `size` bytes, rounded up to whole atoms.
    pub fn alloc(&mut self, size: usize) -> ArenaAtom {
        if self.read_only {
            self.diagnostics.logic("alloc on a read-only arena");
            return ArenaAtom::NULL;
        }

        if size == 0 {
            self.diagnostics.logic("arena alloc called with zero size");
            return ArenaAtom::NULL;
        }

        let count = size.div_ceil(ARENA_ATOM_SIZE);
        let Ok(count) = u32::try_from(count) else {
            self.diagnostics.exhausted(format!("arena alloc of {} bytes is too large", size));
            return ArenaAtom::NULL;
        };

        match FreeList::new(self.region.as_mut_slice()).take(count) {
            Ok(Some(atom)) => return self.hand_out(atom),
            Ok(None) => {}
            Err(e) => {
                self.diagnostics.format(format!("{:#}", e));
                return ArenaAtom::NULL;
            }
        }

        let Some((first, added)) = self.grow_for(count) else {
            return ArenaAtom::NULL;
        };

        if added > count {
            if let Err(e) = FreeList::new(self.region.as_mut_slice()).insert(first + count, added - count) {
                self.diagnostics.format(format!("{:#}", e));
            }
        }

        self.hand_out(first)
    }

    fn hand_out(&mut self, atom: u32) -> ArenaAtom {
        let offset = (atom as usize) << ARENA_ATOM_SHIFT;
        self.region.as_mut_slice()[offset..offset + FREE_BLOCK_SIZE].fill(0);
        ArenaAtom::new(atom)
    }

    /// Extends the region for a request of `count` atoms. Returns the first
    /// new atom and the number of atoms added.
    fn grow_for(&mut self, count: u32) -> Option<(u32, u32)> {
        let current = self.atoms();
        let quantum = count.div_ceil(ARENA_DEFAULT_ATOMS).saturating_mul(ARENA_DEFAULT_ATOMS);
        let geometric = quantum.max(current);
        let cap = match self.max_atoms() {
            0 => u32::MAX as u64,
            max => max as u64,
        };

        let added = [geometric, quantum, count]
            .into_iter()
            .find(|&step| current as u64 + step as u64 <= cap);

        let Some(added) = added else {
            self.diagnostics.exhausted(format!(
                "arena max size reached: {} atoms in use, {} requested, cap {}",
                current, count, cap
            ));
            return None;
        };

        let new_len = ((current + added) as usize) << ARENA_ATOM_SHIFT;
        if let Err(e) = self.region.grow(new_len) {
            self.diagnostics
                .report_os(format!("could not grow arena to {} bytes", new_len), &e);
            return None;
        }

        if let Some(header) = self.header_mut() {
            header.set_len(new_len as u64);
        }

        tracing::debug!(from = current, to = current + added, "grew arena");
        Some((current, added))
    }

    /// Returns `size` bytes starting at `atom` to the free list.
    pub fn free(&mut self, atom: ArenaAtom, size: usize) {
        if self.read_only {
            self.diagnostics.logic("free on a read-only arena");
            return;
        }

        if atom.is_null() {
            self.diagnostics.logic("arena free called with the null atom");
            return;
        }

        let count = size.div_ceil(ARENA_ATOM_SIZE) as u64;
        if count == 0 || atom.raw() as u64 + count > self.atoms() as u64 {
            self.diagnostics.logic(format!(
                "arena free of {} outside the arena ({} bytes, arena has {} atoms)",
                atom,
                size,
                self.atoms()
            ));
            return;
        }

        let mut list = FreeList::new(self.region.as_mut_slice());
        match list.overlaps(atom.raw(), count as u32) {
            Ok(true) => {
                self.diagnostics
                    .logic(format!("double free of {} ({} atoms)", atom, count));
            }
            Ok(false) => {
                if let Err(e) = list.insert(atom.raw(), count as u32) {
                    self.diagnostics.format(format!("{:#}", e));
                }
            }
            Err(e) => self.diagnostics.format(format!("{:#}", e)),
        }
    }

    /// `len` bytes starting at `atom`.
    pub fn addr(&self, atom: ArenaAtom, len: usize) -> Option<&[u8]> {
        if atom.is_null() {
            return None;
        }
        self.bytes(atom.raw() as usize * ARENA_ATOM_SIZE, len)
    }

    pub fn addr_mut(&mut self, atom: ArenaAtom, len: usize) -> Option<&mut [u8]> {
        if atom.is_null() {
            return None;
        }
        self.bytes_mut(atom.raw() as usize * ARENA_ATOM_SIZE, len)
    }

    /// Raw byte range of the region, used by the pools.
    pub fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.region.as_slice().get(offset..end)
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> Option<&mut [u8]> {
        if self.read_only {
            return None;
        }
        let end = offset.checked_add(len)?;
        self.region.as_mut_slice().get_mut(offset..end)
    }

    /// Finds the named header, creating it with `size` bytes of zeroed
    /// content if absent. A `size` of zero only looks it up.
    pub fn named_header(&mut self, name: &str, kind: HeaderType, size: usize) -> Option<HeaderSlot> {
        let (found, end) = self.scan_headers(name);

        if let Some(slot) = found {
            if kind != HeaderType::Unknown && slot.kind != kind {
                self.diagnostics.format(format!(
                    "header '{}' has type {} (expected {})",
                    name,
                    slot.kind.as_str(),
                    kind.as_str()
                ));
                return None;
            }
            if slot.size < size {
                self.diagnostics.format(format!(
                    "header '{}' holds {} bytes, {} requested",
                    name, slot.size, size
                ));
                return None;
            }
            return Some(slot);
        }

        if size == 0 {
            return None;
        }

        if self.read_only {
            self.diagnostics
                .logic(format!("cannot add header '{}' to a read-only arena", name));
            return None;
        }

        let size = size.next_multiple_of(NAMED_HEADER_ALIGN);
        let content = end + NAMED_HEADER_PREFIX_SIZE;
        if content + size > ARENA_ATOM_SIZE {
            self.diagnostics
                .exhausted(format!("out of header space for '{}' ({} bytes)", name, size));
            return None;
        }

        let prefix = match NamedHeader::new(name, kind, size as u32) {
            Ok(p) => p,
            Err(e) => {
                self.diagnostics.logic(format!("{:#}", e));
                return None;
            }
        };

        let mem = self.region.as_mut_slice();
        mem[end..content].copy_from_slice(prefix.as_bytes());
        mem[content..content + size].fill(0);

        let header = self.header_mut()?;
        header.set_num_headers(header.num_headers() + 1);

        tracing::debug!(name, kind = kind.as_str(), size, "added named header");

        Some(HeaderSlot {
            offset: content,
            size,
            kind,
            created: true,
        })
    }

    pub fn find_header(&self, name: &str) -> Option<HeaderSlot> {
        self.scan_headers(name).0
    }

    /// Returns the matching header (if any) and the offset just past the last
    /// header.
    fn scan_headers(&self, name: &str) -> (Option<HeaderSlot>, usize) {
        let mut offset = ARENA_HEADER_SIZE;
        let count = self.header().map_or(0, |h| h.num_headers());
        let page0 = &self.region.as_slice()[..ARENA_ATOM_SIZE.min(self.region.len())];

        for _ in 0..count {
            let Some(bytes) = page0.get(offset..) else { break };
            let Ok(prefix) = NamedHeader::from_bytes(bytes) else { break };
            let content = offset + NAMED_HEADER_PREFIX_SIZE;
            let size = prefix.size() as usize;

            if prefix.name_bytes() == name.as_bytes() {
                return (
                    Some(HeaderSlot {
                        offset: content,
                        size,
                        kind: prefix.kind(),
                        created: false,
                    }),
                    offset,
                );
            }

            offset = content + size;
        }

        (None, offset)
    }

    pub fn header_bytes(&self, slot: HeaderSlot) -> &[u8] {
        self.bytes(slot.offset, slot.size).unwrap_or(&[])
    }

    pub fn header_bytes_mut(&mut self, slot: HeaderSlot) -> &mut [u8] {
        self.bytes_mut(slot.offset, slot.size).unwrap_or(&mut [])
    }

    pub fn headers(&self) -> Vec<HeaderInfo> {
        let mut out = Vec::new();
        let mut offset = ARENA_HEADER_SIZE;
        let count = self.header().map_or(0, |h| h.num_headers());

        for _ in 0..count {
            let Some(bytes) = self.bytes(offset, NAMED_HEADER_PREFIX_SIZE) else { break };
            let Ok(prefix) = NamedHeader::from_bytes(bytes) else { break };
            out.push(HeaderInfo {
                name: prefix.name(),
                kind: prefix.kind(),
                flags: prefix.flags(),
                size: prefix.size(),
            });
            offset += NAMED_HEADER_PREFIX_SIZE + prefix.size() as usize;
        }

        out
    }

    pub fn sync(&self) -> Result<()> {
        self.region.sync().wrap_err_with(|| {
            format!("failed to sync arena {:?}", self.path)
        })
    }

    pub fn dump(&self) {
        let Some(header) = self.header() else {
            tracing::debug!("arena dump: header unreadable");
            return;
        };
        let (major, minor) = header.version();

        tracing::debug!(
            magic = format_args!("{:#06x}", header.magic()),
            version = format_args!("{}.{:03}", major, minor),
            max_size = header.max_size(),
            len = header.len(),
            free = header.free(),
            num_headers = header.num_headers(),
            base = format_args!("{:#x}", self.region.base_addr()),
            "arena dump"
        );

        for (i, h) in self.headers().iter().enumerate() {
            tracing::debug!(
                index = i,
                name = %h.name,
                kind = h.kind.as_str(),
                size = h.size,
                flags = h.flags,
                "arena header"
            );
        }

        for (atom, size) in self.free_blocks() {
            tracing::debug!(atom = atom.raw(), size, "arena free block");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticKind;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    fn registry() -> Arc<AddressRegistry> {
        Arc::new(AddressRegistry::new(
            0x3400_0000_0000,
            0x0000_4000_0000,
            0x3500_0000_0000,
        ))
    }

    fn anon() -> Arena {
        Arena::builder().registry(registry()).open().unwrap()
    }

    fn recording(builder: ArenaBuilder) -> (Arena, Arc<Mutex<Vec<Diagnostic>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let arena = builder
            .registry(registry())
            .diagnostics(move |d| sink.lock().push(d.clone()))
            .open()
            .unwrap();
        (arena, seen)
    }

    #[test]
    fn anonymous_arena_starts_with_one_free_block() {
        let arena = anon();

        assert_eq!(arena.len(), ARENA_DEFAULT_ATOMS as usize * ARENA_ATOM_SIZE);
        assert_eq!(
            arena.free_blocks(),
            vec![(ArenaAtom::new(1), ARENA_DEFAULT_ATOMS - 1)]
        );
    }

    #[test]
    fn alloc_splits_from_the_tail() {
        let mut arena = anon();

        let a = arena.alloc(100);
        let b = arena.alloc(ARENA_ATOM_SIZE * 2);

        assert_eq!(a, ArenaAtom::new(ARENA_DEFAULT_ATOMS - 1));
        assert_eq!(b, ArenaAtom::new(ARENA_DEFAULT_ATOMS - 3));
        assert_eq!(arena.free_atoms(), (ARENA_DEFAULT_ATOMS - 4) as u64);
    }

    #[test]
    fn alloc_zero_is_null_with_diagnostic() {
        let (mut arena, seen) = recording(Arena::builder());

        assert!(arena.alloc(0).is_null());
        assert_eq!(seen.lock()[0].kind, DiagnosticKind::Logic);
    }

    #[test]
    fn growth_is_geometric_and_keeps_data() {
        let mut arena = anon();
        let first = arena.alloc(ARENA_ATOM_SIZE);
        arena.addr_mut(first, 4).unwrap().copy_from_slice(b"keep");

        let big = arena.alloc(ARENA_ATOM_SIZE * 40);

        assert!(!big.is_null());
        assert_eq!(arena.atoms(), ARENA_DEFAULT_ATOMS + 64);
        assert_eq!(arena.addr(first, 4).unwrap(), b"keep");
        assert_eq!(big, ArenaAtom::new(ARENA_DEFAULT_ATOMS));
    }

    #[test]
    fn growth_respects_max_size() {
        let (mut arena, seen) = recording(
            Arena::builder().max_size(ARENA_ATOM_SIZE * (ARENA_DEFAULT_ATOMS as usize + 8)),
        );

        assert!(!arena.alloc(ARENA_ATOM_SIZE * 31).is_null());
        assert!(!arena.alloc(ARENA_ATOM_SIZE * 8).is_null());
        assert_eq!(arena.atoms(), ARENA_DEFAULT_ATOMS + 8);

        assert!(arena.alloc(ARENA_ATOM_SIZE).is_null());
        assert!(seen
            .lock()
            .iter()
            .any(|d| d.kind == DiagnosticKind::Exhausted));
    }

    #[test]
    fn free_then_alloc_reuses_range() {
        let mut arena = anon();
        let a = arena.alloc(ARENA_ATOM_SIZE * 3);

        arena.free(a, ARENA_ATOM_SIZE * 3);
        let b = arena.alloc(ARENA_ATOM_SIZE * 3);

        assert_eq!(a, b);
    }

    #[test]
    fn double_free_is_reported_and_ignored() {
        let (mut arena, seen) = recording(Arena::builder());
        let a = arena.alloc(ARENA_ATOM_SIZE);
        arena.free(a, ARENA_ATOM_SIZE);
        let before = arena.free_blocks();

        arena.free(a, ARENA_ATOM_SIZE);

        assert_eq!(arena.free_blocks(), before);
        assert!(seen
            .lock()
            .iter()
            .any(|d| d.kind == DiagnosticKind::Logic && d.message.contains("double free")));
    }

    #[test]
    fn free_out_of_range_is_ignored() {
        let (mut arena, seen) = recording(Arena::builder());

        arena.free(ArenaAtom::new(10_000), 4096);
        arena.free(ArenaAtom::NULL, 4096);

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn named_header_find_or_create() {
        let mut arena = anon();

        assert!(arena.named_header("nodes", HeaderType::Fixed, 0).is_none());

        let slot = arena.named_header("nodes", HeaderType::Fixed, 20).unwrap();
        assert!(slot.created());
        assert_eq!(slot.size(), 24);
        arena.header_bytes_mut(slot)[0] = 9;

        let again = arena.named_header("nodes", HeaderType::Fixed, 0).unwrap();
        assert!(!again.created());
        assert_eq!(again.offset(), slot.offset());
        assert_eq!(arena.header_bytes(again)[0], 9);

        let second = arena.named_header("strings", HeaderType::Istr, 8).unwrap();
        assert_eq!(second.offset(), slot.offset() + 24 + NAMED_HEADER_PREFIX_SIZE);
        assert_eq!(arena.headers().len(), 2);
        assert_eq!(arena.headers()[1].name, "strings");
    }

    #[test]
    fn named_header_type_mismatch_fails() {
        let (mut arena, seen) = recording(Arena::builder());
        arena.named_header("nodes", HeaderType::Fixed, 8).unwrap();

        assert!(arena.named_header("nodes", HeaderType::Pat, 8).is_none());
        assert_eq!(seen.lock()[0].kind, DiagnosticKind::Format);
    }

    #[test]
    fn named_header_space_runs_out() {
        let (mut arena, seen) = recording(Arena::builder());

        assert!(arena.named_header("huge", HeaderType::Opaque, ARENA_ATOM_SIZE).is_none());
        assert_eq!(seen.lock()[0].kind, DiagnosticKind::Exhausted);
    }

    #[test]
    fn file_arena_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("arena.pdb");

        let atom = {
            let mut arena = Arena::builder().path(&path).registry(registry()).open().unwrap();
            let slot = arena.named_header("root", HeaderType::Opaque, 8).unwrap();
            arena.header_bytes_mut(slot)[..4].copy_from_slice(b"pdb!");
            let atom = arena.alloc(ARENA_ATOM_SIZE * 50);
            arena.addr_mut(atom, 5).unwrap().copy_from_slice(b"hello");
            arena.sync().unwrap();
            atom
        };

        let arena = Arena::builder().path(&path).registry(registry()).open().unwrap();
        let slot = arena.find_header("root").unwrap();

        assert_eq!(&arena.header_bytes(slot)[..4], b"pdb!");
        assert_eq!(arena.addr(atom, 5).unwrap(), b"hello");
        assert_eq!(arena.len() as u64, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn reopen_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.pdb");
        std::fs::write(&path, vec![0u8; ARENA_ATOM_SIZE * 2]).unwrap();

        let seen = Arc::new(Mutex::new(Vec::<Diagnostic>::new()));
        let sink = Arc::clone(&seen);
        let result = Arena::builder()
            .path(&path)
            .registry(registry())
            .diagnostics(move |d| sink.lock().push(d.clone()))
            .open();

        assert!(result.is_err());
        assert_eq!(seen.lock()[0].kind, DiagnosticKind::Format);
    }

    #[test]
    fn reopen_rejects_length_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.pdb");
        {
            Arena::builder().path(&path).registry(registry()).open().unwrap();
        }
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len((ARENA_DEFAULT_ATOMS as u64 + 1) * ARENA_ATOM_SIZE as u64).unwrap();

        let err = Arena::builder().path(&path).registry(registry()).open().unwrap_err();

        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn reopen_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odd.pdb");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let err = Arena::builder().path(&path).registry(registry()).open().unwrap_err();

        assert!(err.to_string().contains("not a non-zero multiple"));
    }

    #[test]
    fn read_only_open_refuses_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.pdb");
        {
            Arena::builder().path(&path).registry(registry()).open().unwrap();
        }

        let (mut arena, seen) = recording(Arena::builder().path(&path).read_only(true));

        assert!(arena.alloc(10).is_null());
        assert!(arena.named_header("new", HeaderType::Opaque, 8).is_none());
        assert!(arena.bytes_mut(0, 8).is_none());
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn read_only_open_of_missing_file_fails() {
        let dir = tempdir().unwrap();

        let result = Arena::builder()
            .path(dir.path().join("missing.pdb"))
            .read_only(true)
            .registry(registry())
            .open();

        assert!(result.is_err());
    }

    #[test]
    fn config_sets_initial_size() {
        let mut config = Config::new();
        config.set("big.size", "1 << 20");

        let arena = Arena::builder()
            .name("big")
            .config(config)
            .registry(registry())
            .open()
            .unwrap();

        assert_eq!(arena.len(), 1 << 20);
    }
}
