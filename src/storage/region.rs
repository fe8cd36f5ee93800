//! # Mapped Region
//!
//! `Region` owns one memory mapping, either of a file (`MAP_SHARED`) or of
//! anonymous memory (`MAP_PRIVATE | MAP_ANONYMOUS`). It is the only place in
//! the crate that calls `mmap`.
//!
//! ## Placement
//!
//! Every mapping is requested at a hint claimed from an [`AddressRegistry`].
//! No `MAP_FIXED` is used, so an occupied hint never clobbers an existing
//! mapping; the kernel picks another address instead, which the region
//! releases before trying the next candidate.
//!
//! ## Growth
//!
//! `grow` first tries to map the new tail directly after the current end. If
//! the kernel puts it anywhere else, the whole region is relocated to a fresh
//! candidate: file mappings are simply mapped again, anonymous ones are copied.
//! Either way the base address may change, which is why `grow` takes
//! `&mut self` and every byte slice handed out borrows the region.
//!
//! ## Safety Model
//!
//! Same scheme as the rest of the storage layer:
//!
//! ```text
//! as_slice(&self) -> &[u8]            // Immutable borrow of self
//! as_mut_slice(&mut self) -> &mut [u8]
//! grow(&mut self)                     // Exclusive, invalidates nothing live
//! ```

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::ptr::NonNull;
use std::sync::Arc;

use super::registry::AddressRegistry;

#[derive(Debug)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
    file: Option<File>,
    writable: bool,
    registry: Arc<AddressRegistry>,
}

// SAFETY: Region exclusively owns its mapping. Shared access only produces
// `&[u8]`, and every mutation or remap goes through `&mut self`.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    pub fn map(
        file: Option<File>,
        len: usize,
        writable: bool,
        registry: Arc<AddressRegistry>,
    ) -> io::Result<Self> {
        let base = map_placed(&registry, file.as_ref(), len, writable)?;

        Ok(Self {
            base,
            len,
            file,
            writable,
            registry,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_file_backed(&self) -> bool {
        self.file.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: base..base+len is a live mapping owned by self, readable in
        // every protection mode we create.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        debug_assert!(self.writable, "mutable access to a read-only region");
        // SAFETY: as above, and &mut self guarantees no other slice is live.
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
    }

    /// Grows the mapping to `new_len` bytes, extending the file first.
    pub fn grow(&mut self, new_len: usize) -> io::Result<()> {
        if new_len <= self.len {
            return Ok(());
        }

        if let Some(file) = &self.file {
            file.set_len(new_len as u64)?;
        }

        let tail = self.base_addr() + self.len;
        let extra = new_len - self.len;

        if let Ok(ptr) = mmap_raw(tail, extra, self.writable, self.file.as_ref(), self.len) {
            if ptr.as_ptr() as usize == tail {
                self.len = new_len;
                return Ok(());
            }
            // SAFETY: ptr is the mapping we just created, of length extra.
            unsafe { libc::munmap(ptr.as_ptr().cast(), extra) };
        }

        let new_base = map_placed(&self.registry, self.file.as_ref(), new_len, self.writable)?;

        if self.file.is_none() {
            // SAFETY: both ranges are live, disjoint mappings of at least
            // self.len bytes.
            unsafe {
                std::ptr::copy_nonoverlapping(self.base.as_ptr(), new_base.as_ptr(), self.len)
            };
        }

        // SAFETY: the old mapping is no longer referenced; &mut self proves no
        // slices into it are alive.
        unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };

        tracing::debug!(
            from = format_args!("{:#x}", self.base_addr()),
            to = format_args!("{:#x}", new_base.as_ptr() as usize),
            len = new_len,
            "relocated region"
        );

        self.base = new_base;
        self.len = new_len;
        Ok(())
    }

    pub fn sync(&self) -> io::Result<()> {
        if self.file.is_none() || !self.writable {
            return Ok(());
        }

        // SAFETY: msync over our own live mapping.
        let rc = unsafe { libc::msync(self.base.as_ptr().cast(), self.len, libc::MS_SYNC) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: the mapping is owned by self and nothing can borrow it past
        // drop. A region that was grown in place consists of adjacent
        // mappings, which a single munmap covers.
        unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
    }
}

fn map_placed(
    registry: &AddressRegistry,
    file: Option<&File>,
    len: usize,
    writable: bool,
) -> io::Result<NonNull<u8>> {
    loop {
        let hint = registry.claim().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::OutOfMemory,
                "arena address space exhausted",
            )
        })?;

        let ptr = mmap_raw(hint, len, writable, file, 0)?;
        if ptr.as_ptr() as usize == hint {
            return Ok(ptr);
        }

        tracing::debug!(
            hint = format_args!("{:#x}", hint),
            got = format_args!("{:#x}", ptr.as_ptr() as usize),
            "mapping missed its hint, trying next candidate"
        );
        // SAFETY: ptr is the mapping we just created, of length len.
        unsafe { libc::munmap(ptr.as_ptr().cast(), len) };
    }
}

fn mmap_raw(
    hint: usize,
    len: usize,
    writable: bool,
    file: Option<&File>,
    offset: usize,
) -> io::Result<NonNull<u8>> {
    let prot = if writable {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_READ
    };
    let (flags, fd) = match file {
        Some(f) => (libc::MAP_SHARED, f.as_raw_fd()),
        None => (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1),
    };

    // SAFETY: no MAP_FIXED, so the kernel never replaces an existing mapping;
    // the hint is advisory. The result is checked against MAP_FAILED.
    let ptr = unsafe {
        libc::mmap(
            hint as *mut libc::c_void,
            len,
            prot,
            flags,
            fd,
            offset as libc::off_t,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    NonNull::new(ptr.cast::<u8>()).ok_or_else(|| io::Error::other("mmap returned null"))
}
