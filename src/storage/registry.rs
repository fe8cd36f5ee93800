//! # Address Registry
//!
//! Arenas are mapped at predictable virtual addresses so that a process opening
//! several arenas gets the same layout every time. The registry is the single
//! source of those addresses: a cursor that starts at `start`, advances by
//! `increment` per claim and stops at `max`.
//!
//! ## Lifecycle
//!
//! One process-wide registry exists, created on first use by
//! [`AddressRegistry::global`]. Every arena open (and every relocation during
//! growth) claims the next candidate. Candidates are never returned: closing
//! an arena does not give its range back. Once the cursor passes `max` every
//! further open fails.
//!
//! Tests and embedders that need control over placement build their own
//! registry and hand it to `ArenaBuilder::registry`.
//!
//! A claimed address is only a hint. If the kernel places the mapping
//! elsewhere, the region releases it and claims the next candidate.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::config::{REGISTRY_INCREMENT, REGISTRY_MAX, REGISTRY_START};

#[derive(Debug)]
pub struct AddressRegistry {
    next: Mutex<usize>,
    start: usize,
    increment: usize,
    max: usize,
}

static GLOBAL: OnceLock<Arc<AddressRegistry>> = OnceLock::new();

impl AddressRegistry {
    pub fn new(start: usize, increment: usize, max: usize) -> Self {
        Self {
            next: Mutex::new(start),
            start,
            increment,
            max,
        }
    }

    pub fn global() -> Arc<AddressRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| {
            Arc::new(AddressRegistry::new(
                REGISTRY_START,
                REGISTRY_INCREMENT,
                REGISTRY_MAX,
            ))
        }))
    }

    /// Hands out the next candidate base address, or `None` once exhausted.
    pub fn claim(&self) -> Option<usize> {
        let mut next = self.next.lock();
        let addr = *next;

        if addr >= self.max || self.max - addr < self.increment {
            return None;
        }

        *next = addr + self.increment;
        Some(addr)
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn increment(&self) -> usize {
        self.increment
    }

    pub fn remaining(&self) -> usize {
        let next = *self.next.lock();
        self.max.saturating_sub(next) / self.increment.max(1)
    }
}

impl Default for AddressRegistry {
    fn default() -> Self {
        Self::new(REGISTRY_START, REGISTRY_INCREMENT, REGISTRY_MAX)
    }
}
