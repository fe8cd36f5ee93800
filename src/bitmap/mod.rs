//! # Sparse Bitmaps
//!
//! Many bitmaps share one fixed-size pool of 1 KiB blocks. A bitmap is a
//! block used as a table of 256 chunk atoms; each chunk is another block
//! holding 8192 bits as 128 little-endian u64 words.
//!
//! ```text
//! bit  = chunk * 8192 + word * 64 + offset
//!
//! BitmapId ──> [chunk 0][chunk 1] ... [chunk 255]     (u32 atoms, 0 = none)
//!                  │
//!                  └──> [word 0][word 1] ... [word 127]
//! ```
//!
//! Chunks are allocated on the first `set` inside their range; reading a bit
//! in a missing chunk yields clear. The pool zero-fills on allocation, so a
//! recycled block never leaks old bits.

use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, IntoBytes};

use crate::atom::{BitmapId, FixedAtom};
use crate::config::{
    BITMAP_BITS_PER_CHUNK, BITMAP_BLOCK_SIZE, BITMAP_CHUNKS_PER_MAP, BITMAP_MAX_ATOMS,
    BITMAP_MAX_BIT, BITMAP_POOL_SHIFT,
};
use crate::fixed::{FixedPool, FIXED_INFO_SIZE, FIXED_INIT_ZERO};
use crate::storage::{Arena, HeaderType};

pub use crate::config::BITMAP_MAX_BIT as MAX_BIT;

/// Pass to [`BitmapPool::find_next`] to search from bit 0.
pub const FIND_START: u32 = u32::MAX;

/// Returned by [`BitmapPool::find_next`] when no further bit is set.
pub const FIND_DONE: u32 = BITMAP_MAX_BIT;

const WORD_BITS: u32 = 64;
const WORDS_PER_CHUNK: usize = BITMAP_BLOCK_SIZE / 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    chunk: usize,
    word: usize,
    mask: u64,
}

impl Position {
    fn of(bit: u32) -> Self {
        let within = bit % BITMAP_BITS_PER_CHUNK;
        Self {
            chunk: (bit / BITMAP_BITS_PER_CHUNK) as usize,
            word: (within / WORD_BITS) as usize,
            mask: 1u64 << (within % WORD_BITS),
        }
    }
}

fn read_word(data: &[u8], word: usize) -> u64 {
    data.get(word * 8..word * 8 + 8)
        .and_then(|b| U64::read_from_bytes(b).ok())
        .map_or(0, |w| w.get())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapPool {
    pool: FixedPool,
}

impl BitmapPool {
    /// Opens or creates the block pool `name`.
    pub fn open(arena: &mut Arena, name: &str) -> eyre::Result<Self> {
        let slot = arena
            .named_header(name, HeaderType::Bitmap, FIXED_INFO_SIZE)
            .ok_or_else(|| eyre::eyre!("bitmap pool header '{}' is unavailable", name))?;
        let pool = FixedPool::setup(
            arena,
            name,
            slot.offset(),
            BITMAP_POOL_SHIFT,
            BITMAP_BLOCK_SIZE as u32,
            BITMAP_MAX_ATOMS,
        )?;
        eyre::ensure!(
            pool.atom_size(arena) >= BITMAP_BLOCK_SIZE,
            "bitmap pool '{}' blocks are {} bytes, need {}",
            name,
            pool.atom_size(arena),
            BITMAP_BLOCK_SIZE
        );
        if !arena.is_read_only() {
            pool.set_flags(arena, FIXED_INIT_ZERO);
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &FixedPool {
        &self.pool
    }

    /// A new bitmap with every bit clear.
    pub fn alloc(&self, arena: &mut Arena) -> BitmapId {
        BitmapId::new(self.pool.alloc(arena).raw())
    }

    fn table<'a>(&self, arena: &'a Arena, id: BitmapId) -> Option<&'a [u8]> {
        self.pool.addr(arena, FixedAtom::new(id.raw()))
    }

    fn chunk_of(table: &[u8], chunk: usize) -> FixedAtom {
        table
            .get(chunk * 4..chunk * 4 + 4)
            .and_then(|b| U32::read_from_bytes(b).ok())
            .map_or(FixedAtom::NULL, |a| FixedAtom::new(a.get()))
    }

    fn chunk(&self, arena: &Arena, id: BitmapId, chunk: usize) -> FixedAtom {
        self.table(arena, id)
            .map_or(FixedAtom::NULL, |table| Self::chunk_of(table, chunk))
    }

    fn check(&self, arena: &Arena, id: BitmapId, bit: u32, op: &str) -> bool {
        if bit >= BITMAP_MAX_BIT {
            arena.diagnostics().logic(format!(
                "bitmap {} in '{}': {} of bit {} past {}",
                id,
                self.pool.name(),
                op,
                bit,
                BITMAP_MAX_BIT
            ));
            return false;
        }
        if self.table(arena, id).is_none() {
            arena.diagnostics().logic(format!(
                "bitmap {} in '{}': {} on an unknown bitmap",
                id,
                self.pool.name(),
                op
            ));
            return false;
        }
        true
    }

    pub fn test(&self, arena: &Arena, id: BitmapId, bit: u32) -> bool {
        if bit >= BITMAP_MAX_BIT {
            return false;
        }
        let pos = Position::of(bit);
        let chunk = self.chunk(arena, id, pos.chunk);
        self.pool
            .addr(arena, chunk)
            .is_some_and(|data| read_word(data, pos.word) & pos.mask != 0)
    }

    pub fn set(&self, arena: &mut Arena, id: BitmapId, bit: u32) {
        if !self.check(arena, id, bit, "set") {
            return;
        }
        let pos = Position::of(bit);

        let mut chunk = self.chunk(arena, id, pos.chunk);
        if chunk.is_null() {
            chunk = self.pool.alloc(arena);
            if chunk.is_null() {
                return;
            }
            let Some(table) = self.pool.addr_mut(arena, FixedAtom::new(id.raw())) else {
                return;
            };
            table[pos.chunk * 4..pos.chunk * 4 + 4].copy_from_slice(U32::new(chunk.raw()).as_bytes());
        }

        self.update(arena, chunk, pos, |word| word | pos.mask);
    }

    pub fn clear(&self, arena: &mut Arena, id: BitmapId, bit: u32) {
        if !self.check(arena, id, bit, "clear") {
            return;
        }
        let pos = Position::of(bit);
        let chunk = self.chunk(arena, id, pos.chunk);
        if !chunk.is_null() {
            self.update(arena, chunk, pos, |word| word & !pos.mask);
        }
    }

    fn update(&self, arena: &mut Arena, chunk: FixedAtom, pos: Position, f: impl FnOnce(u64) -> u64) {
        if let Some(data) = self.pool.addr_mut(arena, chunk) {
            let bytes = &mut data[pos.word * 8..pos.word * 8 + 8];
            let word = U64::read_from_bytes(bytes).map_or(0, |w| w.get());
            bytes.copy_from_slice(U64::new(f(word)).as_bytes());
        }
    }

    /// The first set bit after `bit`, or from 0 when `bit` is [`FIND_START`].
    /// Returns [`FIND_DONE`] when there is none.
    pub fn find_next(&self, arena: &Arena, id: BitmapId, bit: u32) -> u32 {
        let mut num = if bit == FIND_START { 0 } else { bit.saturating_add(1) };
        let Some(table) = self.table(arena, id) else {
            return FIND_DONE;
        };

        while num < BITMAP_MAX_BIT {
            let pos = Position::of(num);
            let chunk_base = pos.chunk as u32 * BITMAP_BITS_PER_CHUNK;
            let next_chunk = chunk_base + BITMAP_BITS_PER_CHUNK;

            let Some(data) = self.pool.addr(arena, Self::chunk_of(table, pos.chunk)) else {
                num = next_chunk;
                continue;
            };

            // Drop the bits below `num` in its own word.
            let mut value = read_word(data, pos.word) & !(pos.mask - 1);
            let mut word = pos.word;
            loop {
                if value != 0 {
                    return chunk_base + word as u32 * WORD_BITS + value.trailing_zeros();
                }
                word += 1;
                if word == WORDS_PER_CHUNK {
                    break;
                }
                value = read_word(data, word);
            }
            num = next_chunk;
        }

        FIND_DONE
    }

    /// Set bits of `id`, ascending.
    pub fn iter<'a>(&'a self, arena: &'a Arena, id: BitmapId) -> Bits<'a> {
        Bits {
            pool: self,
            arena,
            id,
            last: FIND_START,
        }
    }

    /// Releases every chunk of `id` and then its table.
    pub fn free(&self, arena: &mut Arena, id: BitmapId) {
        let Some(table) = self.table(arena, id) else {
            arena.diagnostics().logic(format!(
                "free of unknown bitmap {} in '{}'",
                id,
                self.pool.name()
            ));
            return;
        };
        let chunks: Vec<FixedAtom> = (0..BITMAP_CHUNKS_PER_MAP as usize)
            .map(|c| Self::chunk_of(table, c))
            .filter(|a| !a.is_null())
            .collect();

        for chunk in chunks {
            self.pool.free(arena, chunk);
        }
        self.pool.free(arena, FixedAtom::new(id.raw()));
    }

    pub fn dump(&self, arena: &Arena, id: BitmapId) {
        let chunks = self.table(arena, id).map_or(0, |table| {
            (0..BITMAP_CHUNKS_PER_MAP as usize)
                .filter(|&c| !Self::chunk_of(table, c).is_null())
                .count()
        });
        tracing::debug!(bitmap = %id, pool = self.pool.name(), chunks, "bitmap dump");
    }
}

pub struct Bits<'a> {
    pool: &'a BitmapPool,
    arena: &'a Arena,
    id: BitmapId,
    last: u32,
}

impl Iterator for Bits<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.last == FIND_DONE {
            return None;
        }
        self.last = self.pool.find_next(self.arena, self.id, self.last);
        (self.last != FIND_DONE).then_some(self.last)
    }
}
