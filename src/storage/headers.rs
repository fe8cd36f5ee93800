//! # Arena Header Definitions
//!
//! Page 0 of every arena holds the arena header followed by a packed sequence
//! of named headers. Pools persist their info structs as named headers so that
//! reopening a file finds them again by name.
//!
//! ## Page 0 Layout
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  ----------------------------------------------
//! 0       32    ArenaHeader
//! 32      72    NamedHeader prefix #0 (name[64], type, flags, size)
//! 104     N0    content #0, padded to 8 bytes
//! ...           NamedHeader #1, #2, ... until num_headers
//! ```
//!
//! ## ArenaHeader
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  -------------------------------------------
//! 0       2     magic        0xBE1E (0x1EBE means wrong endianness)
//! 2       1     vers_major
//! 3       1     vers_minor
//! 4       4     max_size     Growth cap in arena atoms, 0 = unlimited
//! 8       4     num_headers  Named headers present in page 0
//! 12      4     reserved
//! 16      8     len          Current length in bytes
//! 24      4     free         First free block (arena atom), 0 = none
//! 28      4     reserved
//! ```
//!
//! ## Endianness
//!
//! All multi-byte fields are little-endian through the zerocopy wrappers.

use eyre::{bail, ensure, Result};
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    ARENA_HEADER_SIZE, ARENA_MAGIC, ARENA_MAGIC_SWAPPED, ARENA_VERSION_MAJOR,
    ARENA_VERSION_MINOR, HEADER_NAME_LEN, NAMED_HEADER_PREFIX_SIZE,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ArenaHeader {
    magic: U16,
    vers_major: u8,
    vers_minor: u8,
    max_size: U32,
    num_headers: U32,
    reserved1: U32,
    len: U64,
    free: U32,
    reserved2: U32,
}

const _: () = assert!(std::mem::size_of::<ArenaHeader>() == ARENA_HEADER_SIZE);

impl ArenaHeader {
    pub fn new(len: u64, max_size: u32) -> Self {
        Self {
            magic: U16::new(ARENA_MAGIC),
            vers_major: ARENA_VERSION_MAJOR,
            vers_minor: ARENA_VERSION_MINOR,
            max_size: U32::new(max_size),
            num_headers: U32::new(0),
            reserved1: U32::new(0),
            len: U64::new(len),
            free: U32::new(0),
            reserved2: U32::new(0),
        }
    }

    /// Parses and validates magic and version.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= ARENA_HEADER_SIZE,
            "buffer too small for ArenaHeader: {} < {}",
            bytes.len(),
            ARENA_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..ARENA_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse ArenaHeader: {:?}", e))?;

        header.validate()?;
        Ok(header)
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= ARENA_HEADER_SIZE,
            "buffer too small for ArenaHeader: {} < {}",
            bytes.len(),
            ARENA_HEADER_SIZE
        );

        Self::mut_from_bytes(&mut bytes[..ARENA_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse ArenaHeader: {:?}", e))
    }

    fn validate(&self) -> Result<()> {
        match self.magic.get() {
            ARENA_MAGIC => {}
            ARENA_MAGIC_SWAPPED => bail!("arena was written with the opposite byte order"),
            other => bail!("invalid arena magic {:#06x} (expected {:#06x})", other, ARENA_MAGIC),
        }

        ensure!(
            self.vers_major == ARENA_VERSION_MAJOR && self.vers_minor == ARENA_VERSION_MINOR,
            "unsupported arena version {}.{} (expected {}.{})",
            self.vers_major,
            self.vers_minor,
            ARENA_VERSION_MAJOR,
            ARENA_VERSION_MINOR
        );

        Ok(())
    }

    pub fn magic(&self) -> u16 {
        self.magic.get()
    }

    pub fn version(&self) -> (u8, u8) {
        (self.vers_major, self.vers_minor)
    }

    zerocopy_accessors! {
        max_size: u32,
        num_headers: u32,
        len: u64,
        free: u32,
    }
}

/// Type tag of a named header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum HeaderType {
    Unknown = 0,
    Fixed = 2,
    Arb = 3,
    Istr = 4,
    Pat = 5,
    Opaque = 6,
    Bitmap = 8,
}

impl HeaderType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(HeaderType::Unknown),
            2 => Some(HeaderType::Fixed),
            3 => Some(HeaderType::Arb),
            4 => Some(HeaderType::Istr),
            5 => Some(HeaderType::Pat),
            6 => Some(HeaderType::Opaque),
            8 => Some(HeaderType::Bitmap),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HeaderType::Unknown => "unknown",
            HeaderType::Fixed => "fixed",
            HeaderType::Arb => "arb",
            HeaderType::Istr => "istr",
            HeaderType::Pat => "pat",
            HeaderType::Opaque => "opaque",
            HeaderType::Bitmap => "bitmap",
        }
    }
}

/// The fixed part of a named header; the content follows it directly.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NamedHeader {
    name: [u8; HEADER_NAME_LEN],
    kind: U16,
    flags: U16,
    size: U32,
}

const _: () = assert!(std::mem::size_of::<NamedHeader>() == NAMED_HEADER_PREFIX_SIZE);

impl NamedHeader {
    pub fn new(name: &str, kind: HeaderType, size: u32) -> Result<Self> {
        ensure!(!name.is_empty(), "header name must not be empty");
        ensure!(
            name.len() < HEADER_NAME_LEN,
            "header name '{}' too long: {} >= {}",
            name,
            name.len(),
            HEADER_NAME_LEN
        );

        let mut buf = [0u8; HEADER_NAME_LEN];
        buf[..name.len()].copy_from_slice(name.as_bytes());

        Ok(Self {
            name: buf,
            kind: U16::new(kind as u16),
            flags: U16::new(0),
            size: U32::new(size),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= NAMED_HEADER_PREFIX_SIZE,
            "buffer too small for NamedHeader: {} < {}",
            bytes.len(),
            NAMED_HEADER_PREFIX_SIZE
        );

        Self::ref_from_bytes(&bytes[..NAMED_HEADER_PREFIX_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse NamedHeader: {:?}", e))
    }

    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(HEADER_NAME_LEN);
        &self.name[..end]
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }

    pub fn kind(&self) -> HeaderType {
        HeaderType::from_u16(self.kind.get()).unwrap_or(HeaderType::Unknown)
    }

    zerocopy_accessors! {
        flags: u16,
        size: u32,
    }
}
