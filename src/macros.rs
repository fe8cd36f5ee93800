//! # Internal Macros
//!
//! Boilerplate reducers shared by the arena and the pools.
//!
//! ## zerocopy_accessors!
//!
//! Every persistent info struct (arena header, pool info blocks, trie nodes)
//! is a packed `#[repr(C)]` record whose wide fields are stored as zerocopy
//! little-endian wrappers. This macro writes the `field()` / `set_field()`
//! pair for each listed field so the pools never touch the wrappers directly.
//!
//! ```ignore
//! use zerocopy::little_endian::U32;
//!
//! #[repr(C)]
//! struct FixedInfo {
//!     shift: u8,
//!     max_atoms: U32,
//! }
//!
//! impl FixedInfo {
//!     zerocopy_accessors! {
//!         shift: u8,
//!         max_atoms: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn shift(&self) -> u8 { self.shift }
//! // pub fn set_shift(&mut self, val: u8) { self.shift = val; }
//! // pub fn max_atoms(&self) -> u32 { self.max_atoms.get() }
//! // pub fn set_max_atoms(&mut self, val: u32) { self.max_atoms = U32::new(val); }
//! ```
//!
//! ## atom_type!
//!
//! Declares a 32-bit atom newtype for one pool. Each pool gets its own type so
//! an atom from one pool cannot be handed to another without an explicit
//! conversion.

/// Field accessors for on-disk structs. `u8` fields are read and written
/// directly; wider fields go through the little-endian wrapper of their width.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u8) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u8 {
                self.$field
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u8) {
                self.$field = val;
            }
        }
    };
    (@impl $field:ident, u16) => {
        $crate::zerocopy_accessors!(@le $field, u16, U16);
    };
    (@impl $field:ident, u32) => {
        $crate::zerocopy_accessors!(@le $field, u32, U32);
    };
    (@impl $field:ident, u64) => {
        $crate::zerocopy_accessors!(@le $field, u64, U64);
    };
    (@le $field:ident, $native:ty, $wrapper:ident) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> $native {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: $native) {
                self.$field = ::zerocopy::little_endian::$wrapper::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}

/// Declares a pool-specific atom newtype with a `NULL` constant.
#[macro_export]
macro_rules! atom_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            pub const NULL: Self = Self(0);

            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }

            #[inline]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Returns `None` for the null atom.
            #[inline]
            pub const fn non_null(self) -> Option<Self> {
                if self.0 == 0 {
                    None
                } else {
                    Some(self)
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use zerocopy::little_endian::{U16, U32};

    struct Sample {
        shift: u8,
        atom_size: U16,
        free: U32,
    }

    impl Sample {
        zerocopy_accessors! {
            shift: u8,
            atom_size: u16,
            free: u32,
        }
    }

    atom_type!(SampleAtom);

    #[test]
    fn accessors_read_and_write_fields() {
        let mut s = Sample {
            shift: 0,
            atom_size: U16::new(0),
            free: U32::new(0),
        };

        s.set_shift(6);
        s.set_atom_size(32);
        s.set_free(77);

        assert_eq!(s.shift(), 6);
        assert_eq!(s.atom_size(), 32);
        assert_eq!(s.free(), 77);
    }

    #[test]
    fn atom_type_null_semantics() {
        assert!(SampleAtom::NULL.is_null());
        assert_eq!(SampleAtom::NULL.non_null(), None);
        assert_eq!(SampleAtom::new(5).non_null(), Some(SampleAtom::new(5)));
        assert_eq!(SampleAtom::new(5).raw(), 5);
        assert_eq!(SampleAtom::new(3).to_string(), "SampleAtom#3");
    }
}
