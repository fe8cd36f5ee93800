//! # Atom Handles
//!
//! Every pool hands out 32-bit atoms. Zero is always null, and an atom is only
//! meaningful to the pool that produced it, so each pool has its own type:
//!
//! | Type          | Issued by                    | Unit                          |
//! |---------------|------------------------------|-------------------------------|
//! | `ArenaAtom`   | `Arena::alloc`               | one arena page (4096 bytes)   |
//! | `FixedAtom`   | `FixedPool::alloc`/`element` | one fixed-size slot           |
//! | `ArbAtom`     | `ArbPool::alloc`             | arena page << 8 \| 16-byte offset |
//! | `IstrAtom`    | `StringPool::intern`         | index slot (+ short-string range) |
//! | `IstrDataAtom`| string data area             | one data atom                 |
//! | `PatAtom`     | `PatriciaTree::add`          | one trie node                 |
//! | `PatDataAtom` | caller                       | payload referenced by a node  |
//! | `BitmapId`    | `BitmapPool::alloc`          | one chunk table               |
//!
//! The only cross-type conversion is into `PatDataAtom`, since a trie node's
//! payload is by construction an atom from some other store.

atom_type!(
    /// A run of arena pages.
    ArenaAtom
);

atom_type!(
    /// A slot in a fixed-size pool.
    FixedAtom
);

atom_type!(
    /// A block in the arbitrary-size pool.
    ArbAtom
);

atom_type!(
    /// The externally visible identity of an interned string.
    IstrAtom
);

atom_type!(
    /// Physical location of an interned string record.
    IstrDataAtom
);

atom_type!(
    /// A patricia trie node.
    PatAtom
);

atom_type!(
    /// The payload a trie node points at, usually an `IstrAtom`.
    PatDataAtom
);

atom_type!(
    /// One sparse bitmap.
    BitmapId
);

impl From<IstrAtom> for PatDataAtom {
    fn from(atom: IstrAtom) -> Self {
        PatDataAtom::new(atom.raw())
    }
}

impl From<ArbAtom> for PatDataAtom {
    fn from(atom: ArbAtom) -> Self {
        PatDataAtom::new(atom.raw())
    }
}

impl From<FixedAtom> for PatDataAtom {
    fn from(atom: FixedAtom) -> Self {
        PatDataAtom::new(atom.raw())
    }
}
