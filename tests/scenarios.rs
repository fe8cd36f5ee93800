//! # End-to-End Scenarios
//!
//! Drives every pool through the public API the way an application would:
//!
//! 1. Fixed-size pool churn on an anonymous arena
//! 2. String interning, including the short-string range
//! 3. A patricia trie over interned strings with prefix traversal
//! 4. Small and large blocks from the arbitrary-size pool
//! 5. A file-backed arena holding every pool, closed and reopened
//! 6. Config overrides read from a file

use std::collections::HashSet;

use parrotdb::arb::slot_for;
use parrotdb::config::{
    ARENA_ATOM_SIZE, ISTR_DEFAULT_ATOM_SHIFT, ISTR_DEFAULT_MAX_ATOMS, ISTR_DEFAULT_SHIFT,
    PAT_DEFAULT_MAX_ATOMS, PAT_DEFAULT_SHIFT,
};
use parrotdb::istr::EMPTY_STRING;
use parrotdb::{
    Arena, ArbPool, BitmapPool, Config, FixedAtom, FixedPool, PatriciaTree, StringPool,
};
use tempfile::tempdir;

fn strings(arena: &mut Arena) -> StringPool {
    StringPool::open(
        arena,
        "strings",
        ISTR_DEFAULT_SHIFT,
        ISTR_DEFAULT_ATOM_SHIFT,
        ISTR_DEFAULT_MAX_ATOMS,
    )
    .unwrap()
}

fn nul(s: &str) -> Vec<u8> {
    let mut key = s.as_bytes().to_vec();
    key.push(0);
    key
}

// ============================================================================
// FIXED-SIZE POOL
// ============================================================================

#[test]
fn fixed_pool_churn_never_shares_addresses() {
    let mut arena = Arena::anonymous().unwrap();
    let pool = FixedPool::open(&mut arena, "churn", 6, 32, 16384).unwrap();

    let first: Vec<FixedAtom> = (0..100).map(|_| pool.alloc(&mut arena)).collect();
    assert!(first.iter().all(|a| !a.is_null()));

    let mut live = Vec::new();
    for (i, atom) in first.into_iter().enumerate() {
        if i % 2 == 0 {
            pool.free(&mut arena, atom);
        } else {
            live.push(atom);
        }
    }
    live.extend((0..50).map(|_| pool.alloc(&mut arena)));

    let atoms: HashSet<FixedAtom> = live.iter().copied().collect();
    assert_eq!(atoms.len(), 100);

    // Stamp every slot, then read them all back.
    for (i, &atom) in live.iter().enumerate() {
        let slot = pool.addr_mut(&mut arena, atom).unwrap();
        slot[..4].copy_from_slice(&(i as u32).to_le_bytes());
    }
    for (i, &atom) in live.iter().enumerate() {
        let slot = pool.addr(&arena, atom).unwrap();
        assert_eq!(u32::from_le_bytes(slot[..4].try_into().unwrap()), i as u32);
    }
}

// ============================================================================
// STRING POOL
// ============================================================================

#[test]
fn short_strings_skip_the_data_area() {
    let mut arena = Arena::anonymous().unwrap();
    let pool = strings(&mut arena);
    let free_before = arena.free_atoms();
    let len_before = arena.len();

    let empty = pool.intern(&mut arena, b"");
    let a = pool.intern(&mut arena, b"a");

    assert_eq!(empty, EMPTY_STRING);
    assert_eq!(pool.resolve_nul(&arena, empty), Some(&b"\0"[..]));
    assert_eq!(pool.resolve_nul(&arena, a), Some(&b"a\0"[..]));
    assert_eq!(arena.free_atoms(), free_before);
    assert_eq!(arena.len(), len_before);
}

#[test]
fn interning_twice_resolves_twice() {
    let mut arena = Arena::anonymous().unwrap();
    let pool = strings(&mut arena);

    let first = pool.intern_str(&mut arena, "hello");
    let second = pool.intern_str(&mut arena, "hello");

    assert_eq!(pool.resolve_nul(&arena, first), Some(&b"hello\0"[..]));
    assert_eq!(pool.resolve_nul(&arena, second), Some(&b"hello\0"[..]));
}

// ============================================================================
// PATRICIA TRIE
// ============================================================================

#[test]
fn trie_prefix_walk_over_interned_strings() {
    let mut arena = Arena::anonymous().unwrap();
    let pool = strings(&mut arena);
    let tree = PatriciaTree::open(&mut arena, "words", pool, PAT_DEFAULT_SHIFT, PAT_DEFAULT_MAX_ATOMS)
        .unwrap();

    for s in ["a", "ab", "abc", "b"] {
        let atom = tree.keys().intern_str(&mut arena, s);
        assert!(!tree.add(&mut arena, atom.into(), 0).is_null());
    }

    let mut visited = Vec::new();
    let mut node = tree.subtree_match(&arena, 16, b"ab");
    while !node.is_null() {
        visited.push(tree.key(&arena, node).unwrap().to_vec());
        node = tree.subtree_next(&arena, node, 16);
    }

    assert_eq!(visited, vec![nul("ab"), nul("abc")]);
    assert!(!tree.get(&arena, &nul("abc")).is_null());
    assert!(tree.get(&arena, &nul("abcd")).is_null());
}

// ============================================================================
// ARBITRARY-SIZE POOL
// ============================================================================

#[test]
fn small_blocks_reuse_slots_and_large_blocks_take_pages() {
    let mut arena = Arena::anonymous().unwrap();
    let pool = ArbPool::open(&mut arena, "heap").unwrap();
    let slot = slot_for(10).unwrap();

    let small = pool.alloc(&mut arena, 10);
    let large = pool.alloc(&mut arena, 5000);

    assert!(slot_for(5000).is_none());
    assert!(pool.usable_size(&arena, small).unwrap() >= 10);
    assert!(pool.usable_size(&arena, small).unwrap() < ARENA_ATOM_SIZE);
    assert_eq!(large.raw() & 0xff, 0, "large blocks start on a page");
    assert_eq!(pool.usable_size(&arena, large), Some(2 * ARENA_ATOM_SIZE - 8));

    let spare = pool.free_chunks(&arena, slot);
    pool.free(&mut arena, small);
    assert_eq!(pool.free_chunks(&arena, slot), spare + 1);

    let len_before = arena.len();
    let again = pool.alloc(&mut arena, 10);
    assert_eq!(again, small);
    assert_eq!(pool.free_chunks(&arena, slot), spare);
    assert_eq!(arena.len(), len_before);
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn every_pool_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("all.pdb");

    let (fixed_atom, blob, id) = {
        let mut arena = Arena::open(&path).unwrap();
        let fixed = FixedPool::open(&mut arena, "records", 4, 24, 1024).unwrap();
        let heap = ArbPool::open(&mut arena, "heap").unwrap();
        let bitmaps = BitmapPool::open(&mut arena, "bits").unwrap();
        let pool = strings(&mut arena);
        let tree = PatriciaTree::open(&mut arena, "names", pool, 6, 4096).unwrap();

        let fixed_atom = fixed.alloc(&mut arena);
        fixed.addr_mut(&mut arena, fixed_atom).unwrap()[..6].copy_from_slice(b"record");

        let blob = heap.alloc_bytes(&mut arena, &[7u8; 3000]);

        let id = bitmaps.alloc(&mut arena);
        bitmaps.set(&mut arena, id, 12);
        bitmaps.set(&mut arena, id, 40_000);

        for s in ["kea", "kaka", "kakapo"] {
            let atom = tree.keys().intern_str(&mut arena, s);
            tree.add(&mut arena, atom.into(), 0);
        }
        arena.sync().unwrap();
        (fixed_atom, blob, id)
    };

    let mut arena = Arena::open(&path).unwrap();
    let fixed = FixedPool::open(&mut arena, "records", 0, 0, 0).unwrap();
    let heap = ArbPool::open(&mut arena, "heap").unwrap();
    let bitmaps = BitmapPool::open(&mut arena, "bits").unwrap();
    let pool = strings(&mut arena);
    let tree = PatriciaTree::open(&mut arena, "names", pool, 6, 4096).unwrap();

    assert_eq!(&fixed.addr(&arena, fixed_atom).unwrap()[..6], b"record");
    assert!(heap.addr(&arena, blob).unwrap()[..3000].iter().all(|&b| b == 7));
    assert_eq!(bitmaps.iter(&arena, id).collect::<Vec<_>>(), vec![12, 40_000]);

    let keys: Vec<Vec<u8>> = tree
        .iter(&arena)
        .map(|n| tree.key(&arena, n).unwrap().to_vec())
        .collect();
    assert_eq!(keys, vec![nul("kaka"), nul("kakapo"), nul("kea")]);

    let names: Vec<String> = arena.headers().into_iter().map(|h| h.name).collect();
    for expected in ["records", "heap", "bits", "strings", "names", "names.root"] {
        assert!(names.iter().any(|n| n == expected), "missing header {expected}");
    }
}

#[test]
fn read_only_reopen_refuses_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ro.pdb");

    let atom = {
        let mut arena = Arena::open(&path).unwrap();
        let pool = strings(&mut arena);
        pool.intern_str(&mut arena, "frozen")
    };

    let mut arena = Arena::builder().path(&path).read_only(true).open().unwrap();
    let pool = strings(&mut arena);

    assert_eq!(pool.resolve(&arena, atom), Some(&b"frozen"[..]));
    assert!(pool.intern_str(&mut arena, "thawed").is_null());
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[test]
fn config_file_overrides_pool_geometry() {
    let dir = tempdir().unwrap();
    let conf = dir.path().join("parrot.conf");
    std::fs::write(
        &conf,
        "# pool geometry\nrecords.shift = 3\nrecords.max-atoms = 1 << 10\nrecords.atom-size=64\n",
    )
    .unwrap();

    let config = Config::from_file(&conf).unwrap();
    let mut arena = Arena::builder().config(config).open().unwrap();
    let pool = FixedPool::open(&mut arena, "records", 6, 16, 64).unwrap();

    assert_eq!(pool.shift(&arena), 3);
    assert_eq!(pool.max_atoms(&arena), 1024);
    assert_eq!(pool.atom_size(&arena), 64);
}
