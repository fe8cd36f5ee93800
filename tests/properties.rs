//! # Model-Checked Properties
//!
//! Random operation sequences are replayed against a pool and against a
//! std collection that models it:
//!
//! - fixed and arbitrary-size pools: live atoms never share bytes
//! - string pool: every interned string resolves to itself plus a NUL
//! - patricia trie: iteration, `getnext`, `find_next`/`find_prev` and
//!   deletion agree with a `BTreeMap`, both for NUL-terminated interned keys
//!   and for raw explicit-length keys where prefixes conflict
//! - bitmaps: `test` and `find_next` agree with a `BTreeSet`

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};

use parrotdb::bitmap::{FIND_DONE, FIND_START, MAX_BIT};
use parrotdb::config::{ISTR_DEFAULT_ATOM_SHIFT, ISTR_DEFAULT_MAX_ATOMS, ISTR_DEFAULT_SHIFT};
use parrotdb::{Arena, ArbAtom, ArbPool, BitmapPool, FixedAtom, FixedPool, PatAtom, PatriciaTree, StringPool};
use proptest::prelude::*;

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

/// Keys without interior NULs, so the stored `key\0` forms are prefix-free.
fn word() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(1u8..=255, 0..12)
}

fn with_nul(bytes: &[u8]) -> Vec<u8> {
    let mut key = bytes.to_vec();
    key.push(0);
    key
}

/// Short keys over a tiny alphabet, so prefixes and repeats are common.
fn raw_key() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(0u8..4, 1..5)
}

#[derive(Debug, Clone)]
enum TrieOp {
    Add(Vec<u8>),
    Delete(usize),
}

fn trie_ops() -> impl Strategy<Value = Vec<TrieOp>> {
    proptest::collection::vec(
        prop_oneof![
            3 => raw_key().prop_map(TrieOp::Add),
            1 => any::<usize>().prop_map(TrieOp::Delete),
        ],
        1..80,
    )
}

fn first_node<'a, I>(mut entries: I) -> PatAtom
where
    I: Iterator<Item = (&'a Vec<u8>, &'a PatAtom)>,
{
    entries.next().map_or(PatAtom::NULL, |(_, node)| *node)
}

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    Free(usize),
}

fn ops(max_size: usize) -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(
        prop_oneof![
            3 => (1..=max_size).prop_map(Op::Alloc),
            2 => any::<usize>().prop_map(Op::Free),
        ],
        1..120,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn fixed_atoms_keep_their_contents(ops in ops(1)) {
        let mut arena = Arena::anonymous().unwrap();
        let pool = FixedPool::open(&mut arena, "slots", 3, 16, 4096).unwrap();
        let mut live: Vec<(FixedAtom, u8)> = Vec::new();
        let mut stamp = 0u8;

        for op in ops {
            match op {
                Op::Alloc(_) => {
                    let atom = pool.alloc(&mut arena);
                    prop_assert!(!atom.is_null());
                    prop_assert!(live.iter().all(|(a, _)| *a != atom));
                    stamp = stamp.wrapping_add(1);
                    pool.addr_mut(&mut arena, atom).unwrap().fill(stamp);
                    live.push((atom, stamp));
                }
                Op::Free(i) if !live.is_empty() => {
                    let (atom, _) = live.swap_remove(i % live.len());
                    pool.free(&mut arena, atom);
                }
                Op::Free(_) => {}
            }
        }

        for (atom, stamp) in &live {
            prop_assert!(pool.addr(&arena, *atom).unwrap().iter().all(|b| b == stamp));
        }
    }

    #[test]
    fn arb_blocks_keep_their_contents(ops in ops(9000)) {
        let mut arena = Arena::anonymous().unwrap();
        let pool = ArbPool::open(&mut arena, "heap").unwrap();
        let mut live: Vec<(ArbAtom, usize, u8)> = Vec::new();
        let mut stamp = 0u8;

        for op in ops {
            match op {
                Op::Alloc(size) => {
                    let atom = pool.alloc(&mut arena, size);
                    prop_assert!(!atom.is_null());
                    prop_assert!(pool.usable_size(&arena, atom).unwrap() >= size);
                    stamp = stamp.wrapping_add(1);
                    pool.addr_mut(&mut arena, atom).unwrap()[..size].fill(stamp);
                    live.push((atom, size, stamp));
                }
                Op::Free(i) if !live.is_empty() => {
                    let (atom, _, _) = live.swap_remove(i % live.len());
                    pool.free(&mut arena, atom);
                }
                Op::Free(_) => {}
            }
        }

        for (atom, size, stamp) in &live {
            let bytes = pool.addr(&arena, *atom).unwrap();
            prop_assert!(bytes[..*size].iter().all(|b| b == stamp));
        }
    }

    #[test]
    fn interned_strings_resolve(words in proptest::collection::vec(any::<Vec<u8>>(), 1..60)) {
        let mut arena = Arena::anonymous().unwrap();
        let pool = strings(&mut arena);

        let atoms: Vec<_> = words.iter().map(|w| pool.intern(&mut arena, w)).collect();

        for (word, atom) in words.iter().zip(&atoms) {
            let stored = with_nul(word);
            prop_assert_eq!(pool.resolve_nul(&arena, *atom), Some(&stored[..]));
            prop_assert_eq!(pool.resolve(&arena, *atom), Some(&word[..]));
        }
    }

    #[test]
    fn trie_agrees_with_btreeset(
        words in proptest::collection::vec(word(), 1..60),
        lookups in proptest::collection::vec(word(), 1..20),
        removals in proptest::collection::vec(any::<usize>(), 0..30),
    ) {
        let mut arena = Arena::anonymous().unwrap();
        let pool = strings(&mut arena);
        let tree = PatriciaTree::open(&mut arena, "index", pool, 6, 1 << 12).unwrap();
        let mut model: BTreeMap<Vec<u8>, PatAtom> = BTreeMap::new();

        for w in &words {
            let data = tree.keys().intern(&mut arena, w);
            let node = tree.add(&mut arena, data.into(), 0);
            let key = with_nul(w);
            if model.contains_key(&key) {
                prop_assert!(node.is_null());
            } else {
                prop_assert!(!node.is_null());
                model.insert(key, node);
            }
        }

        for i in removals {
            if model.is_empty() {
                break;
            }
            let key = model.keys().nth(i % model.len()).unwrap().clone();
            let node = model.remove(&key).unwrap();
            prop_assert!(tree.delete(&mut arena, node));
            prop_assert!(tree.get(&arena, &key).is_null());
        }

        let in_order: Vec<PatAtom> = tree.iter(&arena).collect();
        prop_assert_eq!(&in_order, &model.values().copied().collect::<Vec<_>>());
        prop_assert_eq!(tree.len(&arena) as usize, model.len());

        for pair in in_order.windows(2) {
            prop_assert_eq!(tree.find_prev(&arena, pair[1]), pair[0]);
        }
        for (key, node) in &model {
            prop_assert_eq!(tree.get(&arena, key), *node);
        }

        for lookup in lookups {
            let lookup = with_nul(&lookup);
            let strict = model
                .range::<Vec<u8>, _>((Excluded(&lookup), Unbounded))
                .next()
                .map_or(PatAtom::NULL, |(_, node)| *node);
            let inclusive = model
                .range::<Vec<u8>, _>(&lookup..)
                .next()
                .map_or(PatAtom::NULL, |(_, node)| *node);

            prop_assert_eq!(tree.getnext(&arena, &lookup, false), strict);
            prop_assert_eq!(tree.getnext(&arena, &lookup, true), inclusive);
        }
    }

    #[test]
    fn raw_key_trie_agrees_with_btreemap(
        ops in trie_ops(),
        lookups in proptest::collection::vec(proptest::collection::vec(0u8..4, 1..6), 1..24),
    ) {
        let mut arena = Arena::anonymous().unwrap();
        let pool = ArbPool::open(&mut arena, "keys").unwrap();
        let tree = PatriciaTree::open(&mut arena, "raw", pool, 6, 1 << 12).unwrap();
        let mut model: BTreeMap<Vec<u8>, PatAtom> = BTreeMap::new();

        for op in ops {
            match op {
                TrieOp::Add(key) => {
                    let data = tree.keys().alloc_bytes(&mut arena, &key);
                    let node = tree.add(&mut arena, data.into(), key.len());
                    let conflict = model
                        .keys()
                        .any(|k| k.starts_with(&key) || key.starts_with(k));
                    if conflict {
                        prop_assert!(node.is_null(), "{:?} should conflict", key);
                        tree.keys().free(&mut arena, data);
                    } else {
                        prop_assert!(!node.is_null(), "{:?} should be added", key);
                        model.insert(key, node);
                    }
                }
                TrieOp::Delete(i) if !model.is_empty() => {
                    let key = model.keys().nth(i % model.len()).unwrap().clone();
                    let node = model.remove(&key).unwrap();
                    prop_assert!(tree.delete(&mut arena, node));
                    prop_assert!(tree.get(&arena, &key).is_null());
                }
                TrieOp::Delete(_) => {}
            }
        }

        let in_order: Vec<PatAtom> = tree.iter(&arena).collect();
        prop_assert_eq!(&in_order, &model.values().copied().collect::<Vec<_>>());
        for pair in in_order.windows(2) {
            prop_assert_eq!(tree.find_next(&arena, pair[0]), pair[1]);
            prop_assert_eq!(tree.find_prev(&arena, pair[1]), pair[0]);
        }
        for (key, node) in &model {
            prop_assert_eq!(tree.get(&arena, key), *node);
            prop_assert_eq!(tree.key(&arena, *node), Some(&key[..]));
        }

        for lookup in lookups {
            let strict = first_node(model.range::<Vec<u8>, _>((Excluded(&lookup), Unbounded)));
            let inclusive = first_node(model.range::<Vec<u8>, _>(&lookup..));
            prop_assert_eq!(tree.getnext(&arena, &lookup, false), strict, "after {:?}", lookup);
            prop_assert_eq!(tree.getnext(&arena, &lookup, true), inclusive, "from {:?}", lookup);

            let expected: Vec<PatAtom> = model
                .iter()
                .filter(|(k, _)| k.starts_with(&lookup))
                .map(|(_, node)| *node)
                .collect();
            let plen = lookup.len() * 8;
            let mut walked = Vec::new();
            let mut node = tree.subtree_match(&arena, plen, &lookup);
            while !node.is_null() {
                walked.push(node);
                node = tree.subtree_next(&arena, node, plen);
            }
            prop_assert_eq!(walked, expected, "under {:?}", lookup);
        }
    }

    #[test]
    fn bitmap_agrees_with_btreeset(
        bits in proptest::collection::vec(0u32..MAX_BIT, 0..80),
        cleared in proptest::collection::vec(any::<usize>(), 0..20),
    ) {
        let mut arena = Arena::anonymous().unwrap();
        let maps = BitmapPool::open(&mut arena, "bits").unwrap();
        let id = maps.alloc(&mut arena);
        let mut model = BTreeSet::new();

        for &b in &bits {
            maps.set(&mut arena, id, b);
            model.insert(b);
        }
        for i in cleared {
            if bits.is_empty() {
                break;
            }
            let b = bits[i % bits.len()];
            maps.clear(&mut arena, id, b);
            model.remove(&b);
        }

        for &b in &bits {
            prop_assert_eq!(maps.test(&arena, id, b), model.contains(&b));
        }
        prop_assert_eq!(maps.iter(&arena, id).collect::<Vec<_>>(), model.iter().copied().collect::<Vec<_>>());

        let first = maps.find_next(&arena, id, FIND_START);
        prop_assert_eq!(first, model.iter().next().copied().unwrap_or(FIND_DONE));
    }
}
