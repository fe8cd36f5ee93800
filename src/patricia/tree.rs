//! Trie operations.
//!
//! Every walk starts at the root and follows `left`/`right` while the tested
//! bit strictly increases. The first link whose target does not test a
//! greater bit is an up-link, and its target is the leaf for the key. There
//! is no parent pointer; operations that change links re-walk from the root
//! and remember the [`Link`] they came through.

use std::cmp::Ordering;

use eyre::Result;
use smallvec::SmallVec;
use zerocopy::{FromBytes, IntoBytes};

use crate::atom::{FixedAtom, PatAtom, PatDataAtom};
use crate::config::{Config, PAT_MAX_KEY, PAT_NODE_SIZE};
use crate::fixed::FixedPool;
use crate::storage::{Arena, HeaderType};

use super::bits::{key_test, length_to_bit, mismatch, plen_to_bit, NOBIT};
use super::node::{PatInfo, PatNode, PAT_INFO_SIZE};
use super::KeySource;

type KeyBuf = SmallVec<[u8; 64]>;

/// A place that holds a node atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Root,
    Left(PatAtom),
    Right(PatAtom),
}

impl Link {
    fn toward(atom: PatAtom, right: bool) -> Self {
        if right {
            Link::Right(atom)
        } else {
            Link::Left(atom)
        }
    }
}

/// A patricia trie whose nodes live in a fixed-size pool and whose keys are
/// read through `K`.
#[derive(Debug, Clone)]
pub struct PatriciaTree<K> {
    name: String,
    info: usize,
    nodes: FixedPool,
    keys: K,
}

impl<K: KeySource> PatriciaTree<K> {
    /// Opens or creates the trie `name`. Nodes go to the fixed pool `name`
    /// (`shift` and `max_atoms` overridable under that name); the root lives
    /// in the header `<name>.root`.
    pub fn open(arena: &mut Arena, name: &str, keys: K, shift: u32, max_atoms: u32) -> Result<Self> {
        let nodes = FixedPool::open(arena, name, shift, PAT_NODE_SIZE, max_atoms)?;

        let root_name = Config::name(name, "root");
        let slot = arena
            .named_header(&root_name, HeaderType::Pat, PAT_INFO_SIZE)
            .ok_or_else(|| eyre::eyre!("patricia root header '{}' is unavailable", root_name))?;

        let tree = Self {
            name: name.to_string(),
            info: slot.offset(),
            nodes,
            keys,
        };

        let root = tree.root(arena);
        if !root.is_null() && tree.node(arena, root).is_none() {
            let msg = format!("patricia tree '{}' root {} is not a live node", name, root);
            arena.diagnostics().format(msg.clone());
            eyre::bail!(msg);
        }

        Ok(tree)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    pub fn nodes(&self) -> &FixedPool {
        &self.nodes
    }

    fn info(&self, arena: &Arena) -> Option<PatInfo> {
        PatInfo::read_from_bytes(arena.bytes(self.info, PAT_INFO_SIZE)?).ok()
    }

    fn info_mut<'a>(&self, arena: &'a mut Arena) -> Option<&'a mut PatInfo> {
        PatInfo::mut_from_bytes(arena.bytes_mut(self.info, PAT_INFO_SIZE)?).ok()
    }

    pub fn root(&self, arena: &Arena) -> PatAtom {
        self.info(arena).map_or(PatAtom::NULL, |i| PatAtom::new(i.root()))
    }

    pub fn len(&self, arena: &Arena) -> u32 {
        self.info(arena).map_or(0, |i| i.count())
    }

    pub fn is_empty(&self, arena: &Arena) -> bool {
        self.root(arena).is_null()
    }

    /// A copy of the node behind `atom`.
    pub fn node(&self, arena: &Arena, atom: PatAtom) -> Option<PatNode> {
        if atom.is_null() {
            return None;
        }
        let bytes = self.nodes.addr(arena, FixedAtom::new(atom.raw()))?;
        PatNode::read_from_prefix(bytes).ok().map(|(node, _)| node)
    }

    fn store(&self, arena: &mut Arena, atom: PatAtom, node: &PatNode) -> Option<()> {
        let bytes = self.nodes.addr_mut(arena, FixedAtom::new(atom.raw()))?;
        bytes[..PAT_NODE_SIZE as usize].copy_from_slice(node.as_bytes());
        Some(())
    }

    pub fn data(&self, arena: &Arena, atom: PatAtom) -> PatDataAtom {
        self.node(arena, atom).map_or(PatDataAtom::NULL, |n| n.data())
    }

    /// The key of a node, trimmed to the node's length.
    pub fn key<'a>(&self, arena: &'a Arena, atom: PatAtom) -> Option<&'a [u8]> {
        let node = self.node(arena, atom)?;
        self.node_key(arena, &node)
    }

    fn node_key<'a>(&self, arena: &'a Arena, node: &PatNode) -> Option<&'a [u8]> {
        let key = self.keys.key(arena, node.data());
        match key.and_then(|k| k.get(..node.key_len())) {
            Some(key) => Some(key),
            None => {
                arena.diagnostics().format(format!(
                    "patricia tree '{}': no {}-byte key for {}",
                    self.name,
                    node.key_len(),
                    node.data()
                ));
                None
            }
        }
    }

    fn follow(&self, arena: &Arena, link: Link) -> PatAtom {
        match link {
            Link::Root => self.root(arena),
            Link::Left(atom) => self.node(arena, atom).map_or(PatAtom::NULL, |n| n.left()),
            Link::Right(atom) => self.node(arena, atom).map_or(PatAtom::NULL, |n| n.right()),
        }
    }

    fn relink(&self, arena: &mut Arena, link: Link, target: PatAtom) -> Option<()> {
        match link {
            Link::Root => {
                self.info_mut(arena)?.set_root(target.raw());
                Some(())
            }
            Link::Left(atom) => {
                let mut node = self.node(arena, atom)?;
                node.set_left(target);
                self.store(arena, atom, &node)
            }
            Link::Right(atom) => {
                let mut node = self.node(arena, atom)?;
                node.set_right(target);
                self.store(arena, atom, &node)
            }
        }
    }

    fn adjust_count(&self, arena: &mut Arena, added: bool) {
        if let Some(info) = self.info_mut(arena) {
            let count = if added {
                info.count().saturating_add(1)
            } else {
                info.count().saturating_sub(1)
            };
            info.set_count(count);
        }
    }

    /// Descends on `key` to the leaf it would meet.
    fn search(&self, arena: &Arena, keylen: u16, key: &[u8]) -> Option<(PatAtom, PatNode)> {
        let mut atom = self.root(arena);
        let mut node = self.node(arena, atom)?;
        let mut bit = NOBIT;

        while bit < node.bit() {
            bit = node.bit();
            atom = if bit < keylen && key_test(key, bit) {
                node.right()
            } else {
                node.left()
            };
            node = self.node(arena, atom)?;
        }

        Some((atom, node))
    }

    fn leftmost(&self, arena: &Arena, mut bit: u16, mut atom: PatAtom) -> PatAtom {
        while let Some(node) = self.node(arena, atom) {
            if bit >= node.bit() {
                return atom;
            }
            bit = node.bit();
            atom = node.left();
        }
        PatAtom::NULL
    }

    fn rightmost(&self, arena: &Arena, mut bit: u16, mut atom: PatAtom) -> PatAtom {
        while let Some(node) = self.node(arena, atom) {
            if bit >= node.bit() {
                return atom;
            }
            bit = node.bit();
            atom = node.right();
        }
        PatAtom::NULL
    }

    /// Inserts a node for `data`, keyed by the first `len` bytes of its key
    /// (all of it when `len` is 0).
    ///
    /// A key equal to, or a prefix of, one already present is refused with a
    /// logic diagnostic and `PatAtom::NULL`; the tree is unchanged.
    pub fn add(&self, arena: &mut Arena, data: PatDataAtom, len: usize) -> PatAtom {
        if data.is_null() {
            arena
                .diagnostics()
                .logic(format!("patricia tree '{}': add of a null data atom", self.name));
            return PatAtom::NULL;
        }

        let key: KeyBuf = match self.keys.key(arena, data) {
            Some(full) => {
                let len = if len == 0 { full.len() } else { len };
                if len == 0 || len > PAT_MAX_KEY || len > full.len() {
                    arena.diagnostics().logic(format!(
                        "patricia tree '{}': key of {} bytes for {} is unusable",
                        self.name, len, data
                    ));
                    return PatAtom::NULL;
                }
                SmallVec::from_slice(&full[..len])
            }
            None => {
                arena
                    .diagnostics()
                    .logic(format!("patricia tree '{}': {} has no key", self.name, data));
                return PatAtom::NULL;
            }
        };
        let length = length_to_bit(key.len());

        if self.is_empty(arena) {
            let atom = self.alloc_node(arena);
            if atom.is_null() {
                return atom;
            }
            let mut node = PatNode::detached(length, data);
            node.set_left(atom);
            node.set_right(atom);
            if self.store(arena, atom, &node).is_none() || self.relink(arena, Link::Root, atom).is_none() {
                return PatAtom::NULL;
            }
            self.adjust_count(arena, true);
            return atom;
        }

        let Some((_, found)) = self.search(arena, length, &key) else {
            return PatAtom::NULL;
        };
        let Some(found_key) = self.node_key(arena, &found) else {
            return PatAtom::NULL;
        };
        let min = length.min(found.length());
        let diff = mismatch(&key, found_key, min);
        if diff >= min {
            arena.diagnostics().logic(format!(
                "patricia tree '{}': key for {} duplicates or prefixes the key of {}",
                self.name,
                data,
                found.data()
            ));
            return PatAtom::NULL;
        }

        let mut link = Link::Root;
        let mut current = self.root(arena);
        let mut bit = NOBIT;
        while let Some(node) = self.node(arena, current) {
            if bit >= node.bit() || node.bit() >= diff {
                break;
            }
            bit = node.bit();
            link = Link::toward(current, key_test(&key, bit));
            current = self.follow(arena, link);
        }

        let atom = self.alloc_node(arena);
        if atom.is_null() {
            return atom;
        }

        let mut node = PatNode::detached(length, data);
        node.set_bit(diff);
        if key_test(&key, diff) {
            node.set_left(current);
            node.set_right(atom);
        } else {
            node.set_left(atom);
            node.set_right(current);
        }
        if self.store(arena, atom, &node).is_none() || self.relink(arena, link, atom).is_none() {
            return PatAtom::NULL;
        }
        self.adjust_count(arena, true);
        atom
    }

    fn alloc_node(&self, arena: &mut Arena) -> PatAtom {
        PatAtom::new(self.nodes.alloc(arena).raw())
    }

    /// Exact-match lookup.
    pub fn get(&self, arena: &Arena, key: &[u8]) -> PatAtom {
        if key.is_empty() || key.len() > PAT_MAX_KEY {
            return PatAtom::NULL;
        }
        let length = length_to_bit(key.len());
        let Some((atom, node)) = self.search(arena, length, key) else {
            return PatAtom::NULL;
        };
        if node.length() != length {
            return PatAtom::NULL;
        }
        match self.node_key(arena, &node) {
            Some(found) if found == key => atom,
            _ => PatAtom::NULL,
        }
    }

    /// Smallest node whose key is greater than `key`, or equal to it when
    /// `eq` is set.
    pub fn getnext(&self, arena: &Arena, key: &[u8], eq: bool) -> PatAtom {
        if key.is_empty() || key.len() > PAT_MAX_KEY {
            return PatAtom::NULL;
        }
        let root = self.root(arena);
        let Some(root_node) = self.node(arena, root) else {
            return PatAtom::NULL;
        };

        let bit_len = length_to_bit(key.len());
        let mut bit = NOBIT;
        let mut current = root;
        let mut cur = root_node;
        let mut lastleft = PatAtom::NULL;
        let mut lastright = PatAtom::NULL;

        while bit < cur.bit() {
            bit = cur.bit();
            if bit < bit_len && key_test(key, bit) {
                lastright = current;
                current = cur.right();
            } else {
                lastleft = current;
                current = cur.left();
            }
            let Some(next) = self.node(arena, current) else {
                return PatAtom::NULL;
            };
            cur = next;
        }

        let Some(found_key) = self.node_key(arena, &cur) else {
            return PatAtom::NULL;
        };
        let min = bit_len.min(cur.length());
        let diff = mismatch(key, found_key, min);

        if diff >= min {
            // Equal, or one is a prefix of the other.
            if bit_len < cur.length() || (eq && bit_len == cur.length()) {
                return current;
            }
        } else if key_test(key, diff) {
            // The key sorts after the leaf. Turn right at the last left turn
            // taken above the differing bit.
            let above = self.node(arena, lastleft).is_some_and(|n| n.bit() > diff);
            if above {
                bit = NOBIT;
                current = root;
                cur = root_node;
                lastleft = PatAtom::NULL;
                while bit < cur.bit() && cur.bit() < diff {
                    bit = cur.bit();
                    if key_test(key, bit) {
                        current = cur.right();
                    } else {
                        lastleft = current;
                        current = cur.left();
                    }
                    let Some(next) = self.node(arena, current) else {
                        return PatAtom::NULL;
                    };
                    cur = next;
                }
            }
        } else {
            // The key sorts before the leaf. The leaf is the answer unless a
            // right turn below the differing bit skipped smaller keys.
            if self.node(arena, lastright).is_some_and(|n| n.bit() >= diff) {
                return self.search(arena, diff, key).map_or(PatAtom::NULL, |(atom, _)| atom);
            }
            return current;
        }

        match self.node(arena, lastleft) {
            Some(turn) => self.leftmost(arena, turn.bit(), turn.right()),
            None => PatAtom::NULL,
        }
    }

    /// Walks to `atom`, returning the last nodes where the walk went left
    /// and right. `None` if `atom` is not in the tree.
    fn turns(&self, arena: &Arena, atom: PatAtom) -> Option<(PatAtom, PatAtom)> {
        let target = self.node(arena, atom)?;
        let key = self.node_key(arena, &target)?;

        let mut current = self.root(arena);
        let mut cur = self.node(arena, current)?;
        let mut bit = NOBIT;
        let mut lastleft = PatAtom::NULL;
        let mut lastright = PatAtom::NULL;

        while bit < cur.bit() {
            bit = cur.bit();
            if bit < target.length() && key_test(key, bit) {
                lastright = current;
                current = cur.right();
            } else {
                lastleft = current;
                current = cur.left();
            }
            cur = self.node(arena, current)?;
        }

        if current != atom {
            arena.diagnostics().logic(format!(
                "patricia tree '{}': {} is not in the tree",
                self.name, atom
            ));
            return None;
        }
        Some((lastleft, lastright))
    }

    /// The node after `atom` in key order; the first node when `atom` is
    /// null.
    pub fn find_next(&self, arena: &Arena, atom: PatAtom) -> PatAtom {
        if atom.is_null() {
            return self.leftmost(arena, NOBIT, self.root(arena));
        }
        match self.turns(arena, atom) {
            Some((lastleft, _)) => match self.node(arena, lastleft) {
                Some(turn) => self.leftmost(arena, turn.bit(), turn.right()),
                None => PatAtom::NULL,
            },
            None => PatAtom::NULL,
        }
    }

    /// The node before `atom` in key order; the last node when `atom` is
    /// null.
    pub fn find_prev(&self, arena: &Arena, atom: PatAtom) -> PatAtom {
        if atom.is_null() {
            return self.rightmost(arena, NOBIT, self.root(arena));
        }
        match self.turns(arena, atom) {
            Some((_, lastright)) => match self.node(arena, lastright) {
                Some(turn) => self.rightmost(arena, turn.bit(), turn.left()),
                None => PatAtom::NULL,
            },
            None => PatAtom::NULL,
        }
    }

    fn prefix_bits_ok(&self, arena: &Arena, plen: usize, prefix: &[u8]) -> bool {
        if plen == 0 || plen > PAT_MAX_KEY * 8 || prefix.len() < plen.div_ceil(8) {
            arena.diagnostics().logic(format!(
                "patricia tree '{}': bad prefix of {} bits over {} bytes",
                self.name,
                plen,
                prefix.len()
            ));
            return false;
        }
        true
    }

    /// First node whose key starts with the leading `plen` bits of `prefix`.
    pub fn subtree_match(&self, arena: &Arena, plen: usize, prefix: &[u8]) -> PatAtom {
        if !self.prefix_bits_ok(arena, plen, prefix) {
            return PatAtom::NULL;
        }
        let p_bit = plen_to_bit(plen);
        let Some((atom, node)) = self.search(arena, p_bit, prefix) else {
            return PatAtom::NULL;
        };
        if p_bit > node.length() {
            return PatAtom::NULL;
        }
        match self.node_key(arena, &node) {
            Some(key) if mismatch(prefix, key, p_bit) >= p_bit => atom,
            _ => PatAtom::NULL,
        }
    }

    /// The node after `atom` among those sharing its first `plen` bits.
    pub fn subtree_next(&self, arena: &Arena, atom: PatAtom, plen: usize) -> PatAtom {
        let Some(node) = self.node(arena, atom) else {
            return PatAtom::NULL;
        };
        if plen == 0 || plen > node.key_len() * 8 {
            arena.diagnostics().logic(format!(
                "patricia tree '{}': prefix of {} bits is longer than the key of {}",
                self.name, plen, atom
            ));
            return PatAtom::NULL;
        }
        let p_bit = plen_to_bit(plen);

        let Some((lastleft, _)) = self.turns(arena, atom) else {
            return PatAtom::NULL;
        };
        match self.node(arena, lastleft) {
            Some(turn) if turn.bit() >= p_bit => self.leftmost(arena, turn.bit(), turn.right()),
            _ => PatAtom::NULL,
        }
    }

    /// Orders two nodes by key. Keys equal up to the shorter length compare
    /// equal.
    pub fn compare_nodes(&self, arena: &Arena, a: PatAtom, b: PatAtom) -> Option<Ordering> {
        let na = self.node(arena, a)?;
        let nb = self.node(arena, b)?;
        let ka = self.node_key(arena, &na)?;
        let kb = self.node_key(arena, &nb)?;

        let min = na.length().min(nb.length());
        let diff = mismatch(ka, kb, min);
        Some(if diff >= min {
            Ordering::Equal
        } else if key_test(ka, diff) {
            Ordering::Greater
        } else {
            Ordering::Less
        })
    }

    /// Unlinks `atom` and returns its slot to the node pool.
    ///
    /// Every node appears twice: once as the internal node testing its bit
    /// (reached through `down`) and once as a leaf (reached through an
    /// up-link in `up`). The internal role of `up` is dissolved by promoting
    /// its other child, then `up` takes over the internal role of `atom`.
    pub fn delete(&self, arena: &mut Arena, atom: PatAtom) -> bool {
        if arena.is_read_only() {
            arena
                .diagnostics()
                .logic(format!("patricia tree '{}': delete on a read-only arena", self.name));
            return false;
        }

        let Some(target) = self.node(arena, atom) else {
            arena
                .diagnostics()
                .logic(format!("patricia tree '{}': delete of unknown {}", self.name, atom));
            return false;
        };
        let Some(key) = self.node_key(arena, &target).map(KeyBuf::from_slice) else {
            return false;
        };

        let mut current = self.root(arena);
        let mut bit = NOBIT;
        let mut parent = Link::Root;
        let mut upptr: Option<Link> = None;
        let mut downptr: Option<Link> = None;

        while let Some(cur) = self.node(arena, current) {
            if bit >= cur.bit() {
                break;
            }
            bit = cur.bit();
            if current == atom {
                downptr = Some(parent);
            }
            upptr = Some(parent);
            parent = Link::toward(current, bit < target.length() && key_test(&key, bit));
            current = self.follow(arena, parent);
        }

        if current != atom {
            arena.diagnostics().logic(format!(
                "patricia tree '{}': {} is not in the tree",
                self.name, atom
            ));
            return false;
        }

        let done = match (upptr, parent) {
            (None, _) => self.relink(arena, Link::Root, PatAtom::NULL),
            (Some(_), Link::Root) => None,
            (Some(up_link), Link::Left(up) | Link::Right(up)) => {
                self.unlink(arena, atom, up_link, up, parent, downptr)
            }
        };
        if done.is_none() {
            arena.diagnostics().format(format!(
                "patricia tree '{}': links broke while deleting {}",
                self.name, atom
            ));
            return false;
        }

        self.adjust_count(arena, false);
        self.nodes.free(arena, FixedAtom::new(atom.raw()));
        true
    }

    fn unlink(
        &self,
        arena: &mut Arena,
        atom: PatAtom,
        up_link: Link,
        up: PatAtom,
        leaf_link: Link,
        downptr: Option<Link>,
    ) -> Option<()> {
        let up_node = self.node(arena, up)?;
        let sibling = if leaf_link == Link::Left(up) {
            up_node.right()
        } else {
            up_node.left()
        };
        self.relink(arena, up_link, sibling)?;

        match downptr {
            None => {
                // `atom` was the anchor; `up` becomes the new one.
                let mut anchor = self.node(arena, up)?;
                anchor.set_bit(NOBIT);
                anchor.set_left(up);
                anchor.set_right(up);
                self.store(arena, up, &anchor)
            }
            Some(down) if up != atom => {
                let old = self.node(arena, atom)?;
                let mut moved = self.node(arena, up)?;
                moved.set_bit(old.bit());
                moved.set_left(old.left());
                moved.set_right(old.right());
                self.store(arena, up, &moved)?;
                self.relink(arena, down, up)
            }
            Some(_) => Some(()),
        }
    }

    /// Nodes in ascending key order.
    pub fn iter<'a>(&'a self, arena: &'a Arena) -> Iter<'a, K> {
        Iter {
            tree: self,
            arena,
            next: self.find_next(arena, PatAtom::NULL),
        }
    }

    pub fn dump(&self, arena: &Arena) {
        tracing::debug!(
            name = %self.name,
            root = %self.root(arena),
            count = self.len(arena),
            "patricia tree dump"
        );
        for atom in self.iter(arena) {
            if let Some(node) = self.node(arena, atom) {
                tracing::trace!(
                    node = %atom,
                    bit = node.bit(),
                    length = node.key_len(),
                    left = %node.left(),
                    right = %node.right(),
                    data = %node.data(),
                    "patricia node"
                );
            }
        }
        self.nodes.dump(arena);
    }
}

pub struct Iter<'a, K> {
    tree: &'a PatriciaTree<K>,
    arena: &'a Arena,
    next: PatAtom,
}

impl<K: KeySource> Iterator for Iter<'_, K> {
    type Item = PatAtom;

    fn next(&mut self) -> Option<PatAtom> {
        let atom = self.next.non_null()?;
        self.next = self.tree.find_next(self.arena, atom);
        Some(atom)
    }
}
