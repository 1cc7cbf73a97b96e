//! In-memory B+tree.
//!
//! Every operation walks a single root-to-leaf path. Overfull internal nodes
//! are split and underfull ones refilled *before* the walk enters them, so a
//! change at the leaf never has to be propagated back up.

use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicU64};

use crate::btree::cursor::{Cursor, Direction, EndOfSequence, Entries};
use crate::btree::node::{InternalNode, LeafNode, Node, NodeArena, NodeId};
use crate::config::TreeConfig;

/// Counter for telling trees apart, so a cursor can check its owner.
static TREE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An ordered map backed by a B+tree.
///
/// Keys are ordered by the comparator `C`, which must be a consistent total
/// order for the whole lifetime of the tree.
///
/// The tree is not internally synchronized. Mutating methods take `&mut self`
/// and read-only methods take `&self`, so wrapping the tree in a
/// `std::sync::RwLock` gives exactly the required discipline: one writer, or
/// any number of readers and cursor steps.
pub struct BTree<K, V, C = fn(&K, &K) -> Ordering> {
    id: u64,
    cmp: C,
    config: TreeConfig,
    arena: NodeArena<K, V>,
    root: Option<NodeId>,
    first: Option<NodeId>,
    last: Option<NodeId>,
    count: usize,
    version: u64,
}

/// Where a descent for insertion ended.
struct LeafSlot {
    leaf: NodeId,
    /// Parent and the leaf's child index in it, `None` for a root leaf.
    parent: Option<(NodeId, usize)>,
    index: usize,
    exact: bool,
}

impl<K: Ord + Clone, V> BTree<K, V> {
    /// Create an empty tree ordered by `K`'s `Ord` implementation.
    #[must_use]
    pub fn ordered() -> Self {
        Self::new(K::cmp)
    }
}

impl<K: Ord + Clone, V> Default for BTree<K, V> {
    fn default() -> Self {
        Self::ordered()
    }
}

impl<K: Ord + Clone, V> FromIterator<(K, V)> for BTree<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tree = Self::ordered();
        tree.extend(iter);
        tree
    }
}

impl<K, V, C> Extend<(K, V)> for BTree<K, V, C>
where
    K: Clone,
    C: Fn(&K, &K) -> Ordering,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

impl<'t, K, V, C> IntoIterator for &'t BTree<K, V, C>
where
    K: Clone,
    C: Fn(&K, &K) -> Ordering,
{
    type Item = (&'t K, &'t V);
    type IntoIter = Entries<'t, K, V, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, C> std::fmt::Debug for BTree<K, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("len", &self.count)
            .field("version", &self.version)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<K, V, C> BTree<K, V, C>
where
    K: Clone,
    C: Fn(&K, &K) -> Ordering,
{
    /// Create an empty tree with the default fanout.
    #[must_use]
    pub fn new(cmp: C) -> Self {
        Self::with_config(cmp, TreeConfig::default())
    }

    /// Create an empty tree with the given fanout.
    #[must_use]
    pub fn with_config(cmp: C, config: TreeConfig) -> Self {
        Self {
            id: TREE_COUNTER.fetch_add(1, atomic::Ordering::Relaxed),
            cmp,
            config,
            arena: NodeArena::new(),
            root: None,
            first: None,
            last: None,
            count: 0,
            version: 0,
        }
    }

    /// Number of entries, O(1).
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mutation counter. Changes whenever an entry or leaf is touched.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Look up a value by key.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        let (leaf, index, exact) = self.locate(key)?;
        exact.then(|| &self.arena.leaf(leaf).entries[index].value)
    }

    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Smallest entry, if any.
    #[must_use]
    pub fn first(&self) -> Option<(&K, &V)> {
        let entry = self.arena.leaf(self.first?).entries.first()?;
        Some((&entry.key, &entry.value))
    }

    /// Largest entry, if any.
    #[must_use]
    pub fn last(&self) -> Option<(&K, &V)> {
        let entry = self.arena.leaf(self.last?).entries.last()?;
        Some((&entry.key, &entry.value))
    }

    /// Insert or overwrite the value for `key`.
    ///
    /// Returns the old value if updating, None if inserting. An overwrite
    /// counts as a mutation even when the value is unchanged.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        let Some(slot) = self.descend_for_insert(&key) else {
            self.plant_root(key, value);
            return None;
        };

        if slot.exact {
            self.bump();
            let entry = &mut self.arena.leaf_mut(slot.leaf).entries[slot.index];
            return Some(std::mem::replace(&mut entry.value, value));
        }

        self.insert_entry(&slot, key, value);
        None
    }

    /// Get and conditionally set `key` in a single walk.
    ///
    /// `update` receives the current value, if any. Returning `Some(new)`
    /// writes `new`; returning `None` leaves the tree's contents and version
    /// untouched.
    ///
    /// Returns the value held before the call and whether a write happened.
    /// When the updater declines to write, the current value is cloned into
    /// the result and stays in the tree.
    pub fn put<F>(&mut self, key: K, update: F) -> (Option<V>, bool)
    where
        V: Clone,
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let Some(slot) = self.descend_for_insert(&key) else {
            return match update(None) {
                Some(value) => {
                    self.plant_root(key, value);
                    (None, true)
                }
                None => (None, false),
            };
        };

        if slot.exact {
            let current = &mut self.arena.leaf_mut(slot.leaf).entries[slot.index].value;
            return match update(Some(&*current)) {
                Some(value) => {
                    let old = std::mem::replace(current, value);
                    self.bump();
                    (Some(old), true)
                }
                None => (Some(current.clone()), false),
            };
        }

        match update(None) {
            Some(value) => {
                self.insert_entry(&slot, key, value);
                (None, true)
            }
            None => (None, false),
        }
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&mut self, key: &K) -> bool {
        self.remove(key).is_some()
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let mut q = self.root?;
        let mut parent: Option<(NodeId, usize)> = None;

        loop {
            let child = match self.arena.get(q) {
                Node::Leaf(leaf) => {
                    let (index, exact) = leaf.find(key, &self.cmp);
                    if !exact {
                        return None;
                    }
                    return Some(self.remove_at(q, parent, index));
                }
                Node::Internal(node) => node.child_index(key, &self.cmp),
            };

            let (q_fixed, child) = match parent {
                Some((p, pi)) if self.arena.internal(q).len() < self.config.internal_order() => {
                    self.underflow_internal(p, q, pi, child)
                }
                _ => (q, child),
            };

            parent = Some((q_fixed, child));
            q = self.arena.internal(q_fixed).children[child];
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        if self.root.is_none() {
            return;
        }

        tracing::debug!("clearing tree with {} entries", self.count);
        self.arena.clear();
        self.root = None;
        self.first = None;
        self.last = None;
        self.count = 0;
        self.bump();
    }

    /// Position a cursor at the first entry whose key is >= `key`.
    ///
    /// Also reports whether `key` itself is present. The cursor may sit past
    /// the last entry, in which case stepping it reports end of sequence.
    #[must_use]
    pub fn seek(&self, key: &K) -> (Cursor<K>, bool) {
        match self.locate(key) {
            Some((leaf, index, exact)) => (
                Cursor::new(self.id, self.version, Some(leaf), index, key.clone(), exact),
                exact,
            ),
            None => (
                Cursor::new(self.id, self.version, None, 0, key.clone(), false),
                false,
            ),
        }
    }

    /// Position a cursor on the smallest entry.
    pub fn seek_first(&self) -> Result<Cursor<K>, EndOfSequence> {
        let leaf_id = self.first.ok_or(EndOfSequence)?;
        let entry = self.arena.leaf(leaf_id).entries.first().ok_or(EndOfSequence)?;
        Ok(Cursor::new(
            self.id,
            self.version,
            Some(leaf_id),
            0,
            entry.key.clone(),
            true,
        ))
    }

    /// Position a cursor on the largest entry.
    pub fn seek_last(&self) -> Result<Cursor<K>, EndOfSequence> {
        let leaf_id = self.last.ok_or(EndOfSequence)?;
        let leaf = self.arena.leaf(leaf_id);
        let entry = leaf.entries.last().ok_or(EndOfSequence)?;
        Ok(Cursor::new(
            self.id,
            self.version,
            Some(leaf_id),
            leaf.len() - 1,
            entry.key.clone(),
            true,
        ))
    }

    /// Iterate over all entries in ascending key order.
    #[must_use]
    pub fn iter(&self) -> Entries<'_, K, V, C> {
        Entries::new(self, self.seek_first().ok(), Direction::Forward)
    }

    /// Iterate over all entries in descending key order.
    #[must_use]
    pub fn iter_rev(&self) -> Entries<'_, K, V, C> {
        Entries::new(self, self.seek_last().ok(), Direction::Backward)
    }

    /// Iterate in ascending order over the entries with keys >= `key`.
    #[must_use]
    pub fn range_from(&self, key: &K) -> Entries<'_, K, V, C> {
        Entries::new(self, Some(self.seek(key).0), Direction::Forward)
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) const fn comparator(&self) -> &C {
        &self.cmp
    }

    pub(crate) const fn arena(&self) -> &NodeArena<K, V> {
        &self.arena
    }

    pub(crate) const fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub(crate) const fn chain_ends(&self) -> (Option<NodeId>, Option<NodeId>) {
        (self.first, self.last)
    }

    pub(crate) fn leaf(&self, id: NodeId) -> &LeafNode<K, V> {
        self.arena.leaf(id)
    }

    const fn bump(&mut self) {
        self.version += 1;
    }

    /// Find the leaf position for `key` without modifying anything.
    fn locate(&self, key: &K) -> Option<(NodeId, usize, bool)> {
        let mut q = self.root?;

        loop {
            match self.arena.get(q) {
                Node::Internal(node) => q = node.children[node.child_index(key, &self.cmp)],
                Node::Leaf(leaf) => {
                    let (index, exact) = leaf.find(key, &self.cmp);
                    return Some((q, index, exact));
                }
            }
        }
    }

    /// Walk to the leaf for `key`, splitting overfull internal nodes on the way.
    fn descend_for_insert(&mut self, key: &K) -> Option<LeafSlot> {
        let mut q = self.root?;
        let mut parent: Option<(NodeId, usize)> = None;

        loop {
            let (mut child, overfull) = match self.arena.get(q) {
                Node::Leaf(leaf) => {
                    let (index, exact) = leaf.find(key, &self.cmp);
                    return Some(LeafSlot {
                        leaf: q,
                        parent,
                        index,
                        exact,
                    });
                }
                Node::Internal(node) => (
                    node.child_index(key, &self.cmp),
                    node.len() > self.config.internal_capacity(),
                ),
            };

            if overfull {
                (q, child) = self.split_internal(parent, q, child);
            }

            parent = Some((q, child));
            q = self.arena.internal(q).children[child];
        }
    }

    /// First entry of an empty tree.
    fn plant_root(&mut self, key: K, value: V) {
        let mut leaf = LeafNode::with_capacity(self.config.leaf_capacity());
        leaf.insert_at(0, key, value);
        let id = self.arena.alloc(Node::Leaf(leaf));
        self.root = Some(id);
        self.first = Some(id);
        self.last = Some(id);
        self.count = 1;
        self.bump();
    }

    fn leaf_insert(&mut self, leaf: NodeId, index: usize, key: K, value: V) {
        self.arena.leaf_mut(leaf).insert_at(index, key, value);
        self.count += 1;
        self.bump();
    }

    fn insert_entry(&mut self, slot: &LeafSlot, key: K, value: V) {
        if self.arena.leaf(slot.leaf).len() < self.config.leaf_capacity() {
            self.leaf_insert(slot.leaf, slot.index, key, value);
            return;
        }

        match slot.parent {
            Some((p, pi)) => self.overflow(p, slot.leaf, pi, slot.index, key, value),
            None => self.split_leaf(None, slot.leaf, slot.index, key, value),
        }
    }

    /// Insert into the full leaf `q`, shifting an entry into a sibling with
    /// spare room before resorting to a split.
    fn overflow(&mut self, p: NodeId, q: NodeId, pi: usize, index: usize, key: K, value: V) {
        let capacity = self.config.leaf_capacity();
        let (left, right) = self.arena.internal(p).siblings(pi);

        let left = left.filter(|&l| index > 0 && self.arena.leaf(l).len() < capacity);
        if let Some(l) = left {
            let (l_node, q_node) = self.arena.leaf_pair_mut(l, q);
            LeafNode::move_left(l_node, q_node, 1);
            self.leaf_insert(q, index - 1, key, value);
            let separator = self.arena.leaf(q).first_key().clone();
            self.arena.internal_mut(p).keys[pi - 1] = separator;
            return;
        }

        let right = right.filter(|&r| self.arena.leaf(r).len() < capacity);
        if let Some(r) = right {
            if index < capacity {
                let (q_node, r_node) = self.arena.leaf_pair_mut(q, r);
                LeafNode::move_right(q_node, r_node, 1);
                self.leaf_insert(q, index, key, value);
            } else {
                self.leaf_insert(r, 0, key, value);
            }
            let separator = self.arena.leaf(r).first_key().clone();
            self.arena.internal_mut(p).keys[pi] = separator;
            return;
        }

        self.split_leaf(Some((p, pi)), q, index, key, value);
    }

    /// Split the full leaf `q` in half and insert into the proper half.
    fn split_leaf(
        &mut self,
        parent: Option<(NodeId, usize)>,
        q: NodeId,
        index: usize,
        key: K,
        value: V,
    ) {
        let order = self.config.leaf_order();
        let mut right = self.arena.leaf_mut(q).split(order);
        let separator = right.first_key().clone();
        let old_next = self.arena.leaf(q).next;
        right.prev = Some(q);
        right.next = old_next;

        let r = self.arena.alloc(Node::Leaf(right));
        self.arena.leaf_mut(q).next = Some(r);
        match old_next {
            Some(n) => self.arena.leaf_mut(n).prev = Some(r),
            None => self.last = Some(r),
        }
        tracing::trace!("leaf {q} split, new right sibling {r}");

        self.attach_child(parent, q, separator, r);

        if index > order {
            self.leaf_insert(r, index - order, key, value);
        } else {
            self.leaf_insert(q, index, key, value);
        }
    }

    /// Split the overfull internal node `q` and return where child `child`
    /// of `q` ended up.
    fn split_internal(
        &mut self,
        parent: Option<(NodeId, usize)>,
        q: NodeId,
        child: usize,
    ) -> (NodeId, usize) {
        let order = self.config.internal_order();
        let (separator, right) = self.arena.internal_mut(q).split(order);
        let r = self.arena.alloc(Node::Internal(right));
        tracing::trace!("internal node {q} split, new right sibling {r}");

        self.attach_child(parent, q, separator, r);

        if child > order {
            (r, child - order - 1)
        } else {
            (q, child)
        }
    }

    /// Register `right`, the new sibling of `left`, with their parent. A split
    /// root gets a fresh root above it.
    fn attach_child(
        &mut self,
        parent: Option<(NodeId, usize)>,
        left: NodeId,
        separator: K,
        right: NodeId,
    ) {
        match parent {
            Some((p, pi)) => self.arena.internal_mut(p).insert(pi, separator, right),
            None => {
                let root = InternalNode::with_children(left, separator, right);
                let root = self.arena.alloc(Node::Internal(root));
                self.root = Some(root);
                tracing::trace!("root grew, new root {root}");
            }
        }
    }

    fn remove_at(&mut self, q: NodeId, parent: Option<(NodeId, usize)>, index: usize) -> V {
        let entry = self.arena.leaf_mut(q).extract_at(index);
        self.count -= 1;
        self.bump();

        match parent {
            Some((p, pi)) => {
                if self.arena.leaf(q).len() < self.config.leaf_order() {
                    self.underflow(p, q, pi);
                }
                if index == 0 {
                    self.refresh_separator(&entry.key);
                }
            }
            None => {
                if self.count == 0 {
                    self.clear();
                }
            }
        }

        entry.value
    }

    /// Refill the underfull leaf `q` from a sibling, or merge it away.
    fn underflow(&mut self, p: NodeId, q: NodeId, pi: usize) {
        let capacity = self.config.leaf_capacity();
        let q_len = self.arena.leaf(q).len();
        let (left, right) = self.arena.internal(p).siblings(pi);

        if let Some(l) = left.filter(|&l| self.arena.leaf(l).len() + q_len >= capacity) {
            let (l_node, q_node) = self.arena.leaf_pair_mut(l, q);
            LeafNode::move_right(l_node, q_node, 1);
            let separator = self.arena.leaf(q).first_key().clone();
            self.arena.internal_mut(p).keys[pi - 1] = separator;
        } else if let Some(r) = right.filter(|&r| self.arena.leaf(r).len() + q_len >= capacity) {
            let (q_node, r_node) = self.arena.leaf_pair_mut(q, r);
            LeafNode::move_left(q_node, r_node, 1);
            let separator = self.arena.leaf(r).first_key().clone();
            self.arena.internal_mut(p).keys[pi] = separator;
        } else if let Some(l) = left {
            self.merge_leaves(p, l, q, pi - 1);
        } else if let Some(r) = right {
            self.merge_leaves(p, q, r, pi);
        }
        self.bump();
    }

    /// Fold leaf `r` into its left neighbour `l`. `pi` is `l`'s child index.
    fn merge_leaves(&mut self, p: NodeId, l: NodeId, r: NodeId, pi: usize) {
        let right = self.arena.release_leaf(r);
        let next = right.next;
        let left = self.arena.leaf_mut(l);
        left.entries.extend(right.entries);
        left.next = next;
        match next {
            Some(n) => self.arena.leaf_mut(n).prev = Some(l),
            None => self.last = Some(l),
        }
        tracing::trace!("leaf {r} merged into {l}");

        self.unlink_separator(p, pi, l);
    }

    /// Refill the underfull internal node `q` on the way down, or merge it.
    ///
    /// Returns the node now holding the subtree at `child`, and its index there.
    fn underflow_internal(
        &mut self,
        p: NodeId,
        q: NodeId,
        pi: usize,
        child: usize,
    ) -> (NodeId, usize) {
        let order = self.config.internal_order();
        let (left, right) = self.arena.internal(p).siblings(pi);

        if let Some(l) = left.filter(|&l| self.arena.internal(l).len() > order) {
            let (key, moved) = self.arena.internal_mut(l).pop_back();
            let separator = std::mem::replace(&mut self.arena.internal_mut(p).keys[pi - 1], key);
            self.arena.internal_mut(q).push_front(separator, moved);
            return (q, child + 1);
        }

        if let Some(r) = right.filter(|&r| self.arena.internal(r).len() > order) {
            let (key, moved) = self.arena.internal_mut(r).pop_front();
            let separator = std::mem::replace(&mut self.arena.internal_mut(p).keys[pi], key);
            self.arena.internal_mut(q).push_back(separator, moved);
            return (q, child);
        }

        if let Some(l) = left {
            let shift = self.arena.internal(l).len() + 1;
            self.merge_internal(p, l, q, pi - 1);
            return (l, child + shift);
        }

        if let Some(r) = right {
            self.merge_internal(p, q, r, pi);
        }
        (q, child)
    }

    /// Fold internal node `r` into its left neighbour `l`, pulling the
    /// separator between them down from `p`.
    fn merge_internal(&mut self, p: NodeId, l: NodeId, r: NodeId, pi: usize) {
        let separator = self.unlink_separator(p, pi, l);
        let right = self.arena.release_internal(r);
        let left = self.arena.internal_mut(l);
        left.keys.push(separator);
        left.keys.extend(right.keys);
        left.children.extend(right.children);
        tracing::trace!("internal node {r} merged into {l}");
    }

    /// Drop separator `pi` and the child to its right from `p`. When that
    /// empties the root, `survivor` becomes the new root.
    fn unlink_separator(&mut self, p: NodeId, pi: usize, survivor: NodeId) -> K {
        if self.arena.internal(p).len() > 1 {
            return self.arena.internal_mut(p).extract(pi).0;
        }

        let mut root = self.arena.release_internal(p);
        self.root = Some(survivor);
        tracing::trace!("root {p} collapsed into {survivor}");
        root.extract(pi).0
    }

    /// Replace the separator equal to the removed key `key`, if one exists,
    /// with the smallest key of the subtree to its right.
    fn refresh_separator(&mut self, key: &K) {
        let Some(mut q) = self.root else {
            return;
        };
        let mut stale: Option<(NodeId, usize)> = None;

        loop {
            match self.arena.get(q) {
                Node::Internal(node) => match node.find(key, &self.cmp) {
                    (i, true) => {
                        stale = Some((q, i));
                        q = node.children[i + 1];
                    }
                    (i, false) => q = node.children[i],
                },
                Node::Leaf(leaf) => {
                    let Some((p, i)) = stale else {
                        return;
                    };
                    let (index, _) = leaf.find(key, &self.cmp);
                    let successor = match (leaf.entries.get(index), leaf.next) {
                        (Some(entry), _) => entry.key.clone(),
                        (None, Some(next)) => self.arena.leaf(next).first_key().clone(),
                        (None, None) => return,
                    };
                    self.arena.internal_mut(p).keys[i] = successor;
                    return;
                }
            }
        }
    }
}
