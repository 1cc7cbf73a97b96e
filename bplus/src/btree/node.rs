//! B+tree node types and the node arena.
//!
//! The tree uses two node shapes:
//! - Internal nodes: store separator keys and child handles
//! - Leaf nodes: store key-value pairs, doubly-linked for ordered scans
//!
//! Nodes live in a [`NodeArena`] and refer to each other through [`NodeId`]
//! handles. Internal nodes own their children (a child is released only when
//! its parent drops it); the leaf chain links are navigation only.

use std::cmp::Ordering;

/// Handle to a node slot in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A tree node, either leaf or internal.
#[derive(Debug)]
pub enum Node<K, V> {
    Internal(InternalNode<K>),
    Leaf(LeafNode<K, V>),
}

/// An internal (non-leaf) node.
///
/// Stores N separators and N+1 child handles.
/// `Child[i]` contains keys < `Key[i]`
/// `Child[i+1]` contains keys >= `Key[i]`
#[derive(Debug)]
pub struct InternalNode<K> {
    /// Separators in sorted order.
    pub keys: Vec<K>,
    /// Child handles. `children.len()` == `keys.len()` + 1
    pub children: Vec<NodeId>,
}

impl<K> InternalNode<K> {
    /// Create a root with two children after the old root split.
    #[must_use]
    pub fn with_children(left_child: NodeId, key: K, right_child: NodeId) -> Self {
        Self {
            keys: vec![key],
            children: vec![left_child, right_child],
        }
    }

    /// Number of separators.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Binary search for `key` among the separators.
    ///
    /// Returns `(index, true)` on an exact match, otherwise the insertion point.
    pub fn find<C>(&self, key: &K, cmp: &C) -> (usize, bool)
    where
        C: Fn(&K, &K) -> Ordering,
    {
        match self.keys.binary_search_by(|probe| cmp(probe, key)) {
            Ok(i) => (i, true),
            Err(i) => (i, false),
        }
    }

    /// Find the child index for a given key.
    pub fn child_index<C>(&self, key: &K, cmp: &C) -> usize
    where
        C: Fn(&K, &K) -> Ordering,
    {
        match self.find(key, cmp) {
            (i, true) => i + 1, // Exact match, go right
            (i, false) => i,
        }
    }

    /// Insert separator `key` at `index` with `right_child` to its right.
    pub fn insert(&mut self, index: usize, key: K, right_child: NodeId) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, right_child);
    }

    /// Remove separator `index` together with the child to its right.
    pub fn extract(&mut self, index: usize) -> (K, NodeId) {
        let key = self.keys.remove(index);
        let child = self.children.remove(index + 1);
        (key, child)
    }

    /// Detach the last separator and the last child.
    pub fn pop_back(&mut self) -> (K, NodeId) {
        let key = self.keys.remove(self.keys.len() - 1);
        let child = self.children.remove(self.children.len() - 1);
        (key, child)
    }

    /// Detach the first separator and the first child.
    pub fn pop_front(&mut self) -> (K, NodeId) {
        (self.keys.remove(0), self.children.remove(0))
    }

    /// Prepend a child and the separator that now sits to its right.
    pub fn push_front(&mut self, key: K, child: NodeId) {
        self.keys.insert(0, key);
        self.children.insert(0, child);
    }

    /// Append a separator and the child to its right.
    pub fn push_back(&mut self, key: K, child: NodeId) {
        self.keys.push(key);
        self.children.push(child);
    }

    /// Left and right neighbours of child `index`.
    #[must_use]
    pub fn siblings(&self, index: usize) -> (Option<NodeId>, Option<NodeId>) {
        let left = index.checked_sub(1).map(|i| self.children[i]);
        let right = self.children.get(index + 1).copied();
        (left, right)
    }

    /// Split after `order` separators, returning the promoted separator and
    /// the new right node.
    ///
    /// The left node keeps `order` separators and `order + 1` children.
    pub fn split(&mut self, order: usize) -> (K, Self) {
        let right_keys = self.keys.split_off(order + 1);
        let right_children = self.children.split_off(order + 1);
        let median_key = self.keys.remove(order);

        (
            median_key,
            Self {
                keys: right_keys,
                children: right_children,
            },
        )
    }
}

/// A key-value entry in a leaf node.
#[derive(Debug)]
pub struct LeafEntry<K, V> {
    pub key: K,
    pub value: V,
}

/// A leaf node.
///
/// Stores key-value pairs and links to sibling leaves.
#[derive(Debug)]
pub struct LeafNode<K, V> {
    /// Entries in sorted order by key.
    pub entries: Vec<LeafEntry<K, V>>,
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
}

impl<K, V> LeafNode<K, V> {
    /// Create a new empty leaf with room for `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            prev: None,
            next: None,
        }
    }

    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::len() is not const-stable
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Smallest key in the leaf. Non-root leaves are never empty.
    #[must_use]
    pub fn first_key(&self) -> &K {
        &self.entries[0].key
    }

    /// Binary search for `key`.
    ///
    /// Returns `(index, true)` on an exact match, otherwise the insertion point.
    pub fn find<C>(&self, key: &K, cmp: &C) -> (usize, bool)
    where
        C: Fn(&K, &K) -> Ordering,
    {
        match self.entries.binary_search_by(|e| cmp(&e.key, key)) {
            Ok(i) => (i, true),
            Err(i) => (i, false),
        }
    }

    pub fn insert_at(&mut self, index: usize, key: K, value: V) {
        self.entries.insert(index, LeafEntry { key, value });
    }

    pub fn extract_at(&mut self, index: usize) -> LeafEntry<K, V> {
        self.entries.remove(index)
    }

    /// Move the first `count` entries of `right` to the end of `left`.
    pub fn move_left(left: &mut Self, right: &mut Self, count: usize) {
        left.entries.extend(right.entries.drain(..count));
    }

    /// Move the last `count` entries of `left` to the front of `right`.
    pub fn move_right(left: &mut Self, right: &mut Self, count: usize) {
        let start = left.entries.len() - count;
        right.entries.splice(0..0, left.entries.drain(start..));
    }

    /// Split off the entries from `at` onwards into a new, unlinked leaf.
    ///
    /// The caller links the new leaf into the chain.
    pub fn split(&mut self, at: usize) -> Self {
        let mut right = Self::with_capacity(self.entries.capacity());
        right.entries.extend(self.entries.drain(at..));
        right
    }
}

/// Slot storage for tree nodes.
///
/// Released slots are recycled by later allocations. A released slot holds
/// `None`, so its entries are dropped as soon as the node is discarded.
#[derive(Debug)]
pub struct NodeArena<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<NodeId>,
}

impl<K, V> Default for NodeArena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> NodeArena<K, V> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Store a node, reusing a released slot if one exists.
    pub fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.slots[id.0] = Some(node);
            id
        } else {
            self.slots.push(Some(node));
            NodeId(self.slots.len() - 1)
        }
    }

    /// Take a node out of the arena and recycle its slot.
    pub fn release(&mut self, id: NodeId) -> Node<K, V> {
        match self.slots.get_mut(id.0).and_then(Option::take) {
            Some(node) => {
                self.free.push(id);
                node
            }
            None => panic!("released dangling node {id}"),
        }
    }

    pub fn release_leaf(&mut self, id: NodeId) -> LeafNode<K, V> {
        match self.release(id) {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("node {id} is not a leaf"),
        }
    }

    pub fn release_internal(&mut self, id: NodeId) -> InternalNode<K> {
        match self.release(id) {
            Node::Internal(node) => node,
            Node::Leaf(_) => panic!("node {id} is not an internal node"),
        }
    }

    /// Drop every node.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    /// Number of live nodes.
    #[must_use]
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> &Node<K, V> {
        match self.slots.get(id.0) {
            Some(Some(node)) => node,
            _ => panic!("dangling node reference {id}"),
        }
    }

    #[must_use]
    pub fn leaf(&self, id: NodeId) -> &LeafNode<K, V> {
        match self.get(id) {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("node {id} is not a leaf"),
        }
    }

    #[must_use]
    pub fn internal(&self, id: NodeId) -> &InternalNode<K> {
        match self.get(id) {
            Node::Internal(node) => node,
            Node::Leaf(_) => panic!("node {id} is not an internal node"),
        }
    }

    pub fn leaf_mut(&mut self, id: NodeId) -> &mut LeafNode<K, V> {
        match self.slots.get_mut(id.0) {
            Some(Some(Node::Leaf(leaf))) => leaf,
            _ => panic!("node {id} is not a live leaf"),
        }
    }

    pub fn internal_mut(&mut self, id: NodeId) -> &mut InternalNode<K> {
        match self.slots.get_mut(id.0) {
            Some(Some(Node::Internal(node))) => node,
            _ => panic!("node {id} is not a live internal node"),
        }
    }

    /// Mutable access to two distinct leaves at once, in argument order.
    pub fn leaf_pair_mut(
        &mut self,
        a: NodeId,
        b: NodeId,
    ) -> (&mut LeafNode<K, V>, &mut LeafNode<K, V>) {
        assert_ne!(a, b, "sibling leaves must be distinct");
        let (first, second) = if a.0 < b.0 {
            let (lo, hi) = self.slots.split_at_mut(b.0);
            (&mut lo[a.0], &mut hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(a.0);
            (&mut hi[0], &mut lo[b.0])
        };
        match (first, second) {
            (Some(Node::Leaf(x)), Some(Node::Leaf(y))) => (x, y),
            _ => panic!("nodes {a} and {b} are not both live leaves"),
        }
    }
}
