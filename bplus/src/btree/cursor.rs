//! Cursors over a tree.
//!
//! A [`Cursor`] does not borrow its tree; each step is handed the tree
//! explicitly, so the tree may be mutated between steps. The cursor keeps
//! the tree version it last saw and the last key it returned. When the
//! version has moved on, it re-seeks that key before stepping.
//!
//! End of sequence is sticky: once a cursor reports it, every later step on
//! that cursor reports it again, whatever happens to the tree.

use std::cmp::Ordering;
use std::iter::FusedIterator;

use crate::btree::node::NodeId;
use crate::btree::tree::BTree;

/// Traversal direction of a cursor step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Backward,
}

/// Returned when a cursor has no entry left in the requested direction, or
/// when seeking the ends of an empty tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfSequence;

impl std::fmt::Display for EndOfSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "end of sequence")
    }
}

impl std::error::Error for EndOfSequence {}

/// A resumable position in a tree's key order.
///
/// Created by [`BTree::seek`], [`BTree::seek_first`] and [`BTree::seek_last`].
#[derive(Debug, Clone)]
pub struct Cursor<K> {
    tree_id: u64,
    version: u64,
    leaf: Option<NodeId>,
    index: usize,
    /// Seek key, then the last key returned.
    key: K,
    /// Whether `key` was found exactly by the seek that placed the cursor.
    hit: bool,
    exhausted: bool,
}

impl<K: Clone> Cursor<K> {
    pub(crate) const fn new(
        tree_id: u64,
        version: u64,
        leaf: Option<NodeId>,
        index: usize,
        key: K,
        hit: bool,
    ) -> Self {
        Self {
            tree_id,
            version,
            leaf,
            index,
            key,
            hit,
            exhausted: false,
        }
    }

    /// Whether the cursor has reported end of sequence.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Return the entry under the cursor and move to the next larger key.
    ///
    /// # Panics
    ///
    /// Panics if `tree` is not the tree that created this cursor.
    pub fn next<'t, V, C>(&mut self, tree: &'t BTree<K, V, C>) -> Result<(&'t K, &'t V), EndOfSequence>
    where
        C: Fn(&K, &K) -> Ordering,
    {
        self.advance(tree, Direction::Forward)
    }

    /// Return the entry under the cursor and move to the next smaller key.
    ///
    /// # Panics
    ///
    /// Panics if `tree` is not the tree that created this cursor.
    pub fn prev<'t, V, C>(&mut self, tree: &'t BTree<K, V, C>) -> Result<(&'t K, &'t V), EndOfSequence>
    where
        C: Fn(&K, &K) -> Ordering,
    {
        self.advance(tree, Direction::Backward)
    }

    /// Turn the cursor into an iterator walking `tree` in `direction`.
    #[must_use]
    pub fn entries<V, C>(self, tree: &BTree<K, V, C>, direction: Direction) -> Entries<'_, K, V, C>
    where
        C: Fn(&K, &K) -> Ordering,
    {
        Entries::new(tree, Some(self), direction)
    }

    fn advance<'t, V, C>(
        &mut self,
        tree: &'t BTree<K, V, C>,
        direction: Direction,
    ) -> Result<(&'t K, &'t V), EndOfSequence>
    where
        C: Fn(&K, &K) -> Ordering,
    {
        assert_eq!(
            self.tree_id,
            tree.id(),
            "cursor stepped against a tree that did not create it"
        );

        if self.exhausted {
            return Err(EndOfSequence);
        }

        if self.version != tree.version() {
            self.resync(tree, direction)?;
        }

        let Some(leaf) = self.leaf else {
            self.exhausted = true;
            return Err(EndOfSequence);
        };

        // A seek can leave the cursor just past the end of a leaf.
        if self.index >= tree.leaf(leaf).len() && !self.step(tree, Direction::Forward) {
            return Err(EndOfSequence);
        }

        let Some(entry) = self.leaf.and_then(|id| tree.leaf(id).entries.get(self.index)) else {
            self.exhausted = true;
            return Err(EndOfSequence);
        };

        self.key = entry.key.clone();
        self.hit = false;
        self.step(tree, direction);
        Ok((&entry.key, &entry.value))
    }

    /// Re-seek the last returned key after the tree changed.
    ///
    /// When that key has reappeared although the cursor was not sitting on an
    /// exact hit, it was already passed, so the fresh position is moved one
    /// step further in `direction`.
    fn resync<V, C>(&mut self, tree: &BTree<K, V, C>, direction: Direction) -> Result<(), EndOfSequence>
    where
        C: Fn(&K, &K) -> Ordering,
    {
        let (mut fresh, hit) = tree.seek(&self.key);
        let passed = !self.hit && hit;
        if passed && !fresh.step(tree, direction) {
            *self = fresh;
            return Err(EndOfSequence);
        }

        *self = fresh;
        Ok(())
    }

    /// Move one entry in `direction`, following the leaf chain at leaf
    /// boundaries. Returns false, and exhausts the cursor, when there is no
    /// entry there.
    fn step<V, C>(&mut self, tree: &BTree<K, V, C>, direction: Direction) -> bool
    where
        C: Fn(&K, &K) -> Ordering,
    {
        let Some(id) = self.leaf else {
            self.exhausted = true;
            return false;
        };
        let leaf = tree.leaf(id);

        match direction {
            Direction::Forward if self.index + 1 < leaf.len() => self.index += 1,
            Direction::Forward => {
                self.leaf = leaf.next;
                self.index = 0;
            }
            Direction::Backward if self.index > 0 => self.index -= 1,
            Direction::Backward => {
                self.leaf = leaf.prev;
                self.index = self.leaf.map_or(0, |prev| tree.leaf(prev).len().saturating_sub(1));
            }
        }

        if self.leaf.is_none() {
            self.exhausted = true;
        }
        !self.exhausted
    }
}

/// Iterator driving a cursor in one direction.
///
/// Borrows the tree, so the tree cannot change while the iterator lives.
pub struct Entries<'t, K, V, C> {
    tree: &'t BTree<K, V, C>,
    cursor: Option<Cursor<K>>,
    direction: Direction,
}

impl<'t, K, V, C> Entries<'t, K, V, C> {
    pub(crate) const fn new(
        tree: &'t BTree<K, V, C>,
        cursor: Option<Cursor<K>>,
        direction: Direction,
    ) -> Self {
        Self {
            tree,
            cursor,
            direction,
        }
    }
}

impl<'t, K, V, C> Iterator for Entries<'t, K, V, C>
where
    K: Clone,
    C: Fn(&K, &K) -> Ordering,
{
    type Item = (&'t K, &'t V);

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.cursor.as_mut()?;
        cursor.advance(self.tree, self.direction).ok()
    }
}

impl<K, V, C> FusedIterator for Entries<'_, K, V, C>
where
    K: Clone,
    C: Fn(&K, &K) -> Ordering,
{
}
