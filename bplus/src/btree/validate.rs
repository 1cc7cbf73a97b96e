//! Structural checks and debugging output for a tree.
//!
//! [`BTree::check_invariants`] walks every node and reports the first broken
//! rule it finds. It is O(n) and meant for tests and the simulation harness.

use std::cmp::Ordering;
use std::fmt::Debug;

use crate::btree::node::{Node, NodeId};
use crate::btree::tree::BTree;

/// A structural rule the tree failed to uphold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Keys inside a node are not strictly ascending, or fall outside the
    /// range its parent routes to it.
    Unordered { node: NodeId },
    /// A node holds too few or too many keys.
    Occupancy {
        node: NodeId,
        len: usize,
        min: usize,
        max: usize,
    },
    /// An internal node does not have exactly one more child than separators.
    ChildCount {
        node: NodeId,
        keys: usize,
        children: usize,
    },
    /// Leaves sit at different depths.
    UnevenDepth {
        leaf: NodeId,
        depth: usize,
        expected: usize,
    },
    /// A separator differs from the smallest key of the subtree to its right.
    Separator { node: NodeId, index: usize },
    /// The leaf chain does not visit the leaves in key order.
    LeafChain { message: String },
    /// The entry counter disagrees with the leaves.
    Count { counted: usize, recorded: usize },
    /// Arena slots are live but unreachable from the root.
    Leak { live: usize, reachable: usize },
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unordered { node } => write!(f, "keys out of order in node {node}"),
            Self::Occupancy {
                node,
                len,
                min,
                max,
            } => write!(f, "node {node} holds {len} keys, expected {min}..={max}"),
            Self::ChildCount {
                node,
                keys,
                children,
            } => write!(f, "node {node} has {keys} separators but {children} children"),
            Self::UnevenDepth {
                leaf,
                depth,
                expected,
            } => write!(f, "leaf {leaf} at depth {depth}, expected {expected}"),
            Self::Separator { node, index } => {
                write!(f, "separator {index} of node {node} is not the minimum of its right subtree")
            }
            Self::LeafChain { message } => write!(f, "broken leaf chain: {message}"),
            Self::Count { counted, recorded } => {
                write!(f, "leaves hold {counted} entries but the tree records {recorded}")
            }
            Self::Leak { live, reachable } => {
                write!(f, "{live} live nodes but only {reachable} reachable")
            }
        }
    }
}

impl std::error::Error for InvariantViolation {}

/// State collected while walking the tree.
#[derive(Default)]
struct Audit {
    leaves: Vec<NodeId>,
    leaf_depth: Option<usize>,
    entries: usize,
    nodes: usize,
}

impl<K, V, C> BTree<K, V, C>
where
    K: Clone,
    C: Fn(&K, &K) -> Ordering,
{
    /// Verify every structural invariant of the tree.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut audit = Audit::default();
        if let Some(root) = self.root() {
            self.audit_node(root, 0, None, None, &mut audit)?;
        }

        self.audit_chain(&audit.leaves)?;

        if audit.entries != self.len() {
            return Err(InvariantViolation::Count {
                counted: audit.entries,
                recorded: self.len(),
            });
        }

        let live = self.arena().live();
        if live != audit.nodes {
            return Err(InvariantViolation::Leak {
                live,
                reachable: audit.nodes,
            });
        }

        Ok(())
    }

    /// Number of node levels, zero for an empty tree.
    #[must_use]
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut next = self.root();
        while let Some(id) = next {
            height += 1;
            next = match self.arena().get(id) {
                Node::Internal(node) => node.children.first().copied(),
                Node::Leaf(_) => None,
            };
        }
        height
    }

    /// Render the node structure, one node per line, children indented.
    #[must_use]
    pub fn dump(&self) -> String
    where
        K: Debug,
        V: Debug,
    {
        let mut out = String::new();
        match self.root() {
            Some(root) => self.dump_node(root, 0, &mut out),
            None => out.push_str("(empty)\n"),
        }
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String)
    where
        K: Debug,
        V: Debug,
    {
        let indent = "  ".repeat(depth);
        match self.arena().get(id) {
            Node::Internal(node) => {
                out.push_str(&format!("{indent}internal {id} {:?}\n", node.keys));
                for &child in &node.children {
                    self.dump_node(child, depth + 1, out);
                }
            }
            Node::Leaf(leaf) => {
                let entries: Vec<String> = leaf
                    .entries
                    .iter()
                    .map(|e| format!("{:?}: {:?}", e.key, e.value))
                    .collect();
                out.push_str(&format!("{indent}leaf {id} [{}]\n", entries.join(", ")));
            }
        }
    }

    fn before(&self, a: &K, b: &K) -> bool {
        (self.comparator())(a, b) == Ordering::Less
    }

    /// Check the subtree at `id`, whose keys must lie in `[lower, upper)`.
    ///
    /// Returns the smallest key of the subtree.
    fn audit_node<'a>(
        &'a self,
        id: NodeId,
        depth: usize,
        lower: Option<&'a K>,
        upper: Option<&'a K>,
        audit: &mut Audit,
    ) -> Result<Option<&'a K>, InvariantViolation> {
        audit.nodes += 1;
        let is_root = depth == 0;

        match self.arena().get(id) {
            Node::Leaf(leaf) => {
                let config = self.config();
                let min = if is_root { 0 } else { config.leaf_order() };
                let max = config.leaf_capacity();
                if leaf.len() < min || leaf.len() > max {
                    return Err(InvariantViolation::Occupancy {
                        node: id,
                        len: leaf.len(),
                        min,
                        max,
                    });
                }

                let keys: Vec<&K> = leaf.entries.iter().map(|e| &e.key).collect();
                self.audit_keys(id, &keys, lower, upper)?;

                match audit.leaf_depth {
                    Some(expected) if expected != depth => {
                        return Err(InvariantViolation::UnevenDepth {
                            leaf: id,
                            depth,
                            expected,
                        });
                    }
                    Some(_) => {}
                    None => audit.leaf_depth = Some(depth),
                }

                audit.leaves.push(id);
                audit.entries += leaf.len();
                Ok(keys.first().copied())
            }
            Node::Internal(node) => {
                if node.children.len() != node.keys.len() + 1 {
                    return Err(InvariantViolation::ChildCount {
                        node: id,
                        keys: node.keys.len(),
                        children: node.children.len(),
                    });
                }

                let order = self.config().internal_order();
                // Nodes are fixed lazily on the next descent through them.
                let min = if is_root { 1 } else { order - 1 };
                let max = self.config().internal_capacity() + 1;
                if node.len() < min || node.len() > max {
                    return Err(InvariantViolation::Occupancy {
                        node: id,
                        len: node.len(),
                        min,
                        max,
                    });
                }

                let keys: Vec<&K> = node.keys.iter().collect();
                self.audit_keys(id, &keys, lower, upper)?;

                let mut smallest = None;
                for (i, &child) in node.children.iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
                    let child_upper = node.keys.get(i).or(upper);
                    let child_min = self.audit_node(child, depth + 1, child_lower, child_upper, audit)?;

                    if i == 0 {
                        smallest = child_min;
                    } else {
                        let separator = &node.keys[i - 1];
                        let exact = child_min.is_some_and(|m| {
                            (self.comparator())(m, separator) == Ordering::Equal
                        });
                        if !exact {
                            return Err(InvariantViolation::Separator {
                                node: id,
                                index: i - 1,
                            });
                        }
                    }
                }
                Ok(smallest)
            }
        }
    }

    /// Keys must be strictly ascending and inside `[lower, upper)`.
    fn audit_keys(
        &self,
        id: NodeId,
        keys: &[&K],
        lower: Option<&K>,
        upper: Option<&K>,
    ) -> Result<(), InvariantViolation> {
        let ascending = keys.windows(2).all(|w| self.before(w[0], w[1]));
        let above = match (lower, keys.first()) {
            (Some(lower), Some(first)) => !self.before(first, lower),
            _ => true,
        };
        let below = match (upper, keys.last()) {
            (Some(upper), Some(last)) => self.before(last, upper),
            _ => true,
        };

        if ascending && above && below {
            Ok(())
        } else {
            Err(InvariantViolation::Unordered { node: id })
        }
    }

    /// The chain from `first` must visit exactly `leaves`, in order, with
    /// matching back links, and end at `last`.
    fn audit_chain(&self, leaves: &[NodeId]) -> Result<(), InvariantViolation> {
        let broken = |message: String| Err(InvariantViolation::LeafChain { message });
        let (first, last) = self.chain_ends();

        if first != leaves.first().copied() || last != leaves.last().copied() {
            return broken(format!(
                "chain ends {first:?}..{last:?} do not match the outermost leaves"
            ));
        }

        let mut prev: Option<NodeId> = None;
        let mut cursor = first;
        for &expected in leaves {
            let Some(id) = cursor else {
                return broken(format!("chain stops before leaf {expected}"));
            };
            if id != expected {
                return broken(format!("chain reaches {id} where {expected} belongs"));
            }
            let leaf = self.leaf(id);
            if leaf.prev != prev {
                return broken(format!("leaf {id} links back to {:?}", leaf.prev));
            }
            prev = Some(id);
            cursor = leaf.next;
        }

        match cursor {
            Some(extra) => broken(format!("chain continues past the last leaf into {extra}")),
            None => Ok(()),
        }
    }
}
