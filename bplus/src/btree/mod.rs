//! In-memory B+tree with resumable cursors.
//!
//! # Structure
//!
//! The tree consists of:
//! - Internal nodes: store separator keys and child handles
//! - Leaf nodes: store key-value pairs, doubly-linked for ordered scans
//!
//! Nodes live in an arena owned by the tree. A [`Cursor`] holds no borrow of
//! the tree and re-seeks its last key whenever the tree changed since its
//! previous step.
//!
//! # Usage
//!
//! ```
//! use bplus::btree::{BTree, EndOfSequence};
//!
//! let mut tree = BTree::ordered();
//! tree.set(10, "ten");
//! tree.set(30, "thirty");
//!
//! let (mut cursor, exact) = tree.seek(&20);
//! assert!(!exact);
//!
//! // The tree may change between steps.
//! tree.set(25, "twenty-five");
//! assert_eq!(cursor.next(&tree), Ok((&25, &"twenty-five")));
//! assert_eq!(cursor.next(&tree), Ok((&30, &"thirty")));
//! assert_eq!(cursor.next(&tree), Err(EndOfSequence));
//! ```

mod cursor;
mod node;
mod tree;
mod validate;

pub use cursor::{Cursor, Direction, EndOfSequence, Entries};
pub use node::NodeId;
pub use tree::BTree;
pub use validate::InvariantViolation;
