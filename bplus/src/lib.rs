//! An in-memory ordered map backed by a B+tree.
//!
//! Besides point operations the tree hands out cursors that can be stepped in
//! either direction and stay correct when the tree is modified between steps.
//!
//! Components, leaves first:
//!  - `btree::node`: leaf and internal node layout, node arena
//!  - `btree::tree`: descent, split, merge and redistribution
//!  - `btree::cursor`: cursors and iterators
//!  - `config`: fanout parameters

pub mod btree;
pub mod config;

#[cfg(test)]
mod simulation;

pub use btree::{BTree, Cursor, Direction, EndOfSequence, Entries, InvariantViolation};
pub use config::{ConfigError, TreeConfig};
