//! Deterministic simulation testing for the tree.
//!
//! This module drives a tree with:
//! - Reproducible random operations over a small key space
//! - Cursors stepped between mutations
//! - A `std::collections::BTreeMap` model to compare every result against
//! - Structural invariant checking after each operation
//!
//! Given the same seed, a run is identical.
//!
//! # Usage
//!
//! ```ignore
//! use simulation::simulator::{Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::new(12345) // seed
//!     .with_tree_config(TreeConfig::new(1, 2)?);
//!
//! let mut sim = Simulator::new(config);
//! let result = sim.run(1000); // Run 1000 operations
//!
//! assert!(result.passed());
//! ```

mod simulator;
