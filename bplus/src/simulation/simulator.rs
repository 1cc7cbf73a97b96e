//! Main simulator harness for deterministic simulation testing.
//!
//! Every generated operation is applied to a [`BTree`] and to a
//! `std::collections::BTreeMap` model. Return values, the version counter
//! and every cursor step are checked against the model, and the tree's
//! structure is audited after each operation.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

use super::operation_gen::{Operation, OperationGenConfig, OperationGenerator};
use crate::btree::{BTree, Cursor, Direction};
use crate::config::TreeConfig;

type Tree = BTree<u32, u32>;

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Fanout of the simulated tree.
    pub tree_config: TreeConfig,
    /// Operation generation configuration.
    pub operation_config: OperationGenConfig,
    /// Compare the full contents with the model every this many operations.
    pub scan_interval: usize,
}

impl SimulatorConfig {
    /// Create a new simulator config with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tree_config: TreeConfig::default(),
            operation_config: OperationGenConfig::default(),
            scan_interval: 64,
        }
    }

    /// Set the tree fanout.
    #[must_use]
    pub const fn with_tree_config(mut self, config: TreeConfig) -> Self {
        self.tree_config = config;
        self
    }

    /// Set the operation configuration.
    #[must_use]
    pub fn with_operation_config(mut self, config: OperationGenConfig) -> Self {
        self.operation_config = config;
        self
    }
}

/// A point where the tree disagreed with the model or broke an invariant.
#[derive(Debug, Clone)]
pub struct Divergence {
    /// Index of the operation that exposed it.
    pub operation_index: usize,
    /// The operation itself.
    pub operation: Operation,
    pub description: String,
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The seed used for this simulation.
    pub seed: u64,
    /// Number of operations applied.
    pub operations: usize,
    /// Number of cursor steps that returned an entry.
    pub entries_stepped: usize,
    /// Largest number of entries held at once.
    pub peak_len: usize,
    pub divergences: Vec<Divergence>,
}

impl SimulationResult {
    /// Check if the simulation passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.divergences.is_empty()
    }
}

/// A cursor under test with the state needed to predict its next step.
struct TrackedCursor {
    cursor: Cursor<u32>,
    direction: Direction,
    /// Seek key and whether it was found, until the first entry is returned.
    origin: (u32, bool),
    last: Option<u32>,
    exhausted: bool,
}

impl TrackedCursor {
    /// The entry the next step must return under the resync rules.
    ///
    /// A cursor re-seeks its anchor, the last returned key or else the seek
    /// key. An anchor still present that the cursor had not merely seeked to
    /// is skipped in the cursor's direction; otherwise the cursor reads the
    /// first entry at or after the anchor, whatever its direction.
    fn expected(&self, model: &BTreeMap<u32, u32>) -> Option<(u32, u32)> {
        if self.exhausted {
            return None;
        }

        let (anchor, hit) = self.last.map_or(self.origin, |last| (last, false));
        let entry = if !hit && model.contains_key(&anchor) {
            match self.direction {
                Direction::Forward => model
                    .range((Bound::Excluded(anchor), Bound::Unbounded))
                    .next(),
                Direction::Backward => model.range(..anchor).next_back(),
            }
        } else {
            model.range(anchor..).next()
        };
        entry.map(|(k, v)| (*k, *v))
    }

    /// Whether the model has no entry beyond `key` in the cursor's direction.
    fn at_end(&self, model: &BTreeMap<u32, u32>, key: u32) -> bool {
        match self.direction {
            Direction::Forward => model
                .range((Bound::Excluded(key), Bound::Unbounded))
                .next()
                .is_none(),
            Direction::Backward => model.range(..key).next_back().is_none(),
        }
    }
}

/// The main simulator harness.
pub struct Simulator {
    config: SimulatorConfig,
    generator: OperationGenerator,
    tree: Tree,
    model: BTreeMap<u32, u32>,
    cursors: Vec<TrackedCursor>,
    divergences: Vec<Divergence>,
    entries_stepped: usize,
    peak_len: usize,
}

impl Simulator {
    /// Create a new simulator with the given configuration.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let generator =
            OperationGenerator::with_config(config.seed, config.operation_config.clone());
        let cmp: fn(&u32, &u32) -> Ordering = u32::cmp;
        let tree = BTree::with_config(cmp, config.tree_config);

        Self {
            config,
            generator,
            tree,
            model: BTreeMap::new(),
            cursors: Vec::new(),
            divergences: Vec::new(),
            entries_stepped: 0,
            peak_len: 0,
        }
    }

    /// Run the simulation for a given number of operations.
    pub fn run(&mut self, operation_count: usize) -> SimulationResult {
        for index in 0..operation_count {
            let operation = self.generator.next_operation(self.cursors.len());
            self.apply(index, operation);

            if let Err(violation) = self.tree.check_invariants() {
                self.diverge(index, operation, format!("{violation}\n{}", self.tree.dump()));
            }
            if self.tree.len() != self.model.len() {
                self.diverge(
                    index,
                    operation,
                    format!("len {} but model holds {}", self.tree.len(), self.model.len()),
                );
            }
            if index % self.config.scan_interval == 0 {
                self.compare_contents(index, operation);
            }
            self.peak_len = self.peak_len.max(self.tree.len());

            if !self.divergences.is_empty() {
                break;
            }
        }

        tracing::debug!(
            "simulation seed {} finished, {} entries, peak {}, {} divergences",
            self.config.seed,
            self.tree.len(),
            self.peak_len,
            self.divergences.len()
        );

        SimulationResult {
            seed: self.config.seed,
            operations: operation_count,
            entries_stepped: self.entries_stepped,
            peak_len: self.peak_len,
            divergences: std::mem::take(&mut self.divergences),
        }
    }

    fn diverge(&mut self, operation_index: usize, operation: Operation, description: String) {
        self.divergences.push(Divergence {
            operation_index,
            operation,
            description,
        });
    }

    fn apply(&mut self, index: usize, operation: Operation) {
        let version = self.tree.version();

        let changed = match operation {
            Operation::Set { key, value } => {
                let old = self.tree.set(key, value);
                let expected = self.model.insert(key, value);
                if old != expected {
                    self.diverge(index, operation, format!("set returned {old:?}, want {expected:?}"));
                }
                true
            }
            Operation::Put { key, value, write } => {
                let expected = self.model.get(&key).copied();
                let (old, written) = self.tree.put(key, |current| {
                    let new = current.map_or(value, |v| v.wrapping_add(value));
                    write.then_some(new)
                });
                if write {
                    self.model
                        .insert(key, expected.map_or(value, |v| v.wrapping_add(value)));
                }
                if (old, written) != (expected, write) {
                    self.diverge(
                        index,
                        operation,
                        format!("put returned ({old:?}, {written}), want ({expected:?}, {write})"),
                    );
                }
                write
            }
            Operation::Delete { key } => {
                let found = self.tree.delete(&key);
                let expected = self.model.remove(&key).is_some();
                if found != expected {
                    self.diverge(index, operation, format!("delete returned {found}"));
                }
                expected
            }
            Operation::Clear => {
                let non_empty = !self.model.is_empty();
                self.tree.clear();
                self.model.clear();
                non_empty
            }
            Operation::Seek { key, direction } => {
                let (cursor, hit) = self.tree.seek(&key);
                if hit != self.model.contains_key(&key) {
                    self.diverge(index, operation, format!("seek reported hit = {hit}"));
                }
                self.track(cursor, direction, (key, hit));
                false
            }
            Operation::SeekFirst => {
                let first = self.model.keys().next().copied();
                match (self.tree.seek_first(), first) {
                    (Ok(cursor), Some(key)) => self.track(cursor, Direction::Forward, (key, true)),
                    (Err(_), None) => {}
                    (found, _) => {
                        let found = found.is_ok();
                        self.diverge(index, operation, format!("seek_first ok = {found}"));
                    }
                }
                false
            }
            Operation::SeekLast => {
                let last = self.model.keys().next_back().copied();
                match (self.tree.seek_last(), last) {
                    (Ok(cursor), Some(key)) => self.track(cursor, Direction::Backward, (key, true)),
                    (Err(_), None) => {}
                    (found, _) => {
                        let found = found.is_ok();
                        self.diverge(index, operation, format!("seek_last ok = {found}"));
                    }
                }
                false
            }
            Operation::Step { cursor } => {
                self.step(index, operation, cursor);
                false
            }
        };

        let moved = self.tree.version() != version;
        if changed && self.tree.version() <= version {
            self.diverge(index, operation, "mutation did not bump the version".to_string());
        } else if !changed && moved {
            self.diverge(index, operation, "version moved without a mutation".to_string());
        }
    }

    fn track(&mut self, cursor: Cursor<u32>, direction: Direction, origin: (u32, bool)) {
        self.cursors.push(TrackedCursor {
            cursor,
            direction,
            origin,
            last: None,
            exhausted: false,
        });
    }

    fn step(&mut self, index: usize, operation: Operation, slot: usize) {
        if self.cursors.is_empty() {
            return;
        }
        let slot = slot % self.cursors.len();
        let tracked = &mut self.cursors[slot];
        let expected = tracked.expected(&self.model);

        let actual = match tracked.direction {
            Direction::Forward => tracked.cursor.next(&self.tree),
            Direction::Backward => tracked.cursor.prev(&self.tree),
        }
        .ok()
        .map(|(k, v)| (*k, *v));

        if actual != expected {
            let description = format!(
                "{:?} cursor from {:?} after {:?} returned {actual:?}, want {expected:?}",
                tracked.direction, tracked.origin, tracked.last
            );
            self.diverge(index, operation, description);
            return;
        }

        match actual {
            Some((key, _)) => {
                self.entries_stepped += 1;
                tracked.exhausted = tracked.at_end(&self.model, key);
                tracked.last = Some(key);
                if tracked.exhausted != tracked.cursor.is_exhausted() {
                    let description = format!("cursor exhaustion after {key} disagrees with the model");
                    self.diverge(index, operation, description);
                }
            }
            None => {
                // End of sequence is final: confirm it and retire the cursor.
                let again = match tracked.direction {
                    Direction::Forward => tracked.cursor.next(&self.tree),
                    Direction::Backward => tracked.cursor.prev(&self.tree),
                };
                if again.is_ok() {
                    self.diverge(index, operation, "end of sequence was not sticky".to_string());
                }
                self.cursors.swap_remove(slot);
            }
        }
    }

    /// Walk the whole tree both ways and compare with the model.
    fn compare_contents(&mut self, index: usize, operation: Operation) {
        let forward: Vec<(u32, u32)> = self.tree.iter().map(|(k, v)| (*k, *v)).collect();
        let model: Vec<(u32, u32)> = self.model.iter().map(|(k, v)| (*k, *v)).collect();
        if forward != model {
            self.diverge(index, operation, "forward scan differs from the model".to_string());
        }

        let backward = self.tree.iter_rev().map(|(k, _)| *k);
        if !backward.eq(self.model.keys().rev().copied()) {
            self.diverge(index, operation, "backward scan differs from the model".to_string());
        }

        let lookups_match = self
            .model
            .iter()
            .all(|(k, v)| self.tree.get(k) == Some(v));
        if !lookups_match {
            self.diverge(index, operation, "point lookup differs from the model".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::init_tracing;

    fn run(config: SimulatorConfig, operations: usize) -> SimulationResult {
        init_tracing();
        let mut simulator = Simulator::new(config);
        let result = simulator.run(operations);
        if let Some(divergence) = result.divergences.first() {
            panic!(
                "seed {} diverged at operation {} ({:?}): {}",
                result.seed,
                divergence.operation_index,
                divergence.operation,
                divergence.description
            );
        }
        assert!(result.passed());
        assert_eq!(result.operations, operations);
        result
    }

    #[test]
    fn test_simulation_minimum_fanout() {
        for seed in 0..8 {
            let config = SimulatorConfig::new(seed)
                .with_tree_config(TreeConfig::new(1, 2).expect("config"));
            let result = run(config, 3_000);
            assert!(result.peak_len > 0);
        }
    }

    #[test]
    fn test_simulation_small_fanout() {
        for seed in 100..104 {
            let config = SimulatorConfig::new(seed)
                .with_tree_config(TreeConfig::new(2, 3).expect("config"));
            run(config, 5_000);
        }
    }

    #[test]
    fn test_simulation_default_fanout() {
        let operation_config = OperationGenConfig {
            key_space: 5_000,
            delete_rate: 0.2,
            clear_rate: 0.0,
            ..OperationGenConfig::default()
        };
        let config = SimulatorConfig::new(0xb7ee).with_operation_config(operation_config);
        let result = run(config, 6_000);
        assert!(result.peak_len > 2 * TreeConfig::DEFAULT_LEAF_ORDER);
    }

    #[test]
    fn test_simulation_cursor_heavy() {
        let operation_config = OperationGenConfig {
            key_space: 64,
            cursor_rate: 0.6,
            max_cursors: 8,
            ..OperationGenConfig::default()
        };
        for seed in 200..204 {
            let config = SimulatorConfig::new(seed)
                .with_tree_config(TreeConfig::new(1, 2).expect("config"))
                .with_operation_config(operation_config.clone());
            let result = run(config, 4_000);
            assert!(result.entries_stepped > 0);
        }
    }

    #[test]
    fn test_simulation_deterministic() {
        let config = SimulatorConfig::new(77).with_tree_config(TreeConfig::new(2, 2).expect("config"));
        let a = run(config.clone(), 1_000);
        let b = run(config, 1_000);
        assert_eq!(a.entries_stepped, b.entries_stepped);
        assert_eq!(a.peak_len, b.peak_len);
    }
}
