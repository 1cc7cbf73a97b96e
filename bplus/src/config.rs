//! Tree configuration module.
//!
//! This module provides the fanout parameters of a [`BTree`](crate::BTree),
//! either built directly or loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `BPLUS_LEAF_ORDER`: leaf order `kd`, a leaf holds up to `2·kd` entries (default: `64`)
//! - `BPLUS_INTERNAL_ORDER`: internal order `kx`, an internal node holds up to `2·kx` separators (default: `128`)
//!
//! # Invariants
//!
//! - `leaf_order >= 1`
//! - `internal_order >= 2`

/// Fanout configuration of a tree.
///
/// # Post-conditions
///
/// Every value handed out by the constructors satisfies the minimums, so the
/// tree never has to re-validate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    /// Leaf order `kd`. Non-root leaves hold between `kd` and `2·kd` entries.
    leaf_order: usize,
    /// Internal order `kx`. Internal nodes are split once they hold more than
    /// `2·kx` separators and refilled once they drop below `kx`.
    internal_order: usize,
}

/// Error returned when building or loading a configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A parameter has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            leaf_order: Self::DEFAULT_LEAF_ORDER,
            internal_order: Self::DEFAULT_INTERNAL_ORDER,
        }
    }
}

impl TreeConfig {
    /// Default leaf order.
    pub const DEFAULT_LEAF_ORDER: usize = 64;
    /// Default internal order.
    pub const DEFAULT_INTERNAL_ORDER: usize = 128;
    /// Smallest usable leaf order.
    pub const MIN_LEAF_ORDER: usize = 1;
    /// Smallest usable internal order.
    pub const MIN_INTERNAL_ORDER: usize = 2;

    const LEAF_ORDER_VAR: &'static str = "BPLUS_LEAF_ORDER";
    const INTERNAL_ORDER_VAR: &'static str = "BPLUS_INTERNAL_ORDER";

    /// Build a configuration from explicit orders.
    ///
    /// # Errors
    ///
    /// Returns an error if either order is below its minimum.
    pub fn new(leaf_order: usize, internal_order: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            leaf_order: Self::check_leaf_order(Self::LEAF_ORDER_VAR, leaf_order)?,
            internal_order: Self::check_internal_order(Self::INTERNAL_ORDER_VAR, internal_order)?,
        })
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BPLUS_LEAF_ORDER`: leaf order (default: `64`)
    /// - `BPLUS_INTERNAL_ORDER`: internal order (default: `128`)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but is not a number or is below
    /// its minimum.
    pub fn from_env() -> Result<Self, ConfigError> {
        let leaf_order = Self::load_order(Self::LEAF_ORDER_VAR, Self::DEFAULT_LEAF_ORDER)?;
        let internal_order =
            Self::load_order(Self::INTERNAL_ORDER_VAR, Self::DEFAULT_INTERNAL_ORDER)?;

        Ok(Self {
            leaf_order: Self::check_leaf_order(Self::LEAF_ORDER_VAR, leaf_order)?,
            internal_order: Self::check_internal_order(Self::INTERNAL_ORDER_VAR, internal_order)?,
        })
    }

    /// Leaf order `kd`.
    #[must_use]
    pub const fn leaf_order(&self) -> usize {
        self.leaf_order
    }

    /// Internal order `kx`.
    #[must_use]
    pub const fn internal_order(&self) -> usize {
        self.internal_order
    }

    /// Maximum number of entries in a leaf (`2·kd`).
    #[must_use]
    pub const fn leaf_capacity(&self) -> usize {
        2 * self.leaf_order
    }

    /// Separator count above which an internal node is split on the way down (`2·kx`).
    #[must_use]
    pub const fn internal_capacity(&self) -> usize {
        2 * self.internal_order
    }

    /// Load one order from the environment.
    ///
    /// Returns the default if not set.
    fn load_order(name: &str, default: usize) -> Result<usize, ConfigError> {
        Self::parse_order(name, std::env::var(name).ok(), default)
    }

    /// Parse a raw order value, surrounding whitespace allowed.
    fn parse_order(name: &str, raw: Option<String>, default: usize) -> Result<usize, ConfigError> {
        let Some(value) = raw else {
            return Ok(default);
        };
        value
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("'{value}' is not a valid order"),
            })
    }

    fn check_leaf_order(name: &str, order: usize) -> Result<usize, ConfigError> {
        if order < Self::MIN_LEAF_ORDER {
            return Err(ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("must be at least {}", Self::MIN_LEAF_ORDER),
            });
        }
        Ok(order)
    }

    fn check_internal_order(name: &str, order: usize) -> Result<usize, ConfigError> {
        if order < Self::MIN_INTERNAL_ORDER {
            return Err(ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("must be at least {}", Self::MIN_INTERNAL_ORDER),
            });
        }
        Ok(order)
    }
}
