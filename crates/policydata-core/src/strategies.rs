//! Reconciliation strategies.
//!
//! A strategy combines the records returned by several sources into one
//! consensus record. Strategies are plain functions registered under a
//! stable name; callers resolve them through [`StrategyRegistry`] and never
//! branch on the name themselves.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = StrategyRegistry::with_defaults();
//! let strategy = registry.resolve("max_strategy")?;
//! let consensus = strategy.reconcile(&records)?;
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::record::{PolicyField, PolicyRecord, RecordError};

/// Name of the strategy used when the caller does not pick one.
pub const DEFAULT_STRATEGY: &str = "average_strategy";

/// Errors from applying a strategy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("Cannot reconcile an empty list of records")]
    EmptyInput,

    #[error("Invalid record shape: {0}")]
    InvalidRecordShape(#[from] RecordError),
}

/// Errors from resolving a strategy by name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("Unknown coalesce strategy: '{name}'. Available: {available:?}")]
    UnknownStrategy {
        name: String,
        available: Vec<String>,
    },
}

/// Signature every strategy implements.
pub type StrategyFn = fn(&[PolicyRecord]) -> Result<PolicyRecord, ReconcileError>;

/// A named reconciliation function.
#[derive(Clone, Copy)]
pub struct Strategy {
    name: &'static str,
    description: &'static str,
    reconcile: StrategyFn,
}

impl Strategy {
    pub const fn new(name: &'static str, description: &'static str, reconcile: StrategyFn) -> Self {
        Self {
            name,
            description,
            reconcile,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    /// Combine typed records into one.
    pub fn reconcile(&self, records: &[PolicyRecord]) -> Result<PolicyRecord, ReconcileError> {
        (self.reconcile)(records)
    }

    /// Validate untyped records, then combine them.
    ///
    /// Any record with the wrong key set fails the whole call. Nothing is
    /// skipped.
    pub fn reconcile_json(&self, raw: &[JsonValue]) -> Result<PolicyRecord, ReconcileError> {
        if raw.is_empty() {
            return Err(ReconcileError::EmptyInput);
        }

        let records = raw
            .iter()
            .map(PolicyRecord::from_json)
            .collect::<Result<Vec<_>, _>>()?;

        self.reconcile(&records)
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy").field("name", &self.name).finish()
    }
}

/// Field-wise arithmetic mean.
pub const AVERAGE_STRATEGY: Strategy = Strategy::new(
    "average_strategy",
    "Arithmetic mean of each field across all sources",
    average_strategy,
);

/// Field-wise maximum.
pub const MAX_STRATEGY: Strategy = Strategy::new(
    "max_strategy",
    "Maximum of each field across all sources",
    max_strategy,
);

/// Mean of each field across `records`.
pub fn average_strategy(records: &[PolicyRecord]) -> Result<PolicyRecord, ReconcileError> {
    if records.is_empty() {
        return Err(ReconcileError::EmptyInput);
    }

    let record = PolicyRecord::try_from_fn(|field| mean(&column(records, field)))?;
    Ok(record)
}

/// Maximum of each field across `records`.
pub fn max_strategy(records: &[PolicyRecord]) -> Result<PolicyRecord, ReconcileError> {
    if records.is_empty() {
        return Err(ReconcileError::EmptyInput);
    }

    let record = PolicyRecord::try_from_fn(|field| {
        column(records, field)
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max)
    })?;
    Ok(record)
}

fn column(records: &[PolicyRecord], field: PolicyField) -> Vec<f64> {
    records.iter().map(|r| r.get(field)).collect()
}

fn mean(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    if sum.is_finite() {
        sum / n
    } else {
        // sum overflowed; scale first so the result stays finite
        values.iter().map(|v| v / n).sum()
    }
}

/// Registry of reconciliation strategies, keyed by name.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Strategy>,
    default: String,
}

impl StrategyRegistry {
    /// Create an empty registry whose default is [`DEFAULT_STRATEGY`].
    ///
    /// The default must still be registered before it can be resolved.
    pub fn new() -> Self {
        Self {
            strategies: BTreeMap::new(),
            default: DEFAULT_STRATEGY.to_string(),
        }
    }

    /// Create a registry with the built-in strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(AVERAGE_STRATEGY);
        registry.register(MAX_STRATEGY);
        registry
    }

    /// Register a strategy under its name, replacing any existing entry.
    pub fn register(&mut self, strategy: Strategy) {
        if self
            .strategies
            .insert(strategy.name().to_string(), strategy)
            .is_some()
        {
            tracing::debug!(strategy = strategy.name(), "Replaced registered strategy");
        }
    }

    /// Look up a strategy by name.
    pub fn resolve(&self, name: &str) -> Result<&Strategy, StrategyError> {
        self.strategies
            .get(name)
            .ok_or_else(|| StrategyError::UnknownStrategy {
                name: name.to_string(),
                available: self.names().into_iter().map(str::to_string).collect(),
            })
    }

    /// Look up `name`, or the default strategy when `name` is `None` or empty.
    pub fn resolve_or_default(&self, name: Option<&str>) -> Result<&Strategy, StrategyError> {
        match name.filter(|n| !n.is_empty()) {
            Some(name) => self.resolve(name),
            None => self.resolve(&self.default),
        }
    }

    /// Change the default strategy. The name must already be registered.
    pub fn set_default(&mut self, name: &str) -> Result<(), StrategyError> {
        self.resolve(name)?;
        self.default = name.to_string();
        Ok(())
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }

    /// Registered strategies, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.values()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
