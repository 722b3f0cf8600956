//! # policydata-core
//!
//! Deterministic policy data reconciliation.
//!
//! This crate answers the pure half of the question "what is this member's
//! effective deductible, stop-loss and out-of-pocket maximum?":
//! - What does a valid normalized record look like?
//! - How are several records combined into one?
//! - Under which key is a result cached?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: strategies are pure functions of their input
//! 2. **No I/O**: nothing here touches the network, the clock or a cache
//! 3. **Strict shape**: a record has exactly three keys, never more or fewer
//! 4. **No silent degradation**: empty or malformed input is an error
//!
//! ## Example
//!
//! ```rust,ignore
//! use policydata_core::{PolicyRecord, StrategyRegistry};
//!
//! let registry = StrategyRegistry::with_defaults();
//! let records = vec![
//!     PolicyRecord::new(1000.0, 6000.0, 5000.0)?,
//!     PolicyRecord::new(3000.0, 12000.0, 7000.0)?,
//! ];
//! let consensus = registry.resolve("max_strategy")?.reconcile(&records)?;
//! assert_eq!(consensus.deductible(), 3000.0);
//! ```

pub mod cache_key;
pub mod member;
pub mod record;
pub mod strategies;

// Re-export main types at crate root
pub use cache_key::{cache_key, CACHE_KEY_PREFIX};
pub use member::{MemberId, MemberIdError};
pub use record::{json_kind, validate_keys, PolicyField, PolicyRecord, RecordError, STANDARDIZED_KEYS};
pub use strategies::{
    average_strategy, max_strategy, ReconcileError, Strategy, StrategyError, StrategyFn,
    StrategyRegistry, AVERAGE_STRATEGY, DEFAULT_STRATEGY, MAX_STRATEGY,
};
