//! Normalized policy records.
//!
//! A record carries exactly three figures: deductible, stop-loss and
//! out-of-pocket maximum. Untyped JSON (from a provider or from the cache)
//! becomes a record only through [`PolicyRecord::from_json`], which checks
//! the key set before any value is read.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Errors from record construction and shape validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Expected a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    #[error("Invalid record keys: expected {expected:?}, got {found:?}")]
    InvalidShape {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// One of the three standardized fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyField {
    Deductible,
    StopLoss,
    OopMax,
}

impl PolicyField {
    /// All fields, in wire order.
    pub const ALL: [PolicyField; 3] = [
        PolicyField::Deductible,
        PolicyField::StopLoss,
        PolicyField::OopMax,
    ];

    /// The JSON key for this field.
    pub fn key(self) -> &'static str {
        match self {
            PolicyField::Deductible => "deductible",
            PolicyField::StopLoss => "stop_loss",
            PolicyField::OopMax => "oop_max",
        }
    }
}

impl fmt::Display for PolicyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The exact key set of a normalized record.
pub const STANDARDIZED_KEYS: [&str; 3] = ["deductible", "stop_loss", "oop_max"];

/// A normalized policy record.
///
/// All three values are finite and non-negative. The fields are private so
/// that the invariant cannot be bypassed after construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, JsonValue>")]
pub struct PolicyRecord {
    deductible: f64,
    stop_loss: f64,
    oop_max: f64,
}

impl PolicyRecord {
    /// Create a record, validating every value.
    pub fn new(deductible: f64, stop_loss: f64, oop_max: f64) -> Result<Self, RecordError> {
        Ok(Self {
            deductible: check_value(PolicyField::Deductible, deductible)?,
            stop_loss: check_value(PolicyField::StopLoss, stop_loss)?,
            oop_max: check_value(PolicyField::OopMax, oop_max)?,
        })
    }

    /// Build a record by computing each field in turn.
    pub fn try_from_fn(mut value_of: impl FnMut(PolicyField) -> f64) -> Result<Self, RecordError> {
        Self::new(
            value_of(PolicyField::Deductible),
            value_of(PolicyField::StopLoss),
            value_of(PolicyField::OopMax),
        )
    }

    /// Parse a record from an untyped JSON value.
    pub fn from_json(value: &JsonValue) -> Result<Self, RecordError> {
        let map = value.as_object().ok_or(RecordError::NotAnObject {
            found: json_kind(value),
        })?;
        Self::from_map(map)
    }

    /// Parse a record from a JSON object.
    ///
    /// The key set must equal [`STANDARDIZED_KEYS`] exactly. Extra keys are
    /// as fatal as missing ones.
    pub fn from_map(map: &Map<String, JsonValue>) -> Result<Self, RecordError> {
        validate_keys(map.keys().map(String::as_str))?;

        Self::new(
            read_number(map, PolicyField::Deductible)?,
            read_number(map, PolicyField::StopLoss)?,
            read_number(map, PolicyField::OopMax)?,
        )
    }

    /// Value of a single field.
    pub fn get(&self, field: PolicyField) -> f64 {
        match field {
            PolicyField::Deductible => self.deductible,
            PolicyField::StopLoss => self.stop_loss,
            PolicyField::OopMax => self.oop_max,
        }
    }

    pub fn deductible(&self) -> f64 {
        self.deductible
    }

    pub fn stop_loss(&self) -> f64 {
        self.stop_loss
    }

    pub fn oop_max(&self) -> f64 {
        self.oop_max
    }

    /// Render as a JSON object with the standardized keys.
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "deductible": self.deductible,
            "stop_loss": self.stop_loss,
            "oop_max": self.oop_max,
        })
    }

    /// Compare field by field with an absolute tolerance.
    pub fn approx_eq(&self, other: &PolicyRecord, tolerance: f64) -> bool {
        PolicyField::ALL
            .iter()
            .all(|&field| (self.get(field) - other.get(field)).abs() <= tolerance)
    }
}

impl TryFrom<Map<String, JsonValue>> for PolicyRecord {
    type Error = RecordError;

    fn try_from(map: Map<String, JsonValue>) -> Result<Self, Self::Error> {
        Self::from_map(&map)
    }
}

/// Check that a key set is exactly [`STANDARDIZED_KEYS`].
pub fn validate_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Result<(), RecordError> {
    let found: BTreeSet<&str> = keys.into_iter().collect();
    let expected: BTreeSet<&str> = STANDARDIZED_KEYS.into_iter().collect();

    if found != expected {
        return Err(RecordError::InvalidShape {
            expected: STANDARDIZED_KEYS.iter().map(|k| k.to_string()).collect(),
            found: found.into_iter().map(str::to_string).collect(),
        });
    }

    Ok(())
}

/// Short name of a JSON value's type, for error messages.
pub fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn read_number(map: &Map<String, JsonValue>, field: PolicyField) -> Result<f64, RecordError> {
    let value = &map[field.key()];
    value.as_f64().ok_or_else(|| RecordError::InvalidValue {
        field: field.key(),
        reason: format!("expected a number, got {}", json_kind(value)),
    })
}

fn check_value(field: PolicyField, value: f64) -> Result<f64, RecordError> {
    if !value.is_finite() {
        return Err(RecordError::InvalidValue {
            field: field.key(),
            reason: format!("{value} is not finite"),
        });
    }
    if value < 0.0 {
        return Err(RecordError::InvalidValue {
            field: field.key(),
            reason: format!("{value} is negative"),
        });
    }
    Ok(value)
}
