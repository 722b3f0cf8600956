//! Member identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing or constructing a [`MemberId`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemberIdError {
    #[error("member_id is required")]
    Missing,

    #[error("invalid member_id: '{0}' is not an integer")]
    Invalid(String),

    #[error("invalid member_id: must be a positive integer")]
    NotPositive,
}

/// Identifier of the insured member whose policy data is reconciled.
///
/// Always a positive integer. Zero and negative values are rejected at
/// construction, so every `MemberId` in the system is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct MemberId(NonZeroU64);

impl MemberId {
    /// Create a member id from a raw integer.
    pub fn new(id: u64) -> Result<Self, MemberIdError> {
        NonZeroU64::new(id)
            .map(Self)
            .ok_or(MemberIdError::NotPositive)
    }

    /// Parse an optional raw value, as received from a query string or flag.
    pub fn parse_optional(raw: Option<&str>) -> Result<Self, MemberIdError> {
        match raw {
            Some(raw) => raw.parse(),
            None => Err(MemberIdError::Missing),
        }
    }

    /// The raw integer value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl FromStr for MemberId {
    type Err = MemberIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(MemberIdError::Missing);
        }

        // "-3" and "0" are integers, just not valid ids
        match trimmed.parse::<i128>() {
            Ok(value) if value <= 0 => Err(MemberIdError::NotPositive),
            Ok(value) => u64::try_from(value)
                .map_err(|_| MemberIdError::Invalid(trimmed.to_string()))
                .and_then(Self::new),
            Err(_) => Err(MemberIdError::Invalid(trimmed.to_string())),
        }
    }
}

impl TryFrom<u64> for MemberId {
    type Error = MemberIdError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MemberId> for u64 {
    fn from(id: MemberId) -> Self {
        id.get()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
