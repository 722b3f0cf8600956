//! API3 provider.
//!
//! Reports each figure as a benefit line. Amounts arrive either as JSON
//! numbers or as currency strings:
//!
//! ```json
//! {"benefits": [
//!     {"kind": "deductible", "amount": "$1,000.00"},
//!     {"kind": "stop_loss", "amount": 6000},
//!     {"kind": "out_of_pocket_max", "amount": "5,000"}
//! ]}
//! ```
//!
//! Lines of other kinds (copays, coinsurance) are ignored.

use std::sync::Arc;

use lazy_static::lazy_static;
use policydata_core::{json_kind, MemberId, PolicyField, PolicyRecord};
use regex::Regex;
use serde_json::Value as JsonValue;

use super::{
    Endpoint, NormalizeError, PolicySource, SourceConfigError, SourceFactory, SourceRequest,
};

pub const API3_DEFAULT_BASE_URL: &str = "https://api3.com";

lazy_static! {
    // "$1,000.00", "1000", " 6,000 ", "$ 250.5"
    static ref AMOUNT_PATTERN: Regex =
        Regex::new(r"^\s*\$?\s*(\d{1,3}(?:,\d{3})+|\d+)(\.\d+)?\s*$").unwrap();
}

/// Parse a benefit amount: a JSON number or a currency string.
pub fn parse_amount(value: &JsonValue) -> Result<f64, String> {
    match value {
        JsonValue::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("number {n} is out of range")),
        JsonValue::String(s) => {
            let captures = AMOUNT_PATTERN
                .captures(s)
                .ok_or_else(|| format!("'{s}' is not a currency amount"))?;

            let whole = captures[1].replace(',', "");
            let fraction = captures.get(2).map_or("", |m| m.as_str());
            format!("{whole}{fraction}")
                .parse::<f64>()
                .map_err(|e| format!("'{s}': {e}"))
        }
        other => Err(format!("expected number or string, got {}", json_kind(other))),
    }
}

fn benefit_kind(field: PolicyField) -> &'static str {
    match field {
        PolicyField::Deductible => "deductible",
        PolicyField::StopLoss => "stop_loss",
        PolicyField::OopMax => "out_of_pocket_max",
    }
}

fn field_for_kind(kind: &str) -> Option<PolicyField> {
    PolicyField::ALL
        .into_iter()
        .find(|field| benefit_kind(*field) == kind)
}

/// Source for the API3 provider.
#[derive(Debug)]
pub struct Api3Source {
    endpoint: Endpoint,
}

impl Api3Source {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn from_config(settings: &JsonValue) -> Result<Self, SourceConfigError> {
        Endpoint::from_settings("api3", settings, API3_DEFAULT_BASE_URL, "API3 API key").map(Self::new)
    }
}

impl PolicySource for Api3Source {
    fn name(&self) -> &str {
        "api3"
    }

    fn build_request(&self, member_id: MemberId) -> SourceRequest<'_> {
        self.endpoint.request(member_id)
    }

    fn normalize(&self, raw: &JsonValue) -> Result<PolicyRecord, NormalizeError> {
        let benefits = raw
            .get("benefits")
            .ok_or_else(|| NormalizeError::MissingField("benefits".to_string()))?
            .as_array()
            .ok_or_else(|| {
                NormalizeError::UnexpectedPayload(format!(
                    "'benefits' must be an array, got {}",
                    json_kind(&raw["benefits"])
                ))
            })?;

        let mut amounts: [Option<f64>; 3] = [None; 3];

        for line in benefits {
            let kind = line.get("kind").and_then(JsonValue::as_str).ok_or_else(|| {
                NormalizeError::UnexpectedPayload("benefit line without a string 'kind'".to_string())
            })?;

            let Some(field) = field_for_kind(kind) else {
                continue;
            };

            let amount = line
                .get("amount")
                .ok_or_else(|| NormalizeError::MissingField(format!("benefits[{kind}].amount")))?;
            let amount = parse_amount(amount).map_err(|reason| NormalizeError::NotANumber {
                field: kind.to_string(),
                reason,
            })?;

            let slot = &mut amounts[field as usize];
            if slot.is_some() {
                return Err(NormalizeError::UnexpectedPayload(format!(
                    "benefit '{kind}' listed more than once"
                )));
            }
            *slot = Some(amount);
        }

        let value_of = |field: PolicyField| {
            amounts[field as usize]
                .ok_or_else(|| NormalizeError::MissingField(benefit_kind(field).to_string()))
        };

        Ok(PolicyRecord::new(
            value_of(PolicyField::Deductible)?,
            value_of(PolicyField::StopLoss)?,
            value_of(PolicyField::OopMax)?,
        )?)
    }
}

/// Factory for [`Api3Source`].
///
/// ## Configuration Format
/// ```yaml
/// type: api3
/// base_url: https://api3.com     # optional
/// api_key_env: API3_KEY          # optional
/// api_key_header: authorization  # optional
/// ```
pub struct Api3SourceFactory;

impl SourceFactory for Api3SourceFactory {
    fn source_type(&self) -> &'static str {
        "api3"
    }

    fn create(&self, settings: &JsonValue) -> Result<Arc<dyn PolicySource>, SourceConfigError> {
        Ok(Arc::new(Api3Source::from_config(settings)?))
    }

    fn validate_config(&self, settings: &JsonValue) -> Result<(), SourceConfigError> {
        Endpoint::validate_settings(self.source_type(), settings)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "base_url": API3_DEFAULT_BASE_URL })
    }

    fn description(&self) -> &'static str {
        "API3 provider, list of benefit lines with currency amounts"
    }
}
