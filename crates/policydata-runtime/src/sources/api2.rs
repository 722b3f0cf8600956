//! API2 provider.
//!
//! Wraps the figures in a `plan` object with camelCase names:
//!
//! ```json
//! {"memberId": 25, "plan": {"deductible": 1000, "stopLoss": 6000, "outOfPocketMax": 5000}}
//! ```

use std::sync::Arc;

use policydata_core::{MemberId, PolicyRecord};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::{
    Endpoint, NormalizeError, PolicySource, SourceConfigError, SourceFactory, SourceRequest,
};

pub const API2_DEFAULT_BASE_URL: &str = "https://api2.com";

/// API2 response format. Unrelated fields are ignored.
#[derive(Debug, Deserialize)]
struct Api2Response {
    plan: Api2Plan,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Api2Plan {
    deductible: f64,
    stop_loss: f64,
    out_of_pocket_max: f64,
}

/// Source for the API2 provider.
#[derive(Debug)]
pub struct Api2Source {
    endpoint: Endpoint,
}

impl Api2Source {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn from_config(settings: &JsonValue) -> Result<Self, SourceConfigError> {
        Endpoint::from_settings("api2", settings, API2_DEFAULT_BASE_URL, "API2 API key").map(Self::new)
    }
}

impl PolicySource for Api2Source {
    fn name(&self) -> &str {
        "api2"
    }

    fn build_request(&self, member_id: MemberId) -> SourceRequest<'_> {
        self.endpoint.request(member_id)
    }

    fn normalize(&self, raw: &JsonValue) -> Result<PolicyRecord, NormalizeError> {
        let response = Api2Response::deserialize(raw)
            .map_err(|e| NormalizeError::UnexpectedPayload(e.to_string()))?;

        let plan = response.plan;
        Ok(PolicyRecord::new(
            plan.deductible,
            plan.stop_loss,
            plan.out_of_pocket_max,
        )?)
    }
}

/// Factory for [`Api2Source`].
///
/// ## Configuration Format
/// ```yaml
/// type: api2
/// base_url: https://api2.com     # optional
/// api_key: pk-...                # optional, or api_key_env
/// api_key_header: x-api-key      # optional
/// ```
pub struct Api2SourceFactory;

impl SourceFactory for Api2SourceFactory {
    fn source_type(&self) -> &'static str {
        "api2"
    }

    fn create(&self, settings: &JsonValue) -> Result<Arc<dyn PolicySource>, SourceConfigError> {
        Ok(Arc::new(Api2Source::from_config(settings)?))
    }

    fn validate_config(&self, settings: &JsonValue) -> Result<(), SourceConfigError> {
        Endpoint::validate_settings(self.source_type(), settings)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "base_url": API2_DEFAULT_BASE_URL })
    }

    fn description(&self) -> &'static str {
        "API2 provider, nested camelCase plan object"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policydata_core::RecordError;
    use serde_json::json;

    fn source() -> Api2Source {
        Api2Source::from_config(&json!({})).unwrap()
    }

    #[test]
    fn test_normalize_nested_plan() {
        let raw = json!({
            "memberId": 25,
            "plan": {
                "deductible": 2000,
                "stopLoss": 7000,
                "outOfPocketMax": 8000,
                "network": "PPO"
            }
        });

        let record = source().normalize(&raw).unwrap();
        assert_eq!(record, PolicyRecord::new(2000.0, 7000.0, 8000.0).unwrap());
    }

    #[test]
    fn test_normalize_missing_field() {
        let raw = json!({"plan": {"deductible": 2000, "outOfPocketMax": 8000}});

        match source().normalize(&raw) {
            Err(NormalizeError::UnexpectedPayload(message)) => {
                assert!(message.contains("stopLoss"), "message: {message}");
            }
            other => panic!("Expected UnexpectedPayload, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_flat_payload_is_rejected() {
        let raw = json!({"deductible": 1000, "stop_loss": 6000, "oop_max": 5000});
        assert!(matches!(
            source().normalize(&raw),
            Err(NormalizeError::UnexpectedPayload(_))
        ));
    }

    #[test]
    fn test_normalize_string_amount_is_rejected() {
        let raw = json!({"plan": {"deductible": "2000", "stopLoss": 7000, "outOfPocketMax": 8000}});
        assert!(source().normalize(&raw).is_err());
    }

    #[test]
    fn test_normalize_negative_value() {
        let raw = json!({"plan": {"deductible": -5, "stopLoss": 7000, "outOfPocketMax": 8000}});
        assert!(matches!(
            source().normalize(&raw),
            Err(NormalizeError::Record(RecordError::InvalidValue { field: "deductible", .. }))
        ));
    }

    #[test]
    fn test_factory_validate_invalid_base_url() {
        let result = Api2SourceFactory.validate_config(&json!({"base_url": "invalid-url"}));
        assert!(result.is_err());
    }
}
