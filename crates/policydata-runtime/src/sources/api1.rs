//! API1 provider.
//!
//! Already speaks the standard schema: a flat object with exactly
//! `deductible`, `stop_loss` and `oop_max`. Normalization is the strict
//! shape check and nothing more.

use std::sync::Arc;

use policydata_core::{MemberId, PolicyRecord};
use serde_json::Value as JsonValue;

use super::{
    Endpoint, NormalizeError, PolicySource, SourceConfigError, SourceFactory, SourceRequest,
};

pub const API1_DEFAULT_BASE_URL: &str = "https://api1.com";

/// Source for the API1 provider.
#[derive(Debug)]
pub struct Api1Source {
    endpoint: Endpoint,
}

impl Api1Source {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn from_config(settings: &JsonValue) -> Result<Self, SourceConfigError> {
        Endpoint::from_settings("api1", settings, API1_DEFAULT_BASE_URL, "API1 API key").map(Self::new)
    }
}

impl PolicySource for Api1Source {
    fn name(&self) -> &str {
        "api1"
    }

    fn build_request(&self, member_id: MemberId) -> SourceRequest<'_> {
        self.endpoint.request(member_id)
    }

    fn normalize(&self, raw: &JsonValue) -> Result<PolicyRecord, NormalizeError> {
        Ok(PolicyRecord::from_json(raw)?)
    }
}

/// Factory for [`Api1Source`].
///
/// ## Configuration Format
/// ```yaml
/// type: api1
/// base_url: https://api1.com     # optional
/// api_key_env: API1_KEY          # optional
/// ```
pub struct Api1SourceFactory;

impl SourceFactory for Api1SourceFactory {
    fn source_type(&self) -> &'static str {
        "api1"
    }

    fn create(&self, settings: &JsonValue) -> Result<Arc<dyn PolicySource>, SourceConfigError> {
        Ok(Arc::new(Api1Source::from_config(settings)?))
    }

    fn validate_config(&self, settings: &JsonValue) -> Result<(), SourceConfigError> {
        Endpoint::validate_settings(self.source_type(), settings)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "base_url": API1_DEFAULT_BASE_URL })
    }

    fn description(&self) -> &'static str {
        "API1 provider, flat standard schema"
    }
}
