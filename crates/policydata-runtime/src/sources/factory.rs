//! Source factory pattern for config-driven provider registration.
//!
//! New providers are added by registering a factory, never by branching on
//! a type name elsewhere.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = SourceRegistry::with_defaults();
//! let source = registry.create("api2", &serde_json::json!({"base_url": "https://api2.com"}))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use super::PolicySource;

/// Errors from building sources out of configuration.
#[derive(Error, Debug)]
pub enum SourceConfigError {
    #[error("Unknown source type: '{source_type}'. Available: {available:?}")]
    UnknownSourceType {
        source_type: String,
        available: Vec<String>,
    },

    #[error("Invalid configuration for source '{source_type}': {message}")]
    InvalidConfig {
        source_type: String,
        message: String,
    },

    #[error("{name} not set: configure '{env_var}' environment variable")]
    MissingCredential { name: &'static str, env_var: String },
}

/// Factory for creating policy sources from configuration.
///
/// Each factory:
/// 1. Validates its own settings format
/// 2. Creates source instances
/// 3. Provides a unique type identifier
pub trait SourceFactory: Send + Sync {
    /// Unique identifier for this source type, e.g. "api1".
    fn source_type(&self) -> &'static str;

    /// Create a source from JSON settings.
    fn create(&self, settings: &JsonValue) -> Result<Arc<dyn PolicySource>, SourceConfigError>;

    /// Validate settings without creating a source.
    ///
    /// Does not read credential environment variables.
    fn validate_config(&self, settings: &JsonValue) -> Result<(), SourceConfigError>;

    /// Default settings for this source type.
    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    /// Human-readable description of this source.
    fn description(&self) -> &'static str {
        "Policy data source"
    }
}

/// Registry of available source factories.
#[derive(Default)]
pub struct SourceRegistry {
    factories: BTreeMap<String, Arc<dyn SourceFactory>>,
}

impl SourceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source factory.
    ///
    /// If a factory with the same type already exists, it will be replaced.
    pub fn register(&mut self, factory: Arc<dyn SourceFactory>) {
        self.factories
            .insert(factory.source_type().to_string(), factory);
    }

    /// Create a source from type name and settings.
    pub fn create(
        &self,
        source_type: &str,
        settings: &JsonValue,
    ) -> Result<Arc<dyn PolicySource>, SourceConfigError> {
        self.factory(source_type)?.create(settings)
    }

    /// Validate settings for a source type.
    pub fn validate(&self, source_type: &str, settings: &JsonValue) -> Result<(), SourceConfigError> {
        self.factory(source_type)?.validate_config(settings)
    }

    /// List available source types.
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a source type is registered.
    pub fn has_source(&self, source_type: &str) -> bool {
        self.factories.contains_key(source_type)
    }

    /// Get the factory for a source type.
    pub fn get_factory(&self, source_type: &str) -> Option<&Arc<dyn SourceFactory>> {
        self.factories.get(source_type)
    }

    /// Create a registry with the three built-in providers registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::Api1SourceFactory));
        registry.register(Arc::new(super::Api2SourceFactory));
        registry.register(Arc::new(super::Api3SourceFactory));
        registry
    }

    fn factory(&self, source_type: &str) -> Result<&Arc<dyn SourceFactory>, SourceConfigError> {
        self.factories
            .get(source_type)
            .ok_or_else(|| SourceConfigError::UnknownSourceType {
                source_type: source_type.to_string(),
                available: self
                    .available_types()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            })
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.available_types())
            .finish()
    }
}
