//! Runtime configuration.
//!
//! Loaded from YAML. Every field has a default, so an empty document is a
//! valid configuration that queries the three built-in providers.
//!
//! ```yaml
//! fetch_timeout: 6s
//! cache_ttl: 20m
//! cache_capacity: 10000
//! cache_dir: /var/cache/policydata  # omit to cache in memory
//! default_strategy: average_strategy
//! sources:
//!   - type: api1
//!     base_url: https://api1.com
//!   - type: api2
//!     api_key_env: API2_KEY
//!   - type: api3
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use policydata_core::{StrategyRegistry, DEFAULT_STRATEGY};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::cache::{
    CacheStore, FileCacheStore, MokaCacheStore, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL,
};
use crate::fetch::DEFAULT_FETCH_TIMEOUT;
use crate::sources::{PolicySource, SourceConfigError, SourceRegistry};

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Validation(String),

    #[error(transparent)]
    Source(#[from] SourceConfigError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// One configured source: a registered type plus its free-form settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(rename = "type")]
    pub source_type: String,

    #[serde(flatten)]
    pub settings: Map<String, JsonValue>,
}

impl SourceSettings {
    pub fn new(source_type: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            settings: Map::new(),
        }
    }

    /// Add one setting.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Settings as the JSON object handed to the source factory.
    pub fn settings_json(&self) -> JsonValue {
        JsonValue::Object(self.settings.clone())
    }
}

/// Configuration for the policy data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Deadline applied to each source request.
    #[serde(with = "duration_text")]
    pub fetch_timeout: Duration,

    /// Lifetime of a cached reconciled record.
    #[serde(with = "duration_text")]
    pub cache_ttl: Duration,

    /// Entry bound of the in-memory store.
    pub cache_capacity: u64,

    /// Directory for an on-disk cache shared across processes. When unset
    /// the cache is in memory and lives only as long as the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Strategy used when a request names none.
    pub default_strategy: String,

    /// Sources queried for every request, in order.
    pub sources: Vec<SourceSettings>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_dir: None,
            default_strategy: DEFAULT_STRATEGY.to_string(),
            sources: default_sources(&SourceRegistry::with_defaults()),
        }
    }
}

impl RuntimeConfig {
    /// Parse a config from YAML and check its limits.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate_limits()?;
        Ok(config)
    }

    /// Parse a config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Validate against the built-in sources and strategies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_with(&SourceRegistry::with_defaults(), &StrategyRegistry::with_defaults())
    }

    /// Validate against the given registries.
    pub fn validate_with(
        &self,
        sources: &SourceRegistry,
        strategies: &StrategyRegistry,
    ) -> Result<(), ConfigError> {
        self.validate_limits()?;

        if !strategies.contains(&self.default_strategy) {
            return Err(ConfigError::Validation(format!(
                "default_strategy '{}' is not registered. Available: {:?}",
                self.default_strategy,
                strategies.names()
            )));
        }

        for entry in &self.sources {
            sources.validate(&entry.source_type, &entry.settings_json())?;
        }

        Ok(())
    }

    /// Checks that need no registry.
    pub fn validate_limits(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "fetch_timeout must be greater than zero".to_string(),
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::Validation(
                "cache_ttl must be greater than zero".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Validation(
                "cache_capacity must be greater than zero".to_string(),
            ));
        }
        if self
            .cache_dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            return Err(ConfigError::Validation(
                "cache_dir must not be empty".to_string(),
            ));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::Validation(
                "at least one source must be configured".to_string(),
            ));
        }
        Ok(())
    }

    /// The store `cache_dir` selects: files under it, or memory when unset.
    pub fn build_cache_store(&self) -> Arc<dyn CacheStore> {
        match &self.cache_dir {
            Some(dir) => Arc::new(FileCacheStore::new(dir)),
            None => Arc::new(MokaCacheStore::new(self.cache_capacity)),
        }
    }

    /// Instantiate the configured sources.
    ///
    /// Reads credential environment variables.
    pub fn build_sources(
        &self,
        registry: &SourceRegistry,
    ) -> Result<Vec<Arc<dyn PolicySource>>, ConfigError> {
        self.sources
            .iter()
            .map(|entry| {
                registry
                    .create(&entry.source_type, &entry.settings_json())
                    .map_err(ConfigError::from)
            })
            .collect()
    }
}

/// One entry per registered type, with that factory's default settings.
fn default_sources(registry: &SourceRegistry) -> Vec<SourceSettings> {
    registry
        .available_types()
        .into_iter()
        .filter_map(|source_type| {
            let defaults = registry.get_factory(source_type)?.default_config();
            Some(SourceSettings {
                source_type: source_type.to_string(),
                settings: match defaults {
                    JsonValue::Object(map) => map,
                    _ => Map::new(),
                },
            })
        })
        .collect()
}

/// Durations as humantime text (`"6s"`, `"20m"`) or a bare number of seconds.
mod duration_text {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match RawDuration::deserialize(deserializer)? {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(text) => {
                humantime::parse_duration(&text).map_err(serde::de::Error::custom)
            }
        }
    }
}
