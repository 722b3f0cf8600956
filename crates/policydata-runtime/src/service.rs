//! The policy data service: resolve, look up, fetch, reconcile, store.
//!
//! # Execution Flow
//! 1. Resolve the strategy name (unknown names fail before any I/O)
//! 2. Unless the caller forces a refresh, return a cached record if present
//! 3. Fan-out: fetch every source concurrently, all-or-nothing
//! 4. Fan-in: reconcile with the resolved strategy
//! 5. Write the result back to the cache and return it

use std::sync::Arc;

use policydata_core::{
    MemberId, PolicyRecord, ReconcileError, RecordError, StrategyError, StrategyRegistry,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{CacheStore, PolicyCache};
use crate::config::{ConfigError, RuntimeConfig};
use crate::fetch::{FetchError, PolicyFetcher};
use crate::sources::{NormalizeError, PolicySource, SourceRegistry};

/// Failures visible to callers of [`PolicyDataService::policy_data`].
#[derive(Error, Debug)]
pub enum PolicyDataError {
    #[error(transparent)]
    UnknownStrategy(#[from] StrategyError),

    #[error("Policy data fetch failed: {0}")]
    SourceFetchFailed(#[source] FetchError),

    #[error("Source '{source_name}' returned an invalid record: {error}")]
    InvalidRecordShape {
        source_name: String,
        #[source]
        error: RecordError,
    },

    #[error("Reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

impl PolicyDataError {
    /// Stable identifier for transport mapping.
    pub fn code(&self) -> &'static str {
        match self {
            PolicyDataError::UnknownStrategy(_) => "unknown_strategy",
            PolicyDataError::SourceFetchFailed(_) => "fetch_failed",
            PolicyDataError::InvalidRecordShape { .. } => "invalid_record_shape",
            PolicyDataError::Reconcile(_) => "reconcile_failed",
        }
    }
}

impl From<FetchError> for PolicyDataError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Normalize {
                source_name,
                error: NormalizeError::Record(error @ (RecordError::InvalidShape { .. } | RecordError::NotAnObject { .. })),
            } => PolicyDataError::InvalidRecordShape { source_name, error },
            other => PolicyDataError::SourceFetchFailed(other),
        }
    }
}

/// One lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDataRequest {
    pub member_id: MemberId,

    /// Strategy name. `None` selects the default.
    #[serde(default)]
    pub strategy: Option<String>,

    /// Skip the cache lookup. The fresh result is still written back.
    #[serde(default)]
    pub bust_cache: bool,
}

impl PolicyDataRequest {
    pub fn new(member_id: MemberId) -> Self {
        Self {
            member_id,
            strategy: None,
            bust_cache: false,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn bust_cache(mut self, bust_cache: bool) -> Self {
        self.bust_cache = bust_cache;
        self
    }
}

/// Where a returned record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Cache,
    Fresh,
}

/// Result of one lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDataResponse {
    pub record: PolicyRecord,
    /// Name of the strategy actually applied.
    pub strategy: String,
    pub origin: RecordOrigin,
}

/// Fetches, reconciles and caches policy data for members.
pub struct PolicyDataService {
    sources: Vec<Arc<dyn PolicySource>>,
    fetcher: PolicyFetcher,
    strategies: StrategyRegistry,
    cache: PolicyCache,
}

impl PolicyDataService {
    pub fn builder() -> PolicyDataServiceBuilder {
        PolicyDataServiceBuilder::default()
    }

    /// Consensus policy record for one member.
    #[tracing::instrument(
        name = "policy_data",
        skip_all,
        fields(member_id = %request.member_id, bust_cache = request.bust_cache)
    )]
    pub async fn policy_data(
        &self,
        request: &PolicyDataRequest,
    ) -> Result<PolicyDataResponse, PolicyDataError> {
        let member_id = request.member_id;
        let strategy = self
            .strategies
            .resolve_or_default(request.strategy.as_deref())?;
        let strategy_name = strategy.name();

        if !request.bust_cache {
            if let Some(record) = self.cache.read(member_id, strategy_name).await {
                return Ok(PolicyDataResponse {
                    record,
                    strategy: strategy_name.to_string(),
                    origin: RecordOrigin::Cache,
                });
            }
        }

        let records = self.fetcher.fetch(member_id, &self.sources).await?;
        let record = strategy.reconcile(&records)?;

        self.cache.write(member_id, strategy_name, &record).await;
        tracing::info!(
            member_id = %member_id,
            strategy = strategy_name,
            sources = records.len(),
            "Reconciled fresh policy record"
        );

        Ok(PolicyDataResponse {
            record,
            strategy: strategy_name.to_string(),
            origin: RecordOrigin::Fresh,
        })
    }

    /// Shorthand for a lookup with the default options.
    pub async fn get(&self, member_id: MemberId) -> Result<PolicyRecord, PolicyDataError> {
        self.policy_data(&PolicyDataRequest::new(member_id))
            .await
            .map(|response| response.record)
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    pub fn cache(&self) -> &PolicyCache {
        &self.cache
    }

    /// Names of the configured sources, in fetch order.
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|source| source.name()).collect()
    }
}

impl std::fmt::Debug for PolicyDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyDataService")
            .field("sources", &self.source_names())
            .field("fetch_timeout", &self.fetcher.timeout())
            .field("strategies", &self.strategies.names())
            .field("cache", &self.cache)
            .finish()
    }
}

/// Builder for [`PolicyDataService`].
#[derive(Default)]
pub struct PolicyDataServiceBuilder {
    config: Option<RuntimeConfig>,
    cache_store: Option<Arc<dyn CacheStore>>,
    sources: Vec<Arc<dyn PolicySource>>,
    strategies: Option<StrategyRegistry>,
    source_registry: Option<SourceRegistry>,
    http_client: Option<reqwest::Client>,
}

impl PolicyDataServiceBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this store instead of the one `cache_dir` selects.
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Add an explicit source. Explicit sources replace the configured list.
    pub fn source(mut self, source: Arc<dyn PolicySource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Use a custom registry. Its own default strategy is kept; the
    /// config's `default_strategy` only applies to the built-in registry.
    pub fn strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn source_registry(mut self, registry: SourceRegistry) -> Self {
        self.source_registry = Some(registry);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Validate the configuration and assemble the service.
    pub fn build(self) -> Result<PolicyDataService, ConfigError> {
        let config = self.config.unwrap_or_default();
        config.validate_limits()?;

        let strategies = match self.strategies {
            Some(strategies) => strategies,
            None => {
                let mut strategies = StrategyRegistry::with_defaults();
                strategies
                    .set_default(&config.default_strategy)
                    .map_err(|e| ConfigError::Validation(format!("default_strategy: {e}")))?;
                strategies
            }
        };

        let sources = if self.sources.is_empty() {
            let registry = self.source_registry.unwrap_or_else(SourceRegistry::with_defaults);
            config.build_sources(&registry)?
        } else {
            self.sources
        };

        let fetcher = match self.http_client {
            Some(client) => PolicyFetcher::with_client(client, config.fetch_timeout),
            None => PolicyFetcher::new(config.fetch_timeout).map_err(ConfigError::HttpClient)?,
        };

        let store = self
            .cache_store
            .unwrap_or_else(|| config.build_cache_store());

        Ok(PolicyDataService {
            sources,
            fetcher,
            strategies,
            cache: PolicyCache::new(store, config.cache_ttl),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MokaCacheStore;
    use crate::config::SourceSettings;
    use std::time::Duration;

    fn member(id: u64) -> MemberId {
        MemberId::new(id).unwrap()
    }

    /// Sources pointing at an address nothing listens on.
    async fn unreachable_config() -> RuntimeConfig {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        RuntimeConfig {
            sources: vec![SourceSettings::new("api1").with("base_url", base_url)],
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn test_request_builder() {
        let request = PolicyDataRequest::new(member(25))
            .with_strategy("max_strategy")
            .bust_cache(true);
        assert_eq!(request.member_id, member(25));
        assert_eq!(request.strategy.as_deref(), Some("max_strategy"));
        assert!(request.bust_cache);
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: PolicyDataRequest = serde_json::from_str(r#"{"member_id": 25}"#).unwrap();
        assert_eq!(request, PolicyDataRequest::new(member(25)));

        assert!(serde_json::from_str::<PolicyDataRequest>(r#"{"member_id": 0}"#).is_err());
    }

    #[test]
    fn test_error_codes() {
        let unknown = PolicyDataError::from(StrategyError::UnknownStrategy {
            name: "median".to_string(),
            available: vec![],
        });
        assert_eq!(unknown.code(), "unknown_strategy");

        let timeout = PolicyDataError::from(FetchError::Timeout {
            source_name: "api1".to_string(),
            timeout: Duration::from_secs(6),
        });
        assert_eq!(timeout.code(), "fetch_failed");

        let shape = PolicyDataError::from(FetchError::Normalize {
            source_name: "api1".to_string(),
            error: NormalizeError::Record(RecordError::InvalidShape {
                expected: vec![],
                found: vec!["deductible".to_string()],
            }),
        });
        assert_eq!(shape.code(), "invalid_record_shape");

        let missing = PolicyDataError::from(FetchError::Normalize {
            source_name: "api3".to_string(),
            error: NormalizeError::MissingField("stop_loss".to_string()),
        });
        assert_eq!(missing.code(), "fetch_failed");

        assert_eq!(
            PolicyDataError::from(ReconcileError::EmptyInput).code(),
            "reconcile_failed"
        );
    }

    #[test]
    fn test_build_with_defaults() {
        let service = PolicyDataService::builder().build().unwrap();
        assert_eq!(service.source_names(), vec!["api1", "api2", "api3"]);
        assert_eq!(service.strategies().default_name(), "average_strategy");
        assert_eq!(service.cache().ttl(), Duration::from_secs(1200));
    }

    #[test]
    fn test_build_rejects_unknown_default_strategy() {
        let config = RuntimeConfig {
            default_strategy: "median_strategy".to_string(),
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            PolicyDataService::builder().config(config).build(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_supplied_registry_keeps_its_default() {
        let mut registry = StrategyRegistry::with_defaults();
        registry.set_default("max_strategy").unwrap();

        let service = PolicyDataService::builder()
            .config(RuntimeConfig::default())
            .strategies(registry)
            .build()
            .unwrap();
        assert_eq!(service.strategies().default_name(), "max_strategy");

        let config = RuntimeConfig {
            default_strategy: "max_strategy".to_string(),
            ..RuntimeConfig::default()
        };
        let service = PolicyDataService::builder().config(config).build().unwrap();
        assert_eq!(service.strategies().default_name(), "max_strategy");
    }

    #[test]
    fn test_build_rejects_zero_timeout() {
        let config = RuntimeConfig {
            fetch_timeout: Duration::ZERO,
            ..RuntimeConfig::default()
        };
        assert!(PolicyDataService::builder().config(config).build().is_err());
    }

    #[test]
    fn test_build_reports_missing_credential() {
        let config = RuntimeConfig {
            sources: vec![SourceSettings::new("api2").with("api_key_env", "POLICYDATA_UNSET_KEY_98765")],
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            PolicyDataService::builder().config(config).build(),
            Err(ConfigError::Source(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_fetch() {
        let store = Arc::new(MokaCacheStore::default());
        let service = PolicyDataService::builder()
            .config(unreachable_config().await)
            .cache_store(store.clone())
            .build()
            .unwrap();

        let record = PolicyRecord::new(1.0, 2.0, 3.0).unwrap();
        service.cache().write(member(5), "max_strategy", &record).await;

        let request = PolicyDataRequest::new(member(5)).with_strategy("max_strategy");
        let response = service.policy_data(&request).await.unwrap();
        assert_eq!(response.record, record);
        assert_eq!(response.origin, RecordOrigin::Cache);
        assert_eq!(response.strategy, "max_strategy");
    }

    #[tokio::test]
    async fn test_bust_cache_skips_lookup() {
        let service = PolicyDataService::builder()
            .config(unreachable_config().await)
            .build()
            .unwrap();

        let record = PolicyRecord::new(1.0, 2.0, 3.0).unwrap();
        service.cache().write(member(5), "average_strategy", &record).await;

        // The cached entry would have answered; the refresh must go to the network.
        let request = PolicyDataRequest::new(member(5)).bust_cache(true);
        let err = service.policy_data(&request).await.unwrap_err();
        assert_eq!(err.code(), "fetch_failed");

        // A failed refresh leaves the previous entry alone.
        assert_eq!(service.cache().read(member(5), "average_strategy").await, Some(record));
    }

    #[tokio::test]
    async fn test_unknown_strategy_fails_before_cache() {
        let store = Arc::new(MokaCacheStore::default());
        let service = PolicyDataService::builder()
            .config(unreachable_config().await)
            .cache_store(store.clone())
            .build()
            .unwrap();

        let request = PolicyDataRequest::new(member(5)).with_strategy("median_strategy");
        let err = service.policy_data(&request).await.unwrap_err();
        assert_eq!(err.code(), "unknown_strategy");
        assert!(store.get("policydata_member5_median_strategy").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_strategy_uses_default() {
        let service = PolicyDataService::builder()
            .config(unreachable_config().await)
            .build()
            .unwrap();

        let record = PolicyRecord::new(1.0, 2.0, 3.0).unwrap();
        service.cache().write(member(8), "average_strategy", &record).await;

        let response = service
            .policy_data(&PolicyDataRequest::new(member(8)).with_strategy(""))
            .await
            .unwrap();
        assert_eq!(response.strategy, "average_strategy");
        assert_eq!(service.get(member(8)).await.unwrap(), record);
    }
}
