//! # policydata-runtime
//!
//! Effectful half of policydata: provider HTTP calls, caching and the
//! service that ties them to the deterministic core.
//!
//! ## Important
//!
//! Everything that decides *what* a reconciled record is lives in
//! `policydata-core`. This crate only decides *where data comes from* and
//! *when it is reused*.
//!
//! ## Example
//!
//! ```rust,ignore
//! use policydata_runtime::{PolicyDataRequest, PolicyDataService, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_yaml_file("policydata.yaml")?;
//! let service = PolicyDataService::builder().config(config).build()?;
//!
//! let request = PolicyDataRequest::new(member_id).with_strategy("max_strategy");
//! let response = service.policy_data(&request).await?;
//! println!("{:?} from {:?}", response.record, response.origin);
//! ```

pub mod cache;
pub mod config;
pub mod fetch;
pub mod service;
pub mod sources;

pub use cache::{
    CacheError, CacheStore, CacheStoreError, FileCacheStore, MokaCacheStore, PolicyCache,
    DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL,
};
pub use config::{ConfigError, RuntimeConfig, SourceSettings};
pub use fetch::{FetchError, PolicyFetcher, DEFAULT_FETCH_TIMEOUT};
pub use service::{
    PolicyDataError, PolicyDataRequest, PolicyDataResponse, PolicyDataService,
    PolicyDataServiceBuilder, RecordOrigin,
};
pub use sources::{
    ApiCredential, CredentialSource, Endpoint, NormalizeError, PolicySource, SourceConfigError,
    SourceFactory, SourceRegistry, SourceRequest,
};

pub use policydata_core::{MemberId, MemberIdError, PolicyRecord, StrategyRegistry};
