//! Concurrent fetch from every configured source.
//!
//! All sources are requested at once and awaited together. The first
//! failure (an HTTP error, a non-2xx status, an unreadable body, a payload
//! that does not normalize, or a timeout) fails the whole fetch and drops
//! the outstanding requests. There is no partial result and no retry.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use policydata_core::{MemberId, PolicyRecord};
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::sources::{NormalizeError, PolicySource};

/// Default per-source deadline.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(6);

/// Errors from fetching one source. Every variant names the source.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Source '{source_name}': invalid request: {message}")]
    InvalidRequest { source_name: String, message: String },

    #[error("Source '{source_name}' timed out after {timeout:?}")]
    Timeout { source_name: String, timeout: Duration },

    #[error("Source '{source_name}' returned HTTP {status}")]
    Status { source_name: String, status: u16 },

    #[error("Source '{source_name}': request failed: {error}")]
    Http {
        source_name: String,
        #[source]
        error: reqwest::Error,
    },

    #[error("Source '{source_name}': response is not JSON: {error}")]
    Body {
        source_name: String,
        #[source]
        error: serde_json::Error,
    },

    #[error("Source '{source_name}': {error}")]
    Normalize {
        source_name: String,
        #[source]
        error: NormalizeError,
    },
}

impl FetchError {
    /// Name of the source that failed.
    pub fn source_name(&self) -> &str {
        match self {
            FetchError::InvalidRequest { source_name, .. }
            | FetchError::Timeout { source_name, .. }
            | FetchError::Status { source_name, .. }
            | FetchError::Http { source_name, .. }
            | FetchError::Body { source_name, .. }
            | FetchError::Normalize { source_name, .. } => source_name,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

/// Issues the per-source HTTP calls.
#[derive(Debug, Clone)]
pub struct PolicyFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl PolicyFetcher {
    /// Create a fetcher with its own HTTP client.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, timeout))
    }

    /// Create a fetcher around an existing client.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch and normalize one record per source, in source order.
    #[tracing::instrument(
        name = "fetch",
        skip_all,
        fields(member_id = %member_id, sources = sources.len())
    )]
    pub async fn fetch(
        &self,
        member_id: MemberId,
        sources: &[Arc<dyn PolicySource>],
    ) -> Result<Vec<PolicyRecord>, FetchError> {
        try_join_all(
            sources
                .iter()
                .map(|source| self.fetch_one(member_id, source.as_ref())),
        )
        .await
    }

    /// Fetch one source under the deadline.
    pub async fn fetch_one(
        &self,
        member_id: MemberId,
        source: &dyn PolicySource,
    ) -> Result<PolicyRecord, FetchError> {
        let name = source.name();

        match tokio::time::timeout(self.timeout, self.request(member_id, source)).await {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(e)) => {
                tracing::warn!(source = name, member_id = %member_id, error = %e, "Source fetch failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(source = name, member_id = %member_id, timeout = ?self.timeout, "Source timed out");
                Err(FetchError::Timeout {
                    source_name: name.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }

    async fn request(
        &self,
        member_id: MemberId,
        source: &dyn PolicySource,
    ) -> Result<PolicyRecord, FetchError> {
        let name = source.name();
        let request = source.build_request(member_id);
        tracing::debug!(source = name, url = %request.url(), "Requesting policy data");

        let mut builder = self.client.get(request.url().clone());
        if let Some(auth) = request.auth() {
            let header = HeaderName::from_bytes(auth.header.as_bytes()).map_err(|e| {
                FetchError::InvalidRequest {
                    source_name: name.to_string(),
                    message: format!("credential header: {e}"),
                }
            })?;
            // Only expose the credential here, at the point of use
            let mut value = HeaderValue::from_str(auth.credential.expose()).map_err(|_| {
                FetchError::InvalidRequest {
                    source_name: name.to_string(),
                    message: format!("{} is not a valid header value", auth.credential.name()),
                }
            })?;
            value.set_sensitive(true);
            builder = builder.header(header, value);
        }

        let response = builder.send().await.map_err(|error| FetchError::Http {
            source_name: name.to_string(),
            error,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                source_name: name.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|error| FetchError::Http {
            source_name: name.to_string(),
            error,
        })?;

        let raw: JsonValue = serde_json::from_slice(&body).map_err(|error| FetchError::Body {
            source_name: name.to_string(),
            error,
        })?;

        source.normalize(&raw).map_err(|error| FetchError::Normalize {
            source_name: name.to_string(),
            error,
        })
    }
}
