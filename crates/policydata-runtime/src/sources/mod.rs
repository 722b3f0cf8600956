//! Policy data source abstractions.
//!
//! A source describes one external provider: how to address it for a
//! member and how to turn its raw JSON into a [`PolicyRecord`]. Sources do
//! no I/O themselves; the [`PolicyFetcher`](crate::fetch::PolicyFetcher)
//! performs the HTTP call.
//!
//! ## Security
//!
//! Provider credentials are held as [`ApiCredential`] and only exposed when
//! the fetcher sets the request header.

use policydata_core::{MemberId, PolicyRecord, RecordError};
use reqwest::Url;
use serde_json::Value as JsonValue;
use thiserror::Error;

mod api1;
mod api2;
mod api3;
mod endpoint;
mod factory;
pub mod secrets;

pub use api1::{Api1Source, Api1SourceFactory};
pub use api2::{Api2Source, Api2SourceFactory};
pub use api3::{parse_amount, Api3Source, Api3SourceFactory};
pub use endpoint::{Endpoint, DEFAULT_CREDENTIAL_HEADER};
pub use factory::{SourceConfigError, SourceFactory, SourceRegistry};
pub use secrets::{ApiCredential, CredentialSource};

/// Errors from mapping a provider payload onto the standard record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("Missing field '{0}' in provider payload")]
    MissingField(String),

    #[error("Field '{field}' is not a number: {reason}")]
    NotANumber { field: String, reason: String },

    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(String),

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Header carrying a provider credential.
#[derive(Debug, Clone, Copy)]
pub struct SourceAuth<'a> {
    pub header: &'a str,
    pub credential: &'a ApiCredential,
}

/// The outbound request for one source and member.
#[derive(Debug, Clone)]
pub struct SourceRequest<'a> {
    url: Url,
    auth: Option<SourceAuth<'a>>,
}

impl<'a> SourceRequest<'a> {
    pub fn new(url: Url) -> Self {
        Self { url, auth: None }
    }

    pub fn with_auth(mut self, header: &'a str, credential: &'a ApiCredential) -> Self {
        self.auth = Some(SourceAuth { header, credential });
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn auth(&self) -> Option<SourceAuth<'a>> {
        self.auth
    }
}

/// One external policy data provider.
///
/// Implementations are stateless apart from their configuration, so one
/// instance serves any number of concurrent requests.
pub trait PolicySource: Send + Sync {
    /// Stable name used in logs and errors.
    fn name(&self) -> &str;

    /// Build the GET request for `member_id`.
    fn build_request(&self, member_id: MemberId) -> SourceRequest<'_>;

    /// Map a raw response body onto the standard record.
    ///
    /// Must fail rather than pass malformed data through.
    fn normalize(&self, raw: &JsonValue) -> Result<PolicyRecord, NormalizeError>;
}
