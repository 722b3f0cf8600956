//! Request construction shared by the built-in providers.
//!
//! Every built-in provider is addressed the same way: a base URL with a
//! `member_id` query parameter, plus an optional credential header. Only
//! normalization differs between them.

use policydata_core::MemberId;
use reqwest::header::HeaderName;
use reqwest::Url;
use serde_json::Value as JsonValue;

use super::secrets::{ApiCredential, API_KEY_ENV_SETTING, API_KEY_SETTING};
use super::{SourceConfigError, SourceRequest};

/// Header used for credentials unless `api_key_header` overrides it.
pub const DEFAULT_CREDENTIAL_HEADER: &str = "x-api-key";

const BASE_URL_SETTING: &str = "base_url";
const HEADER_SETTING: &str = "api_key_header";

/// Where and how to reach one provider.
#[derive(Debug)]
pub struct Endpoint {
    base_url: Url,
    credential: Option<ApiCredential>,
    credential_header: String,
}

impl Endpoint {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            credential: None,
            credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
        }
    }

    /// Attach a credential sent under `header`.
    pub fn with_credential(mut self, header: impl Into<String>, credential: ApiCredential) -> Self {
        self.credential_header = header.into();
        self.credential = Some(credential);
        self
    }

    /// Build from source settings, falling back to `default_base_url`.
    ///
    /// Reads the credential environment variable when one is named.
    pub fn from_settings(
        source_type: &str,
        settings: &JsonValue,
        default_base_url: &str,
        credential_name: &'static str,
    ) -> Result<Self, SourceConfigError> {
        Self::validate_settings(source_type, settings)?;

        let raw_url = settings[BASE_URL_SETTING]
            .as_str()
            .unwrap_or(default_base_url);
        let base_url = parse_base_url(source_type, raw_url)?;

        let credential_header = settings[HEADER_SETTING]
            .as_str()
            .unwrap_or(DEFAULT_CREDENTIAL_HEADER)
            .to_string();

        Ok(Self {
            base_url,
            credential: ApiCredential::from_settings(settings, credential_name)?,
            credential_header,
        })
    }

    /// Check settings syntax without touching the environment.
    pub fn validate_settings(source_type: &str, settings: &JsonValue) -> Result<(), SourceConfigError> {
        if !settings.is_object() && !settings.is_null() {
            return Err(invalid(source_type, "settings must be a mapping"));
        }

        for key in [BASE_URL_SETTING, API_KEY_SETTING, API_KEY_ENV_SETTING, HEADER_SETTING] {
            if let Some(value) = settings.get(key) {
                if !value.is_string() {
                    return Err(invalid(source_type, format!("'{key}' must be a string")));
                }
            }
        }

        if let Some(url) = settings[BASE_URL_SETTING].as_str() {
            parse_base_url(source_type, url)?;
        }

        if let Some(header) = settings[HEADER_SETTING].as_str() {
            if HeaderName::from_bytes(header.as_bytes()).is_err() {
                return Err(invalid(
                    source_type,
                    format!("'{header}' is not a valid header name"),
                ));
            }
        }

        Ok(())
    }

    /// Request for one member: `base_url?member_id=<id>`.
    pub fn request(&self, member_id: MemberId) -> SourceRequest<'_> {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("member_id", &member_id.to_string());

        let request = SourceRequest::new(url);
        match &self.credential {
            Some(credential) => request.with_auth(&self.credential_header, credential),
            None => request,
        }
    }
}

fn parse_base_url(source_type: &str, raw: &str) -> Result<Url, SourceConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| invalid(source_type, format!("invalid base_url '{raw}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(
            source_type,
            "base_url must start with http:// or https://",
        ));
    }

    Ok(url)
}

fn invalid(source_type: &str, message: impl Into<String>) -> SourceConfigError {
    SourceConfigError::InvalidConfig {
        source_type: source_type.to_string(),
        message: message.into(),
    }
}
