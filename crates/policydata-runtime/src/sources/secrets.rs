//! Secure credential handling for policy data sources.
//!
//! Using this module ensures:
//!
//! - **No accidental logging**: Credentials cannot appear in Debug/Display output
//! - **Memory safety**: Credentials are zeroed on drop
//! - **Explicit exposure**: the raw value is only read where a header is set
//!
//! ## Usage
//!
//! ```ignore
//! // settings: {"api_key_env": "API2_KEY"}
//! let cred = ApiCredential::from_settings(&settings, "api2 API key")?;
//!
//! // Use in HTTP header (explicit exposure)
//! request.header("x-api-key", cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::SourceConfigError;

/// Settings key holding a literal credential.
pub const API_KEY_SETTING: &str = "api_key";

/// Settings key naming an environment variable that holds the credential.
pub const API_KEY_ENV_SETTING: &str = "api_key_env";

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from configuration file/JSON
    Config,
    /// Loaded from environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored provider credential.
///
/// - `Debug` and `Display` show `[REDACTED]`
/// - the value is zeroed on drop via `secrecy`
/// - the raw value is only reachable through [`expose`](Self::expose)
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Wrap a credential value.
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Load a credential from an environment variable.
    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, SourceConfigError> {
        std::env::var(env_var)
            .map(|v| Self::new(v, CredentialSource::Environment, name))
            .map_err(|_| SourceConfigError::MissingCredential {
                name,
                env_var: env_var.to_string(),
            })
    }

    /// Load an optional credential from source settings.
    ///
    /// 1. `api_key` in settings wins
    /// 2. otherwise `api_key_env` names the variable to read, which must be set
    /// 3. with neither key the source is unauthenticated
    pub fn from_settings(
        settings: &JsonValue,
        name: &'static str,
    ) -> Result<Option<Self>, SourceConfigError> {
        if let Some(value) = settings[API_KEY_SETTING].as_str() {
            return Ok(Some(Self::new(value, CredentialSource::Config, name)));
        }

        match settings[API_KEY_ENV_SETTING].as_str() {
            Some(env_var) => Self::from_env(env_var, name).map(Some),
            None => Ok(None),
        }
    }

    /// Expose the credential value for use in a request header.
    ///
    /// Never store the returned value.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacted_in_debug() {
        let secret = "pk-super-secret-key-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Programmatic, "Test API key");

        let debug = format!("{:?}", cred);
        assert!(!debug.contains(secret), "Secret exposed in Debug!");
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_credential_redacted_in_display() {
        let secret = "pk-super-secret-key-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Config, "Test API key");

        let display = format!("{}", cred);
        assert!(!display.contains(secret), "Secret exposed in Display!");
        assert!(display.contains("[REDACTED]"));
        assert!(display.contains("Test API key"));
        assert!(display.contains("config"));
    }

    #[test]
    fn test_credential_expose() {
        let cred = ApiCredential::new("pk-123", CredentialSource::Programmatic, "Test API key");
        assert_eq!(cred.expose(), "pk-123");
        assert!(!cred.is_empty());
    }

    #[test]
    fn test_from_settings_prefers_literal_key() {
        std::env::set_var("POLICYDATA_TEST_KEY_PRIORITY", "env-key");
        let settings = serde_json::json!({
            "api_key": "config-key",
            "api_key_env": "POLICYDATA_TEST_KEY_PRIORITY"
        });

        let cred = ApiCredential::from_settings(&settings, "Test key")
            .unwrap()
            .unwrap();
        assert_eq!(cred.expose(), "config-key");
        assert_eq!(cred.source(), CredentialSource::Config);

        std::env::remove_var("POLICYDATA_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_from_settings_reads_named_env_var() {
        std::env::set_var("POLICYDATA_TEST_KEY_FALLBACK", "env-key");
        let settings = serde_json::json!({"api_key_env": "POLICYDATA_TEST_KEY_FALLBACK"});

        let cred = ApiCredential::from_settings(&settings, "Test key")
            .unwrap()
            .unwrap();
        assert_eq!(cred.expose(), "env-key");
        assert_eq!(cred.source(), CredentialSource::Environment);

        std::env::remove_var("POLICYDATA_TEST_KEY_FALLBACK");
    }

    #[test]
    fn test_from_settings_missing_env_var_is_error() {
        let settings = serde_json::json!({"api_key_env": "POLICYDATA_NONEXISTENT_12345"});

        let err = ApiCredential::from_settings(&settings, "Test key").unwrap_err();
        assert!(err.to_string().contains("Test key"));
        assert!(err.to_string().contains("POLICYDATA_NONEXISTENT_12345"));
    }

    #[test]
    fn test_from_settings_without_credential() {
        let settings = serde_json::json!({"base_url": "https://api1.com"});
        assert!(ApiCredential::from_settings(&settings, "Test key")
            .unwrap()
            .is_none());
    }
}
