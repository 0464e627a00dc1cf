//! Realtime gateway endpoint configuration

use std::fmt;

use crate::{get_required_env, ConfigError, ConfigResult};

/// Base endpoint and API key of the hosted gateway
///
/// The same base URL serves the REST, auth and realtime endpoints.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// HTTPS base URL (e.g., https://project.example.co)
    pub url: String,

    /// Public API key sent as `apikey` on every call
    pub api_key: String,
}

impl GatewayConfig {
    /// Load gateway configuration from environment variables
    ///
    /// Reads `GATEWAY_URL` and `GATEWAY_API_KEY`, both required.
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            url: get_required_env("GATEWAY_URL")?,
            api_key: get_required_env("GATEWAY_API_KEY")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration pointing at a custom URL (useful for testing)
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    /// Check that the URL is http(s) and the key is present
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.url.starts_with("https://") || self.url.starts_with("http://")) {
            return Err(ConfigError::InvalidUrl(
                "GATEWAY_URL".to_string(),
                "must start with http:// or https://".to_string(),
            ));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar("GATEWAY_API_KEY".to_string()));
        }
        Ok(())
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Token endpoint used for refresh-token exchange
    pub fn token_url(&self) -> String {
        format!("{}/auth/v1/token", self.base_url())
    }

    /// REST endpoint for a table
    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url(), table)
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
