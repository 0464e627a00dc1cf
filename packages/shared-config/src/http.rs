//! HTTP client configuration types

use std::time::Duration;

use crate::{parse_env, ConfigError, ConfigResult};

/// Retry and timeout settings for request/response calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    /// Timeout in seconds for a single attempt
    pub request_timeout_secs: u64,

    /// Timeout in seconds for a whole call, retries and delays included
    pub resource_timeout_secs: u64,

    /// Number of retries after the first attempt
    pub max_retries: u32,

    /// Constant delay between attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl HttpClientConfig {
    /// Load HTTP client configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            request_timeout_secs: parse_env("HTTP_REQUEST_TIMEOUT_SECS", 15)?,
            resource_timeout_secs: parse_env("HTTP_RESOURCE_TIMEOUT_SECS", 30)?,
            max_retries: parse_env("HTTP_MAX_RETRIES", 2)?,
            retry_delay_ms: parse_env("HTTP_RETRY_DELAY_MS", 1_000)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// The request timeout must be strictly shorter than the resource timeout
    pub fn validate(&self) -> ConfigResult<()> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "HTTP_REQUEST_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs >= self.resource_timeout_secs {
            return Err(ConfigError::ValidationError(format!(
                "HTTP_REQUEST_TIMEOUT_SECS ({}) must be shorter than HTTP_RESOURCE_TIMEOUT_SECS ({})",
                self.request_timeout_secs, self.resource_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_secs(self.resource_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 15,
            resource_timeout_secs: 30,
            max_retries: 2,
            retry_delay_ms: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpClientConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert!(config.request_timeout() < config.resource_timeout());
    }

    #[test]
    fn test_request_timeout_must_be_shorter() {
        let config = HttpClientConfig {
            request_timeout_secs: 30,
            resource_timeout_secs: 30,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_from_env_overrides() {
        temp_env::with_vars(
            [
                ("HTTP_MAX_RETRIES", Some("5")),
                ("HTTP_RETRY_DELAY_MS", Some("250")),
            ],
            || {
                let config = HttpClientConfig::from_env().unwrap();
                assert_eq!(config.max_retries, 5);
                assert_eq!(config.retry_delay(), Duration::from_millis(250));
            },
        );
    }
}
