//! Configuration error types

use thiserror::Error;

/// Errors raised while reading gateway, realtime or HTTP settings
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required variable is unset or blank
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Variable is set but does not parse
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// Gateway URL has the wrong shape
    #[error("invalid URL format for {0}: {1}")]
    InvalidUrl(String, String),

    /// Values parse but contradict each other
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// Name of the offending variable, when there is a single one
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::MissingEnvVar(name) | Self::InvalidValue(name, _) | Self::InvalidUrl(name, _) => {
                Some(name)
            }
            Self::ValidationError(_) => None,
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
