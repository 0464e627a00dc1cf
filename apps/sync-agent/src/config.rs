//! Sync agent configuration loaded from environment variables
//!
//! Gateway, realtime and HTTP settings come from the shared configuration;
//! the agent adds the identity it syncs for and where the session lives.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tandem_shared_config::{
    get_env_or_default, get_required_env, parse_env, CommonConfig, Environment, GatewayConfig,
    HttpClientConfig, RealtimeConfig,
};

/// Sync agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Common configuration shared with the client libraries
    pub common: CommonConfig,

    /// Partition key of the couple to sync
    pub couple_key: String,

    /// This device's user id; falls back to the stored session's user
    pub local_user_id: Option<String>,

    /// Realtime endpoint when it is not served from the gateway URL
    pub realtime_url: Option<String>,

    /// JSON file holding the session credentials
    pub credentials_path: PathBuf,

    /// Keep a realtime subscription open after the initial sync
    pub listen: bool,

    /// Interval between gateway reachability checks in seconds
    pub connectivity_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let common = CommonConfig::from_env().context("Failed to load config")?;

        Ok(Self {
            common,
            couple_key: get_required_env("COUPLE_KEY").context("COUPLE_KEY is required")?,
            local_user_id: optional_env("LOCAL_USER_ID"),
            realtime_url: optional_env("REALTIME_URL"),
            credentials_path: PathBuf::from(get_env_or_default(
                "CREDENTIALS_PATH",
                "tandem-session.json",
            )),
            listen: parse_env("SYNC_AGENT_LISTEN", false)
                .context("Invalid SYNC_AGENT_LISTEN value")?,
            connectivity_interval_secs: parse_env("CONNECTIVITY_CHECK_INTERVAL_SECS", 30)
                .context("Invalid CONNECTIVITY_CHECK_INTERVAL_SECS value")?,
        })
    }

    pub fn gateway(&self) -> &GatewayConfig {
        &self.common.gateway
    }

    pub fn realtime(&self) -> &RealtimeConfig {
        &self.common.realtime
    }

    pub fn http(&self) -> &HttpClientConfig {
        &self.common.http
    }

    pub fn connectivity_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity_interval_secs.max(1))
    }

    /// Get environment mode
    pub fn environment(&self) -> Environment {
        self.common.environment
    }

    /// Tracing filter directives
    ///
    /// A bare level such as `debug` applies to the Tandem crates only;
    /// anything else is used as full `EnvFilter` directives.
    pub fn log_filter(&self) -> String {
        let level = self.common.log_level.trim();
        if level.contains('=') || level.contains(',') {
            return level.to_string();
        }

        format!(
            "warn,tandem_sync_agent={0},tandem_realtime_client={0},tandem_http_client={0}",
            level
        )
    }
}

fn optional_env(name: &str) -> Option<String> {
    let value = get_env_or_default(name, "");
    (!value.trim().is_empty()).then_some(value)
}
