//! Realtime channel configuration types

use std::time::Duration;

use crate::{get_env_or_default, parse_env, ConfigError, ConfigResult};

/// Default table whose inserts are streamed
const DEFAULT_TABLE: &str = "notes";

/// Default column used for server-side partition filtering
const DEFAULT_PARTITION_COLUMN: &str = "couple_key";

/// Protocol version sent as `vsn` on the socket URL
const DEFAULT_PROTOCOL_VERSION: &str = "1.0.0";

/// Realtime channel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Table subscribed to for `INSERT` changes
    pub table: String,

    /// Column the server filters on (`<column>=eq.<partition key>`)
    pub partition_column: String,

    /// Channel topic joined on the gateway
    pub topic: String,

    /// Protocol version query parameter
    pub protocol_version: String,

    /// Keep-alive interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Fixed delay before a reconnect attempt in milliseconds
    pub reconnect_delay_ms: u64,

    /// Settling delay between socket open and join in milliseconds
    pub join_delay_ms: u64,
}

impl RealtimeConfig {
    /// Load realtime configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let table = get_env_or_default("REALTIME_TABLE", DEFAULT_TABLE);
        let topic = get_env_or_default("REALTIME_TOPIC", &Self::default_topic(&table));

        let config = Self {
            partition_column: get_env_or_default(
                "REALTIME_PARTITION_COLUMN",
                DEFAULT_PARTITION_COLUMN,
            ),
            topic,
            table,
            protocol_version: get_env_or_default(
                "REALTIME_PROTOCOL_VERSION",
                DEFAULT_PROTOCOL_VERSION,
            ),
            heartbeat_interval_ms: parse_env("REALTIME_HEARTBEAT_INTERVAL_MS", 25_000)?,
            reconnect_delay_ms: parse_env("REALTIME_RECONNECT_DELAY_MS", 1_500)?,
            join_delay_ms: parse_env("REALTIME_JOIN_DELAY_MS", 500)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Topic name for a table (`realtime:public:<table>`)
    pub fn default_topic(table: &str) -> String {
        format!("realtime:public:{}", table)
    }

    /// Reject zero intervals, which would turn timers into busy loops
    pub fn validate(&self) -> ConfigResult<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "REALTIME_HEARTBEAT_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "REALTIME_RECONNECT_DELAY_MS must be greater than zero".to_string(),
            ));
        }
        if self.table.trim().is_empty() || self.partition_column.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "realtime table and partition column cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn join_delay(&self) -> Duration {
        Duration::from_millis(self.join_delay_ms)
    }

    /// Server-side filter expression for a partition key
    pub fn filter_for(&self, partition_key: &str) -> String {
        format!("{}=eq.{}", self.partition_column, partition_key)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            partition_column: DEFAULT_PARTITION_COLUMN.to_string(),
            topic: Self::default_topic(DEFAULT_TABLE),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            heartbeat_interval_ms: 25_000,
            reconnect_delay_ms: 1_500,
            join_delay_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RealtimeConfig::default();
        assert_eq!(config.table, "notes");
        assert_eq!(config.topic, "realtime:public:notes");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(25));
        assert_eq!(config.reconnect_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn test_filter_for() {
        let config = RealtimeConfig::default();
        assert_eq!(config.filter_for("abc123"), "couple_key=eq.abc123");
    }

    #[test]
    fn test_topic_follows_table_from_env() {
        temp_env::with_vars(
            [
                ("REALTIME_TABLE", Some("drawings")),
                ("REALTIME_TOPIC", None::<&str>),
            ],
            || {
                let config = RealtimeConfig::from_env().unwrap();
                assert_eq!(config.table, "drawings");
                assert_eq!(config.topic, "realtime:public:drawings");
            },
        );
    }

    #[test]
    fn test_invalid_interval_from_env() {
        temp_env::with_var("REALTIME_HEARTBEAT_INTERVAL_MS", Some("soon"), || {
            let result = RealtimeConfig::from_env();
            assert!(matches!(result, Err(ConfigError::InvalidValue(_, _))));
        });
    }

    #[test]
    fn test_zero_reconnect_delay_rejected() {
        let config = RealtimeConfig {
            reconnect_delay_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
