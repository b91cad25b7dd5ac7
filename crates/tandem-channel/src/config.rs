//! Configuration surface consumed by the sync channel.
//!
//! The host plugin owns settings storage; it hands the core a ready
//! `SyncConfig`. Only the port, host, and enabled toggle are part of the
//! external configuration surface; the timing knobs exist so tests can run
//! the reconnect and heartbeat machinery at millisecond scale.

use serde::Deserialize;
use std::time::Duration;

/// Default port both sides agree on.
pub const DEFAULT_PORT: u16 = 3000;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_missed_pong_limit() -> u32 {
    3
}

/// Sync channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Port the listener binds and the connector dials.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host the connector dials. The listener binds this interface.
    #[serde(default = "default_host")]
    pub host: String,
    /// Whether synchronization is enabled at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Delay between connect attempts while the peer is unreachable.
    #[serde(skip, default = "default_retry_interval")]
    pub retry_interval: Duration,
    /// Interval between heartbeat pings on an active connection.
    #[serde(skip, default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered pings before the peer counts as gone.
    #[serde(skip, default = "default_missed_pong_limit")]
    pub missed_pong_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            enabled: default_enabled(),
            retry_interval: default_retry_interval(),
            heartbeat_interval: default_heartbeat_interval(),
            missed_pong_limit: default_missed_pong_limit(),
        }
    }
}

impl SyncConfig {
    /// The `host:port` address string for bind/dial.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "127.0.0.1");
        assert!(config.enabled);
        assert_eq!(config.missed_pong_limit, 3);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 3000);
        assert!(config.enabled);
        assert_eq!(config.retry_interval, Duration::from_secs(3));
    }

    #[test]
    fn test_deserialize_overrides() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"port": 4011, "enabled": false}"#).unwrap();
        assert_eq!(config.port, 4011);
        assert!(!config.enabled);
    }

    #[test]
    fn test_addr_formatting() {
        let config = SyncConfig {
            port: 4500,
            ..Default::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:4500");
    }
}
