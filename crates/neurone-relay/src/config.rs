//! Relay configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relay server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port, 0 picks a free one
    #[serde(default = "default_port")]
    pub port: u16,
    /// `executeTool` timeout when the controller sends none
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Agent ping period
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// How long a new agent has to send `hello`
    #[serde(default = "default_hello_timeout_secs")]
    pub hello_timeout_secs: u64,
    /// Largest accepted WebSocket message
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// In-flight call limit, 0 means unbounded
    #[serde(default)]
    pub max_pending_calls: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18792
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_hello_timeout_secs() -> u64 {
    10
}

fn default_max_message_bytes() -> usize {
    16 * 1024 * 1024
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            default_timeout_secs: default_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            hello_timeout_secs: default_hello_timeout_secs(),
            max_message_bytes: default_max_message_bytes(),
            max_pending_calls: 0,
        }
    }
}

impl RelayConfig {
    /// Loopback config on an ephemeral port
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            port: 0,
            ..Self::default()
        }
    }

    /// `host:port`
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Default `executeTool` timeout
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Agent ping period
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Handshake deadline
    #[must_use]
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:18792");
        assert_eq!(config.default_timeout(), Duration::from_secs(60));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.max_pending_calls, 0);
    }

    #[test]
    fn test_partial_deserialize() {
        let config: RelayConfig = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.hello_timeout_secs, 10);
    }
}
