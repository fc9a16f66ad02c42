//! Client configuration

use neurone_core::protocol::CONTROLLER_PATH;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Controller client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay host
    #[serde(default = "default_host")]
    pub host: String,
    /// Relay port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Opaque token forwarded with every tool call
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Tool timeout used by `call_tool`
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Timeout of `listTools` and `getStatus`
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Extra client-side wait on top of a tool timeout
    #[serde(default = "default_timeout_margin_secs")]
    pub timeout_margin_secs: u64,
    /// WebSocket connect deadline
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Reconnect in the background when the relay drops the socket
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    /// Pause before each reconnect attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Reconnect attempts before giving up
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18792
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_timeout_margin_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_reconnect_max_attempts() -> u32 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secret_key: None,
            tool_timeout_secs: default_tool_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            timeout_margin_secs: default_timeout_margin_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
        }
    }
}

impl ClientConfig {
    /// Default settings for a relay on `port`
    #[must_use]
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Controller endpoint URL
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, CONTROLLER_PATH)
    }

    /// Tool timeout used by `call_tool`
    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Timeout of relay-local requests
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Client-side margin over a tool timeout
    #[must_use]
    pub fn timeout_margin(&self) -> Duration {
        Duration::from_secs(self.timeout_margin_secs)
    }

    /// Connect deadline
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Pause before each reconnect attempt
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
