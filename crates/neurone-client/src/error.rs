//! Error types for neurone-client

use neurone_core::protocol::RelayMethod;
use neurone_core::{ErrorCode, ToolError};
use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// `connect` was never called or the socket is gone
    #[error("not connected to relay")]
    NotConnected,

    /// Handshake failed
    #[error("failed to connect to {url}: {message}")]
    Connect {
        /// Relay URL
        url: String,
        /// Underlying failure
        message: String,
    },

    /// Handshake did not finish in time
    #[error("connecting to {0} timed out")]
    ConnectTimeout(String),

    /// Writing to the socket failed
    #[error("send failed: {0}")]
    Send(String),

    /// No reply within the deadline
    #[error("{method} timed out after {timeout_ms}ms")]
    Timeout {
        /// Relay method
        method: RelayMethod,
        /// Deadline
        timeout_ms: u64,
    },

    /// Socket closed while waiting for a reply
    #[error("connection closed while waiting for a reply")]
    Closed,

    /// The relay answered with an error
    #[error("relay error: {0}")]
    Relay(ToolError),

    /// Unexpected frame content
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Every reconnect attempt failed
    #[error("reconnect failed after {attempts} attempts: {last_error}")]
    ReconnectFailed {
        /// Attempts made
        attempts: u32,
        /// Failure of the final attempt
        last_error: String,
    },

    /// `wait_for_extension` gave up
    #[error("extension did not connect within {0}ms")]
    ExtensionWait(u64),
}

impl ClientError {
    /// Whether the socket itself is unusable
    #[must_use]
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Send(_) | Self::Closed)
    }
}

impl From<ClientError> for ToolError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Relay(error) => error,
            ClientError::Timeout { .. } => ToolError::new(ErrorCode::ExecutionTimeout, err.to_string()),
            ClientError::Send(_) => ToolError::new(ErrorCode::WebsocketError, err.to_string()),
            ClientError::Protocol(_) => ToolError::unknown(err.to_string()),
            ClientError::NotConnected
            | ClientError::Connect { .. }
            | ClientError::ConnectTimeout(_)
            | ClientError::Closed
            | ClientError::ReconnectFailed { .. }
            | ClientError::ExtensionWait(_) => ToolError::connection(err.to_string()),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;
