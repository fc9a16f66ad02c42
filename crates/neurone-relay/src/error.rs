//! Error types for neurone-relay

use thiserror::Error;

/// Relay server error type
#[derive(Debug, Error)]
pub enum Error {
    /// Listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// IO error while serving
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Server task panicked or was aborted
    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
