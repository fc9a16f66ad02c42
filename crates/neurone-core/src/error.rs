//! Error types for neurone-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// The root variable scope cannot be popped
    #[error("cannot pop the root variable scope")]
    RootScope,

    /// A tool with this name is already registered
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    /// A serialized result violated the success/error invariant
    #[error("invalid result: {0}")]
    InvalidResult(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
