//! Neurone Client - Controller-side RPC client for the relay
//!
//! Opens one WebSocket to the relay's controller endpoint, correlates
//! replies by request id and keeps a cached view of agent connectivity
//! fed by relay events.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod events;

pub use client::{ConnectionState, ControllerClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use events::{EventHandler, EventHandlers, HandlerId};
