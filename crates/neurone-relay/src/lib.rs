//! Neurone Relay - WebSocket relay between controllers and one browser agent
//!
//! - `/extension`: the single agent slot; a new agent replaces the old one
//! - `/controller`: any number of controllers issuing `executeTool`,
//!   `listTools` and `getStatus`
//! - `/` and `/health`: plain HTTP liveness

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod config;
pub mod controller;
pub mod error;
pub mod normalize;
pub mod relay;
pub mod server;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use relay::{Relay, SharedRelay};
pub use server::{build_router, RelayHandle, RelayServer};
