//! Server module for Neurone
//!
//! - `config`: configuration structures
//! - `loader`: configuration loading from files and environment
//! - `validation`: sanity checks run before anything starts
//! - `init`: relay run loop

pub mod config;
mod init;
mod loader;
mod validation;

pub use init::run;
pub use loader::load_config;
pub use validation::validate_config;
