//! Neurone - browser automation relay
//!
//! CLI entry point for the relay server and its controller commands.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;

mod cli;
mod logging;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    let config = server::load_config()?;
    let _log_guard = logging::init(&config.logging)?;
    server::validate_config(&config)?;

    cli::run(cli, config).await
}
