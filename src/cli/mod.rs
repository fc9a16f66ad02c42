//! CLI module for Neurone
//!
//! - `serve`: run the relay (default)
//! - `status`, `tools`, `call`, `wait`: talk to a running relay as a controller

use clap::{Parser, Subcommand};

use crate::server::config::AppConfig;

pub mod control;

/// Neurone browser relay
#[derive(Parser, Debug)]
#[command(name = "neurone")]
#[command(about = "WebSocket relay between automation controllers and a browser agent")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the relay server (default)
    Serve {
        /// Bind address
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long, short)]
        port: Option<u16>,
    },
    /// Show relay status
    Status,
    /// List tools advertised by the agent
    Tools,
    /// Call a tool through the relay
    Call {
        /// Tool name
        name: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Maximum attempts for recoverable failures
        #[arg(long)]
        retries: Option<u32>,
        /// Pause between attempts in milliseconds
        #[arg(long)]
        retry_delay_ms: Option<u64>,
    },
    /// Block until an agent is attached
    Wait {
        /// Seconds to wait
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli, mut config: AppConfig) -> anyhow::Result<()> {
    match cli.command {
        None => crate::server::run(config).await,
        Some(Commands::Serve { host, port }) => {
            if let Some(host) = host {
                config.relay.host = host;
            }
            if let Some(port) = port {
                config.relay.port = port;
            }
            crate::server::run(config).await
        }
        Some(Commands::Status) => control::status(&config).await,
        Some(Commands::Tools) => control::tools(&config).await,
        Some(Commands::Call {
            name,
            args,
            timeout,
            retries,
            retry_delay_ms,
        }) => {
            let options = control::CallOptions {
                timeout_ms: timeout.unwrap_or(config.execution.timeout_ms),
                retry_count: retries.unwrap_or(config.execution.retry_count),
                retry_delay_ms: retry_delay_ms.unwrap_or(config.execution.retry_delay_ms),
            };
            control::call(&config, &name, &args, options).await
        }
        Some(Commands::Wait { timeout }) => control::wait(&config, timeout).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_serves() {
        let cli = Cli::try_parse_from(["neurone"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_call_arguments() {
        let cli = Cli::try_parse_from([
            "neurone",
            "call",
            "chrome_click",
            "--args",
            r##"{"selector": "#a"}"##,
            "--retries",
            "5",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Call {
                name,
                args,
                retries,
                timeout,
                ..
            }) => {
                assert_eq!(name, "chrome_click");
                assert!(args.contains("#a"));
                assert_eq!(retries, Some(5));
                assert_eq!(timeout, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_serve_port_override() {
        let cli = Cli::try_parse_from(["neurone", "serve", "--port", "9001"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Serve {
                port: Some(9001),
                ..
            })
        ));
    }
}
