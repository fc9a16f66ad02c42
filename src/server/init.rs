//! Relay server run loop

use super::config::AppConfig;
use anyhow::{Context, Result};
use neurone_relay::RelayServer;
use tracing::{info, warn};

/// Run the relay until Ctrl+C or SIGTERM.
pub async fn run(config: AppConfig) -> Result<()> {
    info!("Starting Neurone relay v{}", env!("CARGO_PKG_VERSION"));

    let handle = RelayServer::new(config.relay)
        .start()
        .await
        .context("Failed to start relay server")?;

    info!(
        agent = %handle.agent_url(),
        controller = %handle.controller_url(),
        "Waiting for agent and controllers"
    );

    wait_for_shutdown_signal().await;
    info!("Shutting down relay");
    handle.stop().await.context("Relay server failed")?;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
