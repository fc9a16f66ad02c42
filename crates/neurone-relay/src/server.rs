//! HTTP/WebSocket server wiring

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use neurone_core::protocol::{AGENT_PATH, CONTROLLER_PATH};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, trace};

use crate::agent::handle_agent;
use crate::config::RelayConfig;
use crate::controller::handle_controller;
use crate::error::{Error, Result};
use crate::relay::{Relay, SharedRelay};

/// Build the router: liveness on `/` and `/health`, WebSocket upgrades on
/// the agent and controller paths.
pub fn build_router(relay: SharedRelay) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route(AGENT_PATH, get(agent_handler).fallback(quiet_reject))
        .route(CONTROLLER_PATH, get(controller_handler).fallback(quiet_reject))
        .with_state(relay)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Plain-text liveness probe.
async fn health_handler() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/plain"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        "OK",
    )
}

/// Non-GET probes of an upgrade path get an empty reply and a closed
/// connection.
async fn quiet_reject() -> impl IntoResponse {
    trace!("Non-GET request on upgrade path");
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::CONNECTION, "close")],
    )
}

async fn agent_handler(ws: WebSocketUpgrade, State(relay): State<SharedRelay>) -> impl IntoResponse {
    ws.max_message_size(relay.config().max_message_bytes)
        .on_upgrade(move |socket| handle_agent(socket, relay))
}

async fn controller_handler(
    ws: WebSocketUpgrade,
    State(relay): State<SharedRelay>,
) -> impl IntoResponse {
    ws.max_message_size(relay.config().max_message_bytes)
        .on_upgrade(move |socket| handle_controller(socket, relay))
}

/// Ping the agent every `interval` until shutdown.
pub fn spawn_heartbeat(relay: SharedRelay, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = relay.cancelled() => break,
                _ = ticker.tick() => {
                    if relay.ping_agent() {
                        trace!("Heartbeat sent to agent");
                    }
                }
            }
        }
    })
}

/// Relay server ready to be started
pub struct RelayServer {
    relay: SharedRelay,
}

impl RelayServer {
    /// Create a server with a fresh relay
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            relay: Arc::new(Relay::new(config)),
        }
    }

    /// The relay this server will expose
    #[must_use]
    pub fn relay(&self) -> SharedRelay {
        self.relay.clone()
    }

    /// Bind, then serve in the background.
    pub async fn start(self) -> Result<RelayHandle> {
        let relay = self.relay;
        let addr = relay.config().bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let app = build_router(relay.clone());
        let shutdown = relay.shutdown_token();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });
        let heartbeat = spawn_heartbeat(relay.clone(), relay.config().heartbeat_interval());

        info!(
            addr = %local_addr,
            agent = %format!("ws://{}{}", local_addr, AGENT_PATH),
            controller = %format!("ws://{}{}", local_addr, CONTROLLER_PATH),
            "Relay server started"
        );

        Ok(RelayHandle {
            local_addr,
            relay,
            server,
            heartbeat,
        })
    }
}

/// Handle to a running relay server
pub struct RelayHandle {
    local_addr: SocketAddr,
    relay: SharedRelay,
    server: JoinHandle<std::io::Result<()>>,
    heartbeat: JoinHandle<()>,
}

impl RelayHandle {
    /// Bound address
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The running relay
    #[must_use]
    pub fn relay(&self) -> &SharedRelay {
        &self.relay
    }

    /// WebSocket URL of the agent endpoint
    #[must_use]
    pub fn agent_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, AGENT_PATH)
    }

    /// WebSocket URL of the controller endpoint
    #[must_use]
    pub fn controller_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, CONTROLLER_PATH)
    }

    /// Wait until the server stops
    pub async fn wait(self) -> Result<()> {
        let served = self.server.await;
        self.heartbeat.abort();
        served??;
        info!("Relay server stopped");
        Ok(())
    }

    /// Close every connection and stop serving
    pub async fn stop(self) -> Result<()> {
        self.relay.shutdown();
        self.wait().await
    }
}
