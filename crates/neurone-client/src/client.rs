//! Controller client
//!
//! One WebSocket to the relay, a background reader that resolves pending
//! requests by id and applies relay events to a cached connectivity view.
//! When the relay drops the socket the reader reconnects with a fixed delay
//! unless `auto_reconnect` is off.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream, StreamExt};
use futures_util::SinkExt;
use neurone_core::protocol::{
    ControllerRequest, ExecuteToolParams, RelayEvent, RelayMethod, RelayStatus, ToolList,
    EVENT_METHOD,
};
use neurone_core::{ToolError, ToolResult, ToolTransport};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{EventHandler, EventHandlers, HandlerId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSender = SplitSink<WsStream, Message>;
type Reply = std::result::Result<Value, ToolError>;

/// Agent connectivity as last reported by the relay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CachedStatus {
    extension_connected: bool,
    extension_id: Option<String>,
    tools: Vec<String>,
}

/// Connection lifecycle of a [`ControllerClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket
    Disconnected,
    /// First handshake in progress
    Connecting,
    /// Socket open
    Connected,
    /// Socket lost, retrying
    Reconnecting,
    /// Every reconnect attempt failed
    Failed,
}

/// State shared with the reader task
struct Shared {
    config: ClientConfig,
    sender: Mutex<Option<WsSender>>,
    state: std::sync::Mutex<ConnectionState>,
    /// Set by `close`; stops the reader from reconnecting
    closing: AtomicBool,
    pending: std::sync::Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    status: RwLock<CachedStatus>,
    handlers: EventHandlers,
    events: broadcast::Sender<RelayEvent>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn take_pending(&self, id: u64) -> Option<oneshot::Sender<Reply>> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    fn handle_text(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Unparseable relay frame");
                return;
            }
        };

        if value.get("method").and_then(Value::as_str) == Some(EVENT_METHOD) {
            match value
                .get("params")
                .cloned()
                .map(serde_json::from_value::<RelayEvent>)
            {
                Some(Ok(event)) => self.apply_event(event),
                _ => debug!("Ignoring unrecognized relay event"),
            }
            return;
        }

        let Some(id) = value.get("id").and_then(Value::as_u64) else {
            if let Some(error) = value.get("error") {
                warn!(error = %error, "Relay rejected a frame");
            }
            return;
        };
        let reply = match (value.get("error"), value.get("result")) {
            (Some(error), _) if !error.is_null() => Err(ToolError::from_wire(error.clone())),
            (_, Some(result)) => Ok(result.clone()),
            _ => {
                debug!(id, "Reply without result or error");
                return;
            }
        };
        match self.take_pending(id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(id, "Reply for unknown or expired request"),
        }
    }

    fn apply_event(&self, event: RelayEvent) {
        {
            let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
            match &event {
                RelayEvent::Status(snapshot) => {
                    status.extension_connected = snapshot.extension_connected;
                    status.extension_id = snapshot.extension_id.clone();
                    status.tools = snapshot.tools.clone();
                }
                RelayEvent::ExtensionConnected(agent) => {
                    status.extension_connected = true;
                    status.extension_id = Some(agent.extension_id.clone());
                    status.tools = agent.tools.clone();
                }
                RelayEvent::ExtensionDisconnected { .. } => {
                    *status = CachedStatus::default();
                }
            }
        }
        debug!(event = event.event_type(), "Relay event");
        self.handlers.dispatch(&event);
        let _ = self.events.send(event);
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Forget the socket; every waiting request fails with `Closed`.
    fn reset(&self) {
        self.set_state(ConnectionState::Disconnected);
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = CachedStatus::default();
    }

    /// Handshake, install the write half and return the read half.
    async fn open(&self) -> Result<SplitStream<WsStream>> {
        let url = self.config.url();
        let (ws_stream, _) = tokio::time::timeout(self.config.connect_timeout(), connect_async(url.as_str()))
            .await
            .map_err(|_| ClientError::ConnectTimeout(url.clone()))?
            .map_err(|e| ClientError::Connect {
                url: url.clone(),
                message: e.to_string(),
            })?;
        let (write, read) = ws_stream.split();

        *self.sender.lock().await = Some(write);
        self.set_state(ConnectionState::Connected);
        info!(url = %url, "Connected to relay");
        Ok(read)
    }

    /// Up to `reconnect_max_attempts` attempts, each after `reconnect_delay`.
    async fn reconnect_with_retry(&self) -> Result<SplitStream<WsStream>> {
        let max_attempts = self.config.reconnect_max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            self.set_state(ConnectionState::Reconnecting);
            info!(attempt, max_attempts, "Reconnecting to relay");
            tokio::time::sleep(self.config.reconnect_delay()).await;
            if self.closing.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::NotConnected);
            }
            match self.open().await {
                Ok(read) => return Ok(read),
                Err(e) => {
                    debug!(attempt, error = %e, "Reconnect attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        self.set_state(ConnectionState::Failed);
        Err(ClientError::ReconnectFailed {
            attempts: max_attempts,
            last_error,
        })
    }

    fn spawn_reader(self: &Arc<Self>, read: SplitStream<WsStream>) {
        let shared = self.clone();
        let reader = tokio::spawn(async move {
            shared.run_reader(read).await;
        });
        if let Some(previous) = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(reader)
        {
            previous.abort();
        }
    }

    async fn run_reader(&self, mut read: SplitStream<WsStream>) {
        loop {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => self.handle_text(&text),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Relay WS error");
                        break;
                    }
                }
            }

            self.sender.lock().await.take();
            self.reset();
            info!("Relay connection closed");

            if !self.config.auto_reconnect || self.closing.load(Ordering::SeqCst) {
                return;
            }
            match self.reconnect_with_retry().await {
                Ok(next) => read = next,
                Err(e) => {
                    warn!(error = %e, "Giving up on relay connection");
                    return;
                }
            }
        }
    }

    async fn drop_socket(&self) {
        if let Some(reader) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reader.abort();
        }
        if let Some(mut sender) = self.sender.lock().await.take() {
            let _ = sender.send(Message::Close(None)).await;
            let _ = sender.close().await;
        }
        self.reset();
    }
}

/// RPC client for the relay's controller endpoint
pub struct ControllerClient {
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl ControllerClient {
    /// Create a disconnected client
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                config,
                sender: Mutex::new(None),
                state: std::sync::Mutex::new(ConnectionState::Disconnected),
                closing: AtomicBool::new(false),
                pending: std::sync::Mutex::new(HashMap::new()),
                status: RwLock::new(CachedStatus::default()),
                handlers: EventHandlers::new(),
                events,
                reader: std::sync::Mutex::new(None),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Client settings
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Open the WebSocket and start the reader. No-op when connected.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.shared.closing.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connecting);
        match self.shared.open().await {
            Ok(read) => {
                self.shared.spawn_reader(read);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Drop the current socket, then retry `connect` with the configured
    /// fixed delay and attempt budget.
    pub async fn reconnect(&self) -> Result<()> {
        self.shared.drop_socket().await;
        self.shared.closing.store(false, Ordering::SeqCst);
        let read = self.shared.reconnect_with_retry().await?;
        self.shared.spawn_reader(read);
        Ok(())
    }

    /// Close the socket and fail every waiting request. No reconnect follows.
    pub async fn close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.drop_socket().await;
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the socket is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Cached agent connectivity
    #[must_use]
    pub fn is_extension_connected(&self) -> bool {
        self.shared
            .status
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .extension_connected
    }

    /// Cached advertised tools
    #[must_use]
    pub fn tools(&self) -> Vec<String> {
        self.shared
            .status
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .tools
            .clone()
    }

    /// Run `handler` for every event of `event_type`
    pub fn on_event<F>(&self, event_type: &str, handler: F) -> HandlerId
    where
        F: Fn(&RelayEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.shared.handlers.register(event_type, handler)
    }

    /// Remove a handler registered with `on_event`
    pub fn off_event(&self, id: HandlerId) -> bool {
        self.shared.handlers.unregister(id)
    }

    /// Typed stream of every relay event
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.shared.events.subscribe()
    }

    /// Send `{id, method, params}` and wait up to `timeout` for the reply.
    ///
    /// The pending entry is removed before a timeout is reported.
    pub async fn send_request(
        &self,
        method: RelayMethod,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&ControllerRequest::new(id, method, params))
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        {
            let mut sender = self.shared.sender.lock().await;
            let Some(sender) = sender.as_mut() else {
                self.shared.take_pending(id);
                return Err(ClientError::NotConnected);
            };
            if let Err(e) = sender.send(Message::Text(json)).await {
                self.shared.take_pending(id);
                return Err(ClientError::Send(e.to_string()));
            }
        }
        debug!(id, method = %method, "Request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(ClientError::Relay(error)),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.shared.take_pending(id);
                Err(ClientError::Timeout {
                    method,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    async fn request<T: DeserializeOwned>(&self, method: RelayMethod) -> Result<T> {
        let value = self
            .send_request(method, Value::Object(serde_json::Map::new()), self.shared.config.request_timeout())
            .await?;
        serde_json::from_value(value).map_err(|e| ClientError::Protocol(e.to_string()))
    }

    /// Advertised tools, straight from relay state
    pub async fn list_tools(&self) -> Result<ToolList> {
        self.request(RelayMethod::ListTools).await
    }

    /// Relay status, straight from relay state
    pub async fn get_status(&self) -> Result<RelayStatus> {
        self.request(RelayMethod::GetStatus).await
    }

    /// Call a tool with the configured default timeout
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<ToolResult> {
        self.call_tool_with_timeout(name, args, self.shared.config.tool_timeout())
            .await
    }

    /// Call a tool, waiting `timeout` plus the configured margin.
    ///
    /// Relay errors and timeouts come back as a failed `ToolResult`; only an
    /// unusable socket is an `Err`.
    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<ToolResult> {
        let params = ExecuteToolParams {
            name: name.to_string(),
            args,
            timeout: Some(timeout.as_secs_f64()),
            secret_key: self.shared.config.secret_key.clone(),
        };
        let params = serde_json::to_value(params).map_err(|e| ClientError::Protocol(e.to_string()))?;

        match self
            .send_request(RelayMethod::ExecuteTool, params, timeout + self.shared.config.timeout_margin())
            .await
        {
            Ok(value) => Ok(serde_json::from_value::<ToolResult>(value).unwrap_or_else(|e| {
                ToolResult::fail(ToolError::unknown(format!("malformed tool result: {e}")))
                    .with_tool_info(name, None)
            })),
            Err(e @ (ClientError::NotConnected | ClientError::Send(_))) => Err(e),
            Err(e) => Ok(ToolResult::fail(e.into()).with_tool_info(name, None)),
        }
    }

    /// Wait until the relay reports an attached agent.
    ///
    /// Registers an event handler before polling `getStatus`, so a
    /// connection that happens in between is not missed.
    pub async fn wait_for_extension(&self, timeout: Duration) -> Result<()> {
        if self.is_extension_connected() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let signal = move |event: &RelayEvent| {
            let connected = match event {
                RelayEvent::ExtensionConnected(_) => true,
                RelayEvent::Status(status) => status.extension_connected,
                RelayEvent::ExtensionDisconnected { .. } => false,
            };
            if connected {
                let _ = tx.send(());
            }
        };
        let signal: EventHandler = Arc::new(signal);
        let ids = [
            self.shared.handlers.register("extension_connected", signal.clone()),
            self.shared.handlers.register("status", signal),
        ];

        let waited = tokio::time::timeout(timeout, async {
            tokio::select! {
                status = self.get_status() => match status {
                    Ok(status) if status.extension_connected => return Ok(()),
                    Ok(_) => {}
                    Err(e) if e.is_transport_failure() => return Err(e),
                    Err(e) => debug!(error = %e, "Status poll failed while waiting for extension"),
                },
                _ = rx.recv() => return Ok(()),
            }
            rx.recv().await;
            Ok(())
        })
        .await;

        for id in ids {
            self.shared.handlers.unregister(id);
        }

        match waited {
            Ok(result) => result,
            Err(_) => Err(ClientError::ExtensionWait(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}

impl Drop for ControllerClient {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        if let Some(reader) = self
            .shared
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            reader.abort();
        }
    }
}

#[async_trait]
impl ToolTransport for ControllerClient {
    async fn call_tool(&self, name: &str, args: Value, timeout: Duration) -> ToolResult {
        match self.call_tool_with_timeout(name, args, timeout).await {
            Ok(result) => result,
            Err(e) => ToolResult::fail(e.into()).with_tool_info(name, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurone_core::ErrorCode;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_test::{assert_err, assert_ok};

    fn shared() -> Arc<Shared> {
        ControllerClient::new(ClientConfig::default()).shared.clone()
    }

    /// WebSocket peer that reads requests and never answers
    async fn silent_relay() -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });
        (port, server)
    }

    fn register(shared: &Shared, id: u64) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().unwrap().insert(id, tx);
        rx
    }

    #[tokio::test]
    async fn test_reply_resolves_pending() {
        let shared = shared();
        let rx = register(&shared, 1);
        shared.handle_text(r#"{"id": 1, "result": {"tools": ["x"], "extensionConnected": true}}"#);
        assert_eq!(rx.await.unwrap().unwrap()["tools"], json!(["x"]));
        assert!(shared.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_reply() {
        let shared = shared();
        let rx = register(&shared, 7);
        shared.handle_text(
            r#"{"id": 7, "error": {"code": "connection_error", "message": "no agent connected", "recoverable": true}}"#,
        );
        let error = rx.await.unwrap().unwrap_err();
        assert_eq!(error.code, ErrorCode::ConnectionError);

        let rx = register(&shared, 8);
        shared.handle_text(r#"{"id": 8, "error": "Extension not connected"}"#);
        assert_eq!(rx.await.unwrap().unwrap_err().message, "Extension not connected");
    }

    #[test]
    fn test_events_update_cache_and_handlers() {
        let shared = shared();
        let mut events = shared.events.subscribe();
        let (tx, rx) = std::sync::mpsc::channel();
        shared.handlers.register(
            "extension_connected",
            Arc::new(move |event: &RelayEvent| {
                let _ = tx.send(event.event_type());
            }),
        );

        shared.handle_text(
            r#"{"method": "event", "params": {"type": "extension_connected", "extensionId": "ext", "version": "1", "tools": ["x"], "connectedAt": "2026-01-01T00:00:00Z"}}"#,
        );
        {
            let status = shared.status.read().unwrap();
            assert!(status.extension_connected);
            assert_eq!(status.tools, vec!["x"]);
        }
        assert_eq!(rx.try_recv().unwrap(), "extension_connected");
        assert_eq!(events.try_recv().unwrap().event_type(), "extension_connected");

        shared.handle_text(r#"{"method": "event", "params": {"type": "extension_disconnected"}}"#);
        assert!(!shared.status.read().unwrap().extension_connected);
        assert!(shared.status.read().unwrap().tools.is_empty());
    }

    #[test]
    fn test_reset_fails_pending() {
        let shared = shared();
        let mut rx = register(&shared, 3);
        shared.reset();
        assert!(rx.try_recv().is_err());
        assert!(shared.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_requests_need_connection() {
        let client = ControllerClient::new(ClientConfig::default());
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        let err = assert_err!(client.get_status().await);
        assert!(matches!(err, ClientError::NotConnected));
        assert!(matches!(
            client.call_tool("chrome_click", json!({})).await,
            Err(ClientError::NotConnected)
        ));

        let result = ToolTransport::call_tool(&client, "chrome_click", json!({}), Duration::from_secs(1)).await;
        assert_eq!(result.error().unwrap().code, ErrorCode::ConnectionError);
    }

    #[tokio::test]
    async fn test_client_timeout_clears_pending() {
        let (port, server) = silent_relay().await;
        let client = ControllerClient::new(ClientConfig {
            auto_reconnect: false,
            timeout_margin_secs: 0,
            ..ClientConfig::with_port(port)
        });
        assert_ok!(client.connect().await);
        assert_eq!(client.state(), ConnectionState::Connected);

        let err = assert_err!(
            client
                .send_request(RelayMethod::GetStatus, json!({}), Duration::from_millis(200))
                .await
        );
        assert!(matches!(
            err,
            ClientError::Timeout {
                method: RelayMethod::GetStatus,
                timeout_ms: 200
            }
        ));
        assert!(client.shared.pending.lock().unwrap().is_empty());

        let result = assert_ok!(
            client
                .call_tool_with_timeout("chrome_click", json!({}), Duration::from_millis(200))
                .await
        );
        assert_eq!(result.error().unwrap().code, ErrorCode::ExecutionTimeout);
        assert!(client.shared.pending.lock().unwrap().is_empty());

        client.close().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_reconnect_gives_up() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = ControllerClient::new(ClientConfig {
            reconnect_delay_ms: 10,
            reconnect_max_attempts: 2,
            ..ClientConfig::with_port(port)
        });

        let err = assert_err!(client.reconnect().await);
        assert!(matches!(err, ClientError::ReconnectFailed { attempts: 2, .. }));
        assert_eq!(client.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_close_is_final() {
        let (port, server) = silent_relay().await;
        let client = ControllerClient::new(ClientConfig {
            reconnect_delay_ms: 10,
            ..ClientConfig::with_port(port)
        });
        assert_ok!(client.connect().await);

        client.close().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        server.abort();
    }
}
