//! Relay state
//!
//! Holds the single agent slot, the connected controllers and the pending
//! call map behind one mutex. No critical section awaits, so a disconnect
//! (clear slot, fail pending calls, broadcast) is observed atomically by
//! a concurrent `execute_tool` that checks for an agent and registers its
//! call under the same lock.

use chrono::Utc;
use neurone_core::protocol::{
    AgentHello, AgentInfo, AgentToolResult, EventFrame, RelayCommand, RelayEvent, RelayStatus,
    ToolCallPayload, ToolList,
};
use neurone_core::{ErrorCode, ToolError, ToolResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::normalize::normalize;

/// Reconnects of the same extension inside this window are logged quietly.
const RECONNECT_QUIET_WINDOW: Duration = Duration::from_secs(5);

/// Outcome delivered to a waiting `execute_tool`.
type CallOutcome = Result<AgentToolResult, ToolError>;

struct AgentSlot {
    conn_id: Uuid,
    info: AgentInfo,
    tx: mpsc::UnboundedSender<String>,
}

struct PendingCall {
    tool: String,
    agent_conn: Uuid,
    tx: oneshot::Sender<CallOutcome>,
    created_at: Instant,
    /// `None` when the timeout is too large to represent
    deadline: Option<Instant>,
}

#[derive(Default)]
struct RelayState {
    agent: Option<AgentSlot>,
    controllers: HashMap<Uuid, mpsc::UnboundedSender<String>>,
    pending: HashMap<String, PendingCall>,
    last_agent: Option<(String, Instant)>,
}

impl RelayState {
    fn next_request_id(&self) -> String {
        loop {
            let id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    fn status(&self) -> RelayStatus {
        let info = self.agent.as_ref().map(|a| &a.info);
        RelayStatus {
            extension_connected: info.is_some(),
            extension_id: info.map(|i| i.extension_id.clone()),
            version: info.map(|i| i.version.clone()),
            tools: info.map(|i| i.tools.clone()).unwrap_or_default(),
            connected_at: info.map(|i| i.connected_at),
            pending_calls: self.pending.len(),
            controllers: self.controllers.len(),
        }
    }

    /// Send to every controller, dropping the ones whose socket is gone.
    fn broadcast(&mut self, event: RelayEvent) {
        let json = match serde_json::to_string(&EventFrame::new(event)) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize relay event");
                return;
            }
        };
        self.controllers.retain(|_, tx| tx.send(json.clone()).is_ok());
    }

    /// Fail and remove every pending call matching `filter`.
    fn fail_pending<F>(&mut self, filter: F, reason: &str) -> usize
    where
        F: Fn(&PendingCall) -> bool,
    {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, call)| filter(call))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(call) = self.pending.remove(id) {
                let error = ToolError::connection(format!("{} while running '{}'", reason, call.tool))
                    .with_detail("requestId", Value::from(id.as_str()));
                let _ = call.tx.send(Err(error));
            }
        }
        ids.len()
    }
}

/// Removes a pending call when the awaiting future is dropped or times out.
struct PendingGuard<'a> {
    relay: &'a Relay,
    request_id: &'a str,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }

    fn release(&mut self) -> bool {
        self.armed = false;
        self.relay.state().pending.remove(self.request_id).is_some()
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.release();
        }
    }
}

/// Relay between controllers and the single agent
pub struct Relay {
    state: Mutex<RelayState>,
    config: RelayConfig,
    shutdown: CancellationToken,
}

/// Shared handle used by connection tasks
pub type SharedRelay = Arc<Relay>;

impl Relay {
    /// Create an empty relay
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            state: Mutex::new(RelayState::default()),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Relay settings
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Ask every connection task and the server to stop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once `shutdown` was called
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await;
    }

    /// Token cancelled on shutdown
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // ------------------------------------------------------------------
    // Agent slot
    // ------------------------------------------------------------------

    /// Install a new agent, replacing any current one.
    ///
    /// Dropping the previous slot drops its outbound sender, which makes
    /// the old connection task close its socket. Calls bound to the
    /// replaced agent fail immediately.
    pub fn register_agent(
        &self,
        conn_id: Uuid,
        hello: AgentHello,
        tx: mpsc::UnboundedSender<String>,
    ) -> AgentInfo {
        let info = AgentInfo {
            extension_id: hello.extension_id,
            version: hello.version,
            tools: hello.tools,
            connected_at: Utc::now(),
        };

        let mut state = self.state();
        let replaced = state.agent.replace(AgentSlot {
            conn_id,
            info: info.clone(),
            tx,
        });
        let orphaned = match &replaced {
            Some(old) => {
                let old_conn = old.conn_id;
                state.fail_pending(|call| call.agent_conn == old_conn, "agent replaced")
            }
            None => 0,
        };
        let quiet = matches!(
            &state.last_agent,
            Some((id, at)) if *id == info.extension_id && at.elapsed() < RECONNECT_QUIET_WINDOW
        );
        state.last_agent = Some((info.extension_id.clone(), Instant::now()));
        state.broadcast(RelayEvent::ExtensionConnected(info.clone()));
        drop(state);

        if let Some(old) = replaced {
            warn!(
                conn_id = %conn_id,
                replaced_conn_id = %old.conn_id,
                replaced_extension_id = %old.info.extension_id,
                orphaned,
                "Agent replaced, closing previous connection"
            );
        }
        if quiet {
            debug!(conn_id = %conn_id, extension_id = %info.extension_id, "Agent reconnected");
        } else {
            info!(
                conn_id = %conn_id,
                extension_id = %info.extension_id,
                version = %info.version,
                tools = info.tools.len(),
                "Agent connected"
            );
        }
        info
    }

    /// Update the descriptor after a repeated `hello` on the same socket
    pub fn refresh_agent(&self, conn_id: Uuid, hello: AgentHello) -> bool {
        let mut state = self.state();
        let Some(slot) = state.agent.as_mut().filter(|a| a.conn_id == conn_id) else {
            return false;
        };
        slot.info.extension_id = hello.extension_id;
        slot.info.version = hello.version;
        slot.info.tools = hello.tools;
        let info = slot.info.clone();
        state.broadcast(RelayEvent::ExtensionConnected(info));
        debug!(conn_id = %conn_id, "Agent descriptor refreshed");
        true
    }

    /// Drop the agent if `conn_id` still owns the slot.
    ///
    /// Clearing the slot, failing every pending call and broadcasting
    /// `extension_disconnected` happen under a single lock.
    pub fn unregister_agent(&self, conn_id: Uuid) -> bool {
        let mut state = self.state();
        if state.agent.as_ref().map(|a| a.conn_id) != Some(conn_id) {
            return false;
        }
        let slot = state.agent.take();
        let failed = state.fail_pending(|_| true, "agent disconnected");
        let extension_id = slot.map(|s| s.info.extension_id);
        state.broadcast(RelayEvent::ExtensionDisconnected {
            extension_id: extension_id.clone(),
        });
        drop(state);

        info!(
            conn_id = %conn_id,
            extension_id = extension_id.as_deref().unwrap_or(""),
            failed_calls = failed,
            "Agent disconnected"
        );
        true
    }

    /// Whether an agent is attached
    #[must_use]
    pub fn is_agent_connected(&self) -> bool {
        self.state().agent.is_some()
    }

    /// Best-effort heartbeat; failures are ignored
    pub fn ping_agent(&self) -> bool {
        let state = self.state();
        let Some(agent) = state.agent.as_ref() else {
            return false;
        };
        match serde_json::to_string(&RelayCommand::Ping) {
            Ok(json) => agent.tx.send(json).is_ok(),
            Err(_) => false,
        }
    }

    // ------------------------------------------------------------------
    // Controllers
    // ------------------------------------------------------------------

    /// Add a controller and push it the current status
    pub fn register_controller(&self, conn_id: Uuid, tx: mpsc::UnboundedSender<String>) {
        let mut state = self.state();
        let snapshot = EventFrame::new(RelayEvent::Status(state.status()));
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                let _ = tx.send(json);
            }
            Err(e) => warn!(error = %e, "Failed to serialize status snapshot"),
        }
        state.controllers.insert(conn_id, tx);
        debug!(conn_id = %conn_id, controllers = state.controllers.len(), "Controller registered");
    }

    /// Remove a controller; its outstanding calls keep running
    pub fn unregister_controller(&self, conn_id: Uuid) {
        let mut state = self.state();
        state.controllers.remove(&conn_id);
        debug!(conn_id = %conn_id, controllers = state.controllers.len(), "Controller unregistered");
    }

    /// Send an event to every connected controller
    pub fn broadcast(&self, event: RelayEvent) {
        self.state().broadcast(event);
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Advertised tools of the current agent
    #[must_use]
    pub fn list_tools(&self) -> ToolList {
        let state = self.state();
        ToolList {
            tools: state
                .agent
                .as_ref()
                .map(|a| a.info.tools.clone())
                .unwrap_or_default(),
            extension_connected: state.agent.is_some(),
        }
    }

    /// Connectivity snapshot
    #[must_use]
    pub fn status(&self) -> RelayStatus {
        self.state().status()
    }

    /// Calls awaiting an agent reply
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Connected controllers
    #[must_use]
    pub fn controller_count(&self) -> usize {
        self.state().controllers.len()
    }

    /// Register a pending call and hand the `tool_call` to the agent socket.
    fn dispatch_call(
        &self,
        name: &str,
        args: Value,
        timeout: Duration,
        secret_key: Option<String>,
    ) -> Result<(String, oneshot::Receiver<CallOutcome>), ToolError> {
        let mut state = self.state();
        let Some(agent) = state.agent.as_ref() else {
            return Err(ToolError::connection("no agent connected")
                .with_detail("tool", Value::from(name)));
        };
        let agent_conn = agent.conn_id;
        let agent_tx = agent.tx.clone();

        let limit = self.config.max_pending_calls;
        if limit > 0 && state.pending.len() >= limit {
            return Err(ToolError::connection(format!(
                "too many calls in flight (limit {})",
                limit
            )));
        }

        let request_id = state.next_request_id();
        let command = RelayCommand::ToolCall {
            request_id: request_id.clone(),
            payload: ToolCallPayload {
                name: name.to_string(),
                args,
            },
            secret_key,
        };
        let json = serde_json::to_string(&command)
            .map_err(|e| ToolError::from_error(&e, ErrorCode::Unknown))?;
        agent_tx
            .send(json)
            .map_err(|_| ToolError::connection("agent connection closed"))?;

        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        state.pending.insert(
            request_id.clone(),
            PendingCall {
                tool: name.to_string(),
                agent_conn,
                tx,
                created_at: now,
                deadline: now.checked_add(timeout),
            },
        );
        Ok((request_id, rx))
    }

    /// Forward a tool call to the agent and wait for its reply.
    ///
    /// Fails fast without sending anything when no agent is attached or
    /// `name` is empty. A timeout removes the pending call before the
    /// error is returned, so a late reply finds nothing to resolve.
    #[instrument(skip(self, args, secret_key), fields(tool = %name))]
    pub async fn execute_tool(
        &self,
        name: &str,
        args: Value,
        timeout: Duration,
        secret_key: Option<String>,
    ) -> Result<ToolResult, ToolError> {
        if name.trim().is_empty() {
            return Err(ToolError::new(
                ErrorCode::ValidationError,
                "tool name must not be empty",
            ));
        }

        let started = Instant::now();
        let (request_id, rx) = self.dispatch_call(name, args, timeout, secret_key)?;
        debug!(request_id = %request_id, timeout_ms = timeout.as_millis() as u64, "Tool call sent");

        let mut guard = PendingGuard {
            relay: self,
            request_id: &request_id,
            armed: true,
        };
        let outcome = tokio::time::timeout(timeout, rx).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(Ok(Ok(raw))) => {
                guard.disarm();
                debug!(request_id = %request_id, elapsed_ms, "Tool call resolved");
                Ok(normalize(raw)
                    .with_tool_info(name, None)
                    .with_duration(elapsed_ms))
            }
            Ok(Ok(Err(error))) => {
                guard.disarm();
                Err(error)
            }
            Ok(Err(_)) => {
                guard.release();
                Err(ToolError::connection("pending call dropped"))
            }
            Err(_) => {
                guard.release();
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(request_id = %request_id, timeout_ms, "Tool call timed out");
                Err(ToolError::timeout(name, timeout_ms))
            }
        }
    }

    /// Deliver an agent reply. Unknown or already-resolved ids are ignored.
    pub fn resolve(&self, request_id: &str, outcome: Result<AgentToolResult, ToolError>) -> bool {
        let call = self.state().pending.remove(request_id);
        match call {
            Some(call) => {
                let overdue = call.deadline.is_some_and(|deadline| Instant::now() > deadline);
                debug!(
                    request_id = %request_id,
                    tool = %call.tool,
                    elapsed_ms = call.created_at.elapsed().as_millis() as u64,
                    overdue,
                    "Resolving tool call"
                );
                let _ = call.tx.send(outcome);
                true
            }
            None => {
                debug!(request_id = %request_id, "No pending call for tool result");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neurone_core::protocol::ContentItem;
    use serde_json::json;

    fn hello(id: &str, tools: &[&str]) -> AgentHello {
        AgentHello {
            extension_id: id.to_string(),
            version: "1.0.0".to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            secret_key: None,
        }
    }

    fn attach(relay: &Relay, id: &str) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        relay.register_agent(conn_id, hello(id, &["chrome_click"]), tx);
        (conn_id, rx)
    }

    async fn next_request_id(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        let frame: RelayCommand = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        match frame {
            RelayCommand::ToolCall { request_id, .. } => request_id,
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_agent_fails_fast() {
        let relay = Relay::new(RelayConfig::default());
        let err = relay
            .execute_tool("chrome_click", json!({"selector": "#a"}), Duration::from_secs(5), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectionError);
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_name_fails_fast() {
        let relay = Relay::new(RelayConfig::default());
        let (_conn, mut rx) = attach(&relay, "ext");
        let err = relay
            .execute_tool("  ", json!({}), Duration::from_secs(5), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let relay = Arc::new(Relay::new(RelayConfig::default()));
        let (_conn, mut rx) = attach(&relay, "ext");

        let caller = {
            let relay = relay.clone();
            tokio::spawn(async move {
                relay
                    .execute_tool("chrome_click", json!({}), Duration::from_secs(5), None)
                    .await
            })
        };

        let request_id = next_request_id(&mut rx).await;
        assert_eq!(request_id.len(), 8);
        assert_eq!(relay.pending_count(), 1);

        let raw = AgentToolResult {
            content: vec![ContentItem::text(r#"{"a":1}"#)],
            is_error: false,
            data: None,
        };
        assert!(relay.resolve(&request_id, Ok(raw.clone())));
        assert!(!relay.resolve(&request_id, Ok(raw)));

        let result = caller.await.unwrap().unwrap();
        assert_eq!(result.data(), Some(&json!({"a": 1})));
        assert_eq!(result.meta().unwrap().tool_name.as_deref(), Some("chrome_click"));
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_pending_call() {
        let relay = Relay::new(RelayConfig::default());
        let (_conn, mut rx) = attach(&relay, "ext");

        let err = relay
            .execute_tool("chrome_click", json!({}), Duration::from_millis(1_000), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecutionTimeout);
        assert!(err.message.contains("chrome_click"));
        assert_eq!(relay.pending_count(), 0);

        let request_id = next_request_id(&mut rx).await;
        assert!(!relay.resolve(&request_id, Ok(AgentToolResult::default())));
    }

    #[tokio::test]
    async fn test_huge_timeout_still_resolves() {
        let relay = Arc::new(Relay::new(RelayConfig::default()));
        let (_conn, mut rx) = attach(&relay, "ext");

        let caller = relay.clone();
        let call = tokio::spawn(async move {
            caller
                .execute_tool("chrome_click", json!({}), Duration::MAX, None)
                .await
        });
        let request_id = next_request_id(&mut rx).await;
        assert!(relay.resolve(
            &request_id,
            Ok(AgentToolResult {
                content: vec![ContentItem::text("done")],
                ..AgentToolResult::default()
            })
        ));

        let result = call.await.unwrap().unwrap();
        assert_eq!(result.data(), Some(&json!("done")));
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_all_pending() {
        let relay = Arc::new(Relay::new(RelayConfig::default()));
        let (conn_id, mut rx) = attach(&relay, "ext");

        let mut callers = Vec::new();
        for _ in 0..2 {
            let relay = relay.clone();
            callers.push(tokio::spawn(async move {
                relay
                    .execute_tool("chrome_click", json!({}), Duration::from_secs(30), None)
                    .await
            }));
        }
        next_request_id(&mut rx).await;
        next_request_id(&mut rx).await;
        assert_eq!(relay.pending_count(), 2);

        assert!(relay.unregister_agent(conn_id));
        for caller in callers {
            let err = caller.await.unwrap().unwrap_err();
            assert_eq!(err.code, ErrorCode::ConnectionError);
        }
        assert_eq!(relay.pending_count(), 0);
        assert!(!relay.is_agent_connected());
    }

    #[tokio::test]
    async fn test_new_agent_replaces_old() {
        let relay = Relay::new(RelayConfig::default());
        let (old_conn, mut old_rx) = attach(&relay, "first");
        let (_new_conn, _new_rx) = attach(&relay, "second");

        assert!(old_rx.recv().await.is_none());
        assert_eq!(relay.status().extension_id.as_deref(), Some("second"));
        assert!(!relay.unregister_agent(old_conn));
        assert!(relay.is_agent_connected());
    }

    #[tokio::test]
    async fn test_controller_gets_snapshot_and_events() {
        let relay = Relay::new(RelayConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.register_controller(Uuid::new_v4(), tx);

        let snapshot: EventFrame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert!(matches!(snapshot.params, RelayEvent::Status(ref s) if !s.extension_connected));

        let (conn_id, _agent_rx) = attach(&relay, "ext");
        let event: EventFrame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event.params.event_type(), "extension_connected");

        relay.unregister_agent(conn_id);
        let event: EventFrame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event.params.event_type(), "extension_disconnected");
    }

    #[tokio::test]
    async fn test_pending_limit() {
        let config = RelayConfig {
            max_pending_calls: 1,
            ..RelayConfig::default()
        };
        let relay = Arc::new(Relay::new(config));
        let (_conn, mut rx) = attach(&relay, "ext");

        let first = {
            let relay = relay.clone();
            tokio::spawn(async move {
                relay
                    .execute_tool("chrome_click", json!({}), Duration::from_secs(30), None)
                    .await
            })
        };
        let request_id = next_request_id(&mut rx).await;

        let err = relay
            .execute_tool("chrome_click", json!({}), Duration::from_secs(30), None)
            .await
            .unwrap_err();
        assert!(err.message.contains("too many calls"));
        assert!(err.recoverable);

        relay.resolve(&request_id, Ok(AgentToolResult::default()));
        assert!(first.await.unwrap().is_ok());
    }

    #[test]
    fn test_list_tools_and_ping() {
        let relay = Relay::new(RelayConfig::default());
        assert!(!relay.ping_agent());
        assert!(!relay.list_tools().extension_connected);

        let (_conn, mut rx) = attach(&relay, "ext");
        assert_eq!(relay.list_tools().tools, vec!["chrome_click"]);
        assert!(relay.ping_agent());
        assert_eq!(rx.try_recv().unwrap(), r#"{"type":"ping"}"#);
    }
}
