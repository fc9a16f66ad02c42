//! Agent endpoint connection handler

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use neurone_core::protocol::{AgentHello, AgentMessage};
use neurone_core::ToolError;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::relay::SharedRelay;

/// Run one agent connection until it closes or is replaced.
pub async fn handle_agent(socket: WebSocket, relay: SharedRelay) {
    let conn_id = Uuid::new_v4();
    debug!(conn_id = %conn_id, "Agent WS connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Phase 1: `hello` handshake
    let Some(hello) = wait_for_hello(&mut ws_tx, &mut ws_rx, &relay, conn_id).await else {
        info!(conn_id = %conn_id, "Agent WS closed during handshake");
        return;
    };

    // Phase 2: forward tool calls and collect results
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    relay.register_agent(conn_id, hello, tx);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_frame(&relay, conn_id, &text),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn_id = %conn_id, error = %e, "Agent WS error");
                        break;
                    }
                    _ => {}
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(json) => {
                        if ws_tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Slot taken by a newer agent
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::NORMAL,
                                reason: "replaced by a newer agent connection".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
            _ = relay.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    relay.unregister_agent(conn_id);
    debug!(conn_id = %conn_id, "Agent WS connection closed");
}

/// Wait for the first frame and require it to be `hello`.
async fn wait_for_hello(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
    relay: &SharedRelay,
    conn_id: Uuid,
) -> Option<AgentHello> {
    let msg = tokio::time::timeout(relay.config().hello_timeout(), ws_rx.next()).await;

    let reason = match msg {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<AgentMessage>(&text) {
            Ok(AgentMessage::Hello(hello)) => return Some(hello),
            Ok(_) => "expected hello as first message",
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "Invalid agent handshake frame");
                "invalid hello frame"
            }
        },
        Ok(_) => "expected hello as first message",
        Err(_) => "hello timeout",
    };

    warn!(conn_id = %conn_id, reason, "Rejecting agent connection");
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
    None
}

/// Handle a text frame from an attached agent.
pub fn handle_frame(relay: &SharedRelay, conn_id: Uuid, text: &str) {
    let message = match serde_json::from_str::<AgentMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "Unparseable agent frame");
            // Fail the call now rather than letting it run into its timeout
            if let Some(request_id) = malformed_result_id(text) {
                relay.resolve(
                    &request_id,
                    Err(ToolError::execution_failed(format!("malformed tool result: {e}"))),
                );
            }
            return;
        }
    };

    match message {
        AgentMessage::ToolResult {
            request_id,
            result,
            error,
        } => {
            let outcome = match error {
                Some(error) => Err(ToolError::from_wire(error)),
                None => Ok(result.unwrap_or_default()),
            };
            relay.resolve(&request_id, outcome);
        }
        AgentMessage::Hello(hello) => {
            relay.refresh_agent(conn_id, hello);
        }
        AgentMessage::Pong => trace!(conn_id = %conn_id, "Agent pong"),
    }
}

/// Request id of a `tool_result` frame whose body failed to decode
fn malformed_result_id(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(Value::as_str) != Some("tool_result") {
        return None;
    }
    match value.get("requestId")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::relay::Relay;
    use neurone_core::protocol::RelayCommand;
    use neurone_core::ErrorCode;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn attached() -> (SharedRelay, Uuid, mpsc::UnboundedReceiver<String>) {
        let relay = Arc::new(Relay::new(RelayConfig::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        relay.register_agent(
            conn_id,
            AgentHello {
                extension_id: "ext".to_string(),
                ..AgentHello::default()
            },
            tx,
        );
        (relay, conn_id, rx)
    }

    async fn sent_request_id(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        let frame = rx.recv().await.unwrap();
        match serde_json::from_str(&frame).unwrap() {
            RelayCommand::ToolCall { request_id, .. } => request_id,
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_untyped_content_resolves_as_output() {
        let (relay, conn_id, mut rx) = attached();
        let caller = relay.clone();
        let call = tokio::spawn(async move {
            caller
                .execute_tool("chrome_get_text", json!({}), Duration::from_secs(5), None)
                .await
        });

        let request_id = sent_request_id(&mut rx).await;
        let frame = json!({
            "type": "tool_result",
            "requestId": request_id,
            "result": {"content": [{"text": "ok"}], "isError": false}
        });
        handle_frame(&relay, conn_id, &frame.to_string());

        let result = call.await.unwrap().unwrap();
        assert_eq!(result.data(), Some(&json!("ok")));
    }

    #[tokio::test]
    async fn test_malformed_result_fails_the_call() {
        let (relay, conn_id, mut rx) = attached();
        let caller = relay.clone();
        let call = tokio::spawn(async move {
            caller
                .execute_tool("chrome_get_text", json!({}), Duration::from_secs(5), None)
                .await
        });

        let request_id = sent_request_id(&mut rx).await;
        let frame = json!({
            "type": "tool_result",
            "requestId": request_id,
            "result": {"content": "not a list"}
        });
        handle_frame(&relay, conn_id, &frame.to_string());

        let error = call.await.unwrap().unwrap_err();
        assert_eq!(error.code, ErrorCode::ExecutionFailed);
        assert!(error.message.starts_with("malformed tool result"));
        assert_eq!(relay.pending_count(), 0);
    }

    #[test]
    fn test_malformed_result_id() {
        assert_eq!(
            malformed_result_id(r#"{"type": "tool_result", "requestId": 7, "result": 1}"#),
            Some("7".to_string())
        );
        assert_eq!(malformed_result_id(r#"{"type": "hello", "requestId": "a"}"#), None);
        assert_eq!(malformed_result_id("not json"), None);
    }
}
