//! Controller endpoint connection handler and method dispatch

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use neurone_core::protocol::{ControllerRequest, ControllerResponse, ExecuteToolParams, RelayMethod};
use neurone_core::{ErrorCode, ToolError};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::relay::SharedRelay;

/// Run one controller connection.
///
/// Each request is served by its own task, so replies go out in completion
/// order and a controller leaving does not cancel the calls it issued.
pub async fn handle_controller(socket: WebSocket, relay: SharedRelay) {
    let conn_id = Uuid::new_v4();
    debug!(conn_id = %conn_id, "Controller WS connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    relay.register_controller(conn_id, tx.clone());

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let relay = relay.clone();
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            let response = dispatch(&relay, &text).await;
                            match serde_json::to_string(&response) {
                                Ok(json) => {
                                    let _ = tx.send(json);
                                }
                                Err(e) => warn!(error = %e, "Failed to serialize controller response"),
                            }
                        });
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn_id = %conn_id, error = %e, "Controller WS error");
                        break;
                    }
                    _ => {}
                }
            }
            Some(json) = rx.recv() => {
                if ws_tx.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            _ = relay.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    relay.unregister_controller(conn_id);
    debug!(conn_id = %conn_id, "Controller WS connection closed");
}

fn reply<T: Serialize>(id: Value, value: &T) -> ControllerResponse {
    match serde_json::to_value(value) {
        Ok(result) => ControllerResponse::ok(id, result),
        Err(e) => ControllerResponse::err(id, ToolError::from_error(&e, ErrorCode::Unknown)),
    }
}

/// Parse a controller frame and run the requested relay method.
pub async fn dispatch(relay: &SharedRelay, text: &str) -> ControllerResponse {
    let request: ControllerRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            return ControllerResponse::err(
                Value::Null,
                ToolError::invalid_request(format!("invalid JSON: {e}")),
            )
        }
    };

    let method = match request.method.parse::<RelayMethod>() {
        Ok(method) => method,
        Err(error) => return ControllerResponse::err(request.id, error),
    };

    match method {
        RelayMethod::ExecuteTool => execute_tool(relay, request.id, request.params).await,
        RelayMethod::ListTools => reply(request.id, &relay.list_tools()),
        RelayMethod::GetStatus => reply(request.id, &relay.status()),
    }
}

async fn execute_tool(relay: &SharedRelay, id: Value, params: Value) -> ControllerResponse {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    let params: ExecuteToolParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => {
            return ControllerResponse::err(
                id,
                ToolError::new(ErrorCode::ValidationError, format!("invalid executeTool params: {e}")),
            )
        }
    };

    let timeout = match params.timeout.filter(|secs| secs.is_finite() && *secs > 0.0) {
        None => relay.config().default_timeout(),
        Some(secs) => match Duration::try_from_secs_f64(secs) {
            Ok(timeout) => timeout,
            Err(e) => {
                return ControllerResponse::err(
                    id,
                    ToolError::new(ErrorCode::ValidationError, format!("invalid timeout {secs}: {e}")),
                )
            }
        },
    };

    match relay
        .execute_tool(&params.name, params.args, timeout, params.secret_key)
        .await
    {
        Ok(result) => reply(id, &result),
        Err(error) => ControllerResponse::err(id, error),
    }
}
