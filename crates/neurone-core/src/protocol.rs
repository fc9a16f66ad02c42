//! Relay wire protocol.
//!
//! JSON text frames exchanged over the two relay endpoints:
//! - `/extension`: the single agent (`hello`, `tool_result`, `pong` in;
//!   `tool_call`, `ping` out)
//! - `/controller`: any number of controllers (`{id, method, params}` in;
//!   `{id, result}`, `{id, error}` and `{method: "event"}` out)

use crate::result::ToolError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Path of the agent endpoint
pub const AGENT_PATH: &str = "/extension";
/// Path of the controller endpoint
pub const CONTROLLER_PATH: &str = "/controller";
/// `method` value of unsolicited controller frames
pub const EVENT_METHOD: &str = "event";

// ============================================================================
// Agent <-> Relay
// ============================================================================

/// Agent → Relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// First frame of every agent connection
    Hello(AgentHello),
    /// Reply to a `tool_call`
    ToolResult {
        /// Matches the `tool_call` request id
        #[serde(rename = "requestId", deserialize_with = "request_id_string")]
        request_id: String,
        /// Tool output
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<AgentToolResult>,
        /// Agent-side failure outside the tool itself
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
    /// Heartbeat reply
    Pong,
}

/// Agent self-description sent in `hello`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentHello {
    /// Extension identifier
    #[serde(rename = "extensionId", default)]
    pub extension_id: String,
    /// Extension version
    #[serde(default)]
    pub version: String,
    /// Advertised tool names
    #[serde(default)]
    pub tools: Vec<String>,
    /// Opaque routing token, never verified
    #[serde(rename = "secretKey", default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

/// Raw tool output as reported by the agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentToolResult {
    /// Content items
    #[serde(default)]
    pub content: Vec<ContentItem>,
    /// Whether the tool failed
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    /// Structured payload used when no text is present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Kind of a content item. Untyped items count as output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Regular output
    #[default]
    Text,
    /// Error output
    Error,
    /// Anything else (images, resources)
    #[serde(other)]
    Other,
}

/// Single content item of a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Item kind
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: ContentKind,
    /// Text payload
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ContentItem {
    /// Regular text item
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Text,
            text: text.into(),
        }
    }

    /// Error text item
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Error,
            text: text.into(),
        }
    }
}

/// Relay → Agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayCommand {
    /// Execute a tool
    ToolCall {
        /// Correlation id echoed in `tool_result`
        #[serde(rename = "requestId")]
        request_id: String,
        /// What to run
        payload: ToolCallPayload,
        /// Forwarded controller token
        #[serde(rename = "secretKey", default, skip_serializing_if = "Option::is_none")]
        secret_key: Option<String>,
    },
    /// Heartbeat
    Ping,
}

/// Tool name and arguments of a `tool_call`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPayload {
    /// Opaque tool name
    pub name: String,
    /// Tool arguments
    #[serde(default)]
    pub args: Value,
}

fn request_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "requestId must be a string or number, got {other}"
        ))),
    }
}

// ============================================================================
// Controller <-> Relay
// ============================================================================

/// Methods served by the relay itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelayMethod {
    /// Forward a tool call to the agent
    ExecuteTool,
    /// Advertised tools of the current agent
    ListTools,
    /// Connectivity snapshot
    GetStatus,
}

impl RelayMethod {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecuteTool => "executeTool",
            Self::ListTools => "listTools",
            Self::GetStatus => "getStatus",
        }
    }
}

impl std::fmt::Display for RelayMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RelayMethod {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executeTool" => Ok(Self::ExecuteTool),
            "listTools" => Ok(Self::ListTools),
            "getStatus" => Ok(Self::GetStatus),
            other => Err(ToolError::invalid_request(format!("unknown method: {other}"))),
        }
    }
}

/// Controller → Relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerRequest {
    /// Caller-chosen correlation id
    #[serde(default)]
    pub id: Value,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

impl ControllerRequest {
    /// Build a request for a relay method
    pub fn new(id: u64, method: RelayMethod, params: Value) -> Self {
        Self {
            id: Value::from(id),
            method: method.as_str().to_string(),
            params,
        }
    }
}

/// Parameters of `executeTool`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteToolParams {
    /// Opaque tool name
    #[serde(default)]
    pub name: String,
    /// Tool arguments
    #[serde(default = "empty_object")]
    pub args: Value,
    /// Timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    /// Opaque routing token
    #[serde(rename = "secretKey", default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Relay → Controller reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerResponse {
    /// Echo of the request id
    pub id: Value,
    /// Successful result (mutually exclusive with error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (mutually exclusive with result)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ControllerResponse {
    /// Success reply
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error reply
    pub fn err(id: Value, error: ToolError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Unsolicited Relay → Controller frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Always `"event"`
    pub method: String,
    /// The event
    pub params: RelayEvent,
}

impl EventFrame {
    /// Wrap an event
    pub fn new(event: RelayEvent) -> Self {
        Self {
            method: EVENT_METHOD.to_string(),
            params: event,
        }
    }
}

/// Connectivity events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// Snapshot pushed to every controller on connect
    Status(RelayStatus),
    /// An agent completed its `hello`
    ExtensionConnected(AgentInfo),
    /// The agent went away
    ExtensionDisconnected {
        /// Identifier of the agent that left
        #[serde(rename = "extensionId", default, skip_serializing_if = "Option::is_none")]
        extension_id: Option<String>,
    },
}

impl RelayEvent {
    /// Event type name used for handler registration
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::ExtensionConnected(_) => "extension_connected",
            Self::ExtensionDisconnected { .. } => "extension_disconnected",
        }
    }
}

/// Descriptor of the attached agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Extension identifier
    #[serde(rename = "extensionId")]
    pub extension_id: String,
    /// Extension version
    pub version: String,
    /// Advertised tool names
    pub tools: Vec<String>,
    /// When the agent said hello
    #[serde(rename = "connectedAt")]
    pub connected_at: DateTime<Utc>,
}

/// Relay state snapshot returned by `getStatus` and pushed as `status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayStatus {
    /// Whether an agent is attached
    #[serde(rename = "extensionConnected")]
    pub extension_connected: bool,
    /// Attached agent id
    #[serde(rename = "extensionId", default, skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    /// Attached agent version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Advertised tool names
    #[serde(default)]
    pub tools: Vec<String>,
    /// When the agent said hello
    #[serde(rename = "connectedAt", default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    /// Calls awaiting an agent reply
    #[serde(rename = "pendingCalls", default)]
    pub pending_calls: usize,
    /// Connected controllers
    #[serde(default)]
    pub controllers: usize,
}

/// Result of `listTools`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolList {
    /// Advertised tool names
    pub tools: Vec<String>,
    /// Whether an agent is attached
    #[serde(rename = "extensionConnected")]
    pub extension_connected: bool,
}
