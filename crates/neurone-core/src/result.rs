//! Result - Tagged success/failure container for tool calls
//!
//! Every remote operation yields a [`ToolResult`]: either data or a
//! structured [`ToolError`], plus optional execution [`ResultMeta`].
//! `ToolError::recoverable` is the only flag the retry loop consults.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::backtrace::Backtrace;

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No error
    Success,
    /// Unclassified failure
    Unknown,
    /// Parameters did not match the declared schema
    ValidationError,
    /// No reply within the deadline
    ExecutionTimeout,
    /// The agent reported a failure
    ExecutionFailed,
    /// No tool registered under that name
    ToolNotFound,
    /// Target tab does not exist
    TabNotFound,
    /// Target tab was closed mid-call
    TabClosed,
    /// Selector matched nothing
    ElementNotFound,
    /// Element exists but is not visible
    ElementNotVisible,
    /// No agent or transport attached
    ConnectionError,
    /// The socket itself failed
    WebsocketError,
    /// Malformed controller frame or unknown relay method
    InvalidRequest,
}

impl ErrorCode {
    /// Returns the wire representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Unknown => "unknown",
            Self::ValidationError => "validation_error",
            Self::ExecutionTimeout => "execution_timeout",
            Self::ExecutionFailed => "execution_failed",
            Self::ToolNotFound => "tool_not_found",
            Self::TabNotFound => "tab_not_found",
            Self::TabClosed => "tab_closed",
            Self::ElementNotFound => "element_not_found",
            Self::ElementNotVisible => "element_not_visible",
            Self::ConnectionError => "connection_error",
            Self::WebsocketError => "websocket_error",
            Self::InvalidRequest => "invalid_request",
        }
    }

    /// Whether errors with this code are retried unless stated otherwise
    #[must_use]
    pub fn default_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ExecutionTimeout
                | Self::ConnectionError
                | Self::WebsocketError
                | Self::ElementNotFound
                | Self::ElementNotVisible
                | Self::TabNotFound
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exception details, only present when a failure path asked for them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Rust type name of the source error
    pub exception_type: String,
    /// Display text of the source error
    pub exception_message: String,
    /// Captured backtrace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Structured tool failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ToolError {
    /// Classification
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Free-form details
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    /// Whether the retry loop may try again
    #[serde(default)]
    pub recoverable: bool,
    /// Optional exception diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

impl ToolError {
    /// Create an error whose recoverability follows the code default
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Map::new(),
            recoverable: code.default_recoverable(),
            diagnostics: None,
        }
    }

    /// Parameter validation failure carrying every violation
    #[must_use]
    pub fn validation(errors: Vec<String>) -> Self {
        Self::new(ErrorCode::ValidationError, "parameter validation failed")
            .with_detail("errors", Value::from(errors))
    }

    /// No reply within `timeout_ms`
    #[must_use]
    pub fn timeout(tool_name: &str, timeout_ms: u64) -> Self {
        Self::new(
            ErrorCode::ExecutionTimeout,
            format!("tool '{}' timed out after {}ms", tool_name, timeout_ms),
        )
        .with_detail("tool", Value::from(tool_name))
        .with_detail("timeout_ms", Value::from(timeout_ms))
    }

    /// Unknown tool name
    #[must_use]
    pub fn tool_not_found(tool_name: &str) -> Self {
        Self::new(
            ErrorCode::ToolNotFound,
            format!("tool not found: {}", tool_name),
        )
        .with_detail("tool", Value::from(tool_name))
    }

    /// No agent or transport available
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionError, message)
    }

    /// The agent reported a failure
    #[must_use]
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExecutionFailed, message)
    }

    /// Selector matched nothing
    #[must_use]
    pub fn element_not_found(selector: &str) -> Self {
        Self::new(
            ErrorCode::ElementNotFound,
            format!("element not found: {}", selector),
        )
        .with_detail("selector", Value::from(selector))
    }

    /// Malformed request
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Unclassified failure
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    /// Wrap a Rust error without diagnostics
    #[must_use]
    pub fn from_error<E: std::error::Error>(err: &E, code: ErrorCode) -> Self {
        Self::new(code, err.to_string())
    }

    /// Wrap a Rust error and capture its type name and a backtrace
    #[must_use]
    pub fn from_error_with_diagnostics<E: std::error::Error>(err: &E, code: ErrorCode) -> Self {
        let mut error = Self::from_error(err, code);
        error.diagnostics = Some(Diagnostics {
            exception_type: std::any::type_name::<E>().to_string(),
            exception_message: err.to_string(),
            traceback: Some(Backtrace::force_capture().to_string()),
        });
        error
    }

    /// Decode an error as it appears on the wire.
    ///
    /// Accepts the structured `{code, message, ...}` form as well as a
    /// bare string, which becomes an `execution_failed` error.
    #[must_use]
    pub fn from_wire(value: Value) -> Self {
        match value {
            Value::String(message) => Self::execution_failed(message),
            other => match serde_json::from_value::<ToolError>(other.clone()) {
                Ok(error) => error,
                Err(_) => Self::unknown(other.to_string()),
            },
        }
    }

    /// Attach a detail entry
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Override recoverability
    #[must_use]
    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }
}

/// Execution metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    /// Tool that produced the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Wall time in milliseconds
    #[serde(default)]
    pub duration_ms: u64,
    /// Creation time
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// 1-based attempt that produced the result
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    /// Browser tab the call targeted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    /// Free-form extras
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

fn default_attempt() -> u32 {
    1
}

impl Default for ResultMeta {
    fn default() -> Self {
        Self {
            tool_name: None,
            duration_ms: 0,
            timestamp: Utc::now(),
            attempt: default_attempt(),
            tab_id: None,
            extra: Map::new(),
        }
    }
}

/// Success/failure container.
///
/// `success` and `error` are mutually exclusive; the fields are private so
/// the invariant holds for every value built through this API or decoded
/// from JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult<T = Value> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ToolError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<ResultMeta>,
}

impl<T> ToolResult<T> {
    /// Successful result
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: None,
        }
    }

    /// Failed result
    #[must_use]
    pub fn fail(error: ToolError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            meta: None,
        }
    }

    /// Whether the call succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Whether the call failed
    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.success
    }

    /// Borrow the data, if any
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Borrow the error, if any
    #[must_use]
    pub fn error(&self) -> Option<&ToolError> {
        self.error.as_ref()
    }

    /// Borrow the metadata, if any
    #[must_use]
    pub fn meta(&self) -> Option<&ResultMeta> {
        self.meta.as_ref()
    }

    /// Duration recorded in the metadata, 0 when absent
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        self.meta.as_ref().map_or(0, |m| m.duration_ms)
    }

    /// Convert into a std `Result`; a success without data yields `None`
    pub fn into_result(self) -> std::result::Result<Option<T>, ToolError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }

    /// Data on success, `default` otherwise
    pub fn unwrap_or(self, default: T) -> T {
        if self.success {
            self.data.unwrap_or(default)
        } else {
            default
        }
    }

    /// Replace the metadata
    #[must_use]
    pub fn with_meta(mut self, meta: ResultMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Set the duration, creating metadata if needed
    #[must_use]
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.meta.get_or_insert_with(ResultMeta::default).duration_ms = duration_ms;
        self
    }

    /// Record the tool name and, when known, the tab
    #[must_use]
    pub fn with_tool_info(mut self, tool_name: &str, tab_id: Option<i64>) -> Self {
        let meta = self.meta.get_or_insert_with(ResultMeta::default);
        meta.tool_name = Some(tool_name.to_string());
        if tab_id.is_some() {
            meta.tab_id = tab_id;
        }
        self
    }

    /// Set the attempt number
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.meta.get_or_insert_with(ResultMeta::default).attempt = attempt;
        self
    }

    /// Add another result's duration to this one
    #[must_use]
    pub fn merge_duration<U>(mut self, other: &ToolResult<U>) -> Self {
        let extra = other.duration_ms();
        self.meta.get_or_insert_with(ResultMeta::default).duration_ms += extra;
        self
    }

    /// Transform the data of a successful result
    pub fn map<U, F>(self, f: F) -> ToolResult<U>
    where
        F: FnOnce(T) -> U,
    {
        ToolResult {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
            meta: self.meta,
        }
    }

    /// Chain another fallible step; metadata is carried over when the
    /// next step does not set its own
    pub fn and_then<U, F>(self, f: F) -> ToolResult<U>
    where
        F: FnOnce(T) -> ToolResult<U>,
    {
        match (self.error, self.data) {
            (Some(error), _) => ToolResult {
                success: false,
                data: None,
                error: Some(error),
                meta: self.meta,
            },
            (None, Some(data)) => {
                let mut next = f(data);
                if next.meta.is_none() {
                    next.meta = self.meta;
                }
                next
            }
            (None, None) => ToolResult {
                success: true,
                data: None,
                error: None,
                meta: self.meta,
            },
        }
    }

    /// Turn a failure into a success using the error
    pub fn recover<F>(self, f: F) -> Self
    where
        F: FnOnce(&ToolError) -> T,
    {
        match self.error {
            Some(ref error) => Self {
                success: true,
                data: Some(f(error)),
                error: None,
                meta: self.meta,
            },
            None => self,
        }
    }
}

#[derive(Deserialize)]
struct RawToolResult<T> {
    success: bool,
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    meta: Option<ResultMeta>,
}

impl<T> TryFrom<RawToolResult<T>> for ToolResult<T> {
    type Error = Error;

    fn try_from(raw: RawToolResult<T>) -> std::result::Result<Self, Self::Error> {
        let error = raw.error.map(ToolError::from_wire);
        match (raw.success, error) {
            (true, Some(_)) => Err(Error::InvalidResult(
                "a successful result cannot carry an error".to_string(),
            )),
            (true, None) => Ok(Self {
                success: true,
                data: raw.data,
                error: None,
                meta: raw.meta,
            }),
            (false, error) => Ok(Self {
                success: false,
                data: None,
                error: Some(
                    error.unwrap_or_else(|| ToolError::unknown("failure without error details")),
                ),
                meta: raw.meta,
            }),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for ToolResult<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawToolResult::<T>::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_recoverability() {
        assert!(ToolError::connection("no agent").recoverable);
        assert!(ToolError::timeout("x", 1000).recoverable);
        assert!(!ToolError::validation(vec![]).recoverable);
        assert!(!ToolError::tool_not_found("x").recoverable);
        assert!(!ToolError::execution_failed("boom").recoverable);
        assert!(!ToolError::unknown("?").recoverable);
    }

    #[test]
    fn test_error_serializes_snake_case_code() {
        let err = ToolError::timeout("chrome_click", 1000);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], "execution_timeout");
        assert_eq!(value["details"]["tool"], "chrome_click");
        assert!(value["message"].as_str().unwrap().contains("chrome_click"));
        assert!(value.get("diagnostics").is_none());
    }

    #[test]
    fn test_diagnostics_only_when_requested() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        assert!(ToolError::from_error(&io, ErrorCode::Unknown).diagnostics.is_none());

        let err = ToolError::from_error_with_diagnostics(&io, ErrorCode::Unknown);
        let diag = err.diagnostics.unwrap();
        assert!(diag.exception_type.contains("io::error::Error"));
        assert_eq!(diag.exception_message, "disk gone");
        assert!(diag.traceback.is_some());
    }

    #[test]
    fn test_from_wire_accepts_string_and_object() {
        let err = ToolError::from_wire(json!("no agent"));
        assert_eq!(err.code, ErrorCode::ExecutionFailed);
        assert_eq!(err.message, "no agent");

        let err = ToolError::from_wire(json!({
            "code": "connection_error",
            "message": "agent disconnected",
            "recoverable": true
        }));
        assert_eq!(err.code, ErrorCode::ConnectionError);
        assert!(err.recoverable);
    }

    #[test]
    fn test_ok_and_fail() {
        let ok: ToolResult = ToolResult::ok(json!({"a": 1}));
        assert!(ok.is_success());
        assert_eq!(ok.data(), Some(&json!({"a": 1})));
        assert!(ok.error().is_none());

        let failed: ToolResult = ToolResult::fail(ToolError::execution_failed("boom"));
        assert!(failed.is_error());
        assert!(failed.data().is_none());
        assert_eq!(failed.into_result().unwrap_err().message, "boom");
    }

    #[test]
    fn test_serialization_drops_absent_fields() {
        let ok: ToolResult = ToolResult::ok(json!({"a": 1}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"success": true, "data": {"a": 1}})
        );
    }

    #[test]
    fn test_deserialize_rejects_success_with_error() {
        let raw = json!({"success": true, "error": {"code": "unknown", "message": "x"}});
        assert!(serde_json::from_value::<ToolResult>(raw).is_err());
    }

    #[test]
    fn test_deserialize_string_error() {
        let raw = json!({"success": false, "error": "Extension not connected"});
        let result: ToolResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.error().unwrap().message, "Extension not connected");
    }

    #[test]
    fn test_combinators() {
        let doubled = ToolResult::ok(2).map(|n| n * 2);
        assert_eq!(doubled.data(), Some(&4));

        let chained = ToolResult::ok(2)
            .with_duration(10)
            .and_then(|n| ToolResult::ok(n + 1));
        assert_eq!(chained.data(), Some(&3));
        assert_eq!(chained.duration_ms(), 10);

        let failed: ToolResult<i32> = ToolResult::fail(ToolError::unknown("x"));
        let short = failed.clone().and_then(|n| ToolResult::ok(n + 1));
        assert!(short.is_error());

        let recovered = failed.recover(|e| e.message.len() as i32);
        assert!(recovered.is_success());
        assert_eq!(recovered.unwrap_or(0), 1);
    }

    #[test]
    fn test_meta_helpers() {
        let first: ToolResult = ToolResult::ok(Value::Null).with_duration(40);
        let second: ToolResult = ToolResult::ok(Value::Null)
            .with_duration(60)
            .with_tool_info("chrome_navigate", Some(7))
            .with_attempt(2)
            .merge_duration(&first);

        let meta = second.meta().unwrap();
        assert_eq!(meta.duration_ms, 100);
        assert_eq!(meta.tool_name.as_deref(), Some("chrome_navigate"));
        assert_eq!(meta.tab_id, Some(7));
        assert_eq!(meta.attempt, 2);
    }
}
