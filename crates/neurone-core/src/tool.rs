//! Tool - Validation and bounded retry around a single remote call
//!
//! A tool validates its parameters against a declared JSON Schema before
//! anything touches the transport, then runs up to `retry_count` attempts
//! with a fixed delay. Only errors flagged `recoverable` are retried.

use crate::context::ExecutionContext;
use crate::result::{ToolError, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

/// Tool metadata and parameter schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name forwarded to the agent
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a definition that accepts any object
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({ "type": "object" }),
        }
    }

    /// Set the parameters schema
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Outcome of parameter validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the parameters are acceptable
    pub valid: bool,
    /// Violations
    #[serde(default)]
    pub errors: Vec<String>,
    /// Non-fatal remarks
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Passing validation
    #[must_use]
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Failing validation
    #[must_use]
    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
            warnings: Vec::new(),
        }
    }

    /// Attach a warning
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Validate `params` against a JSON Schema
#[must_use]
pub fn validate_against_schema(schema: &Value, params: &Value) -> ValidationResult {
    let validator = match jsonschema::Validator::new(schema) {
        Ok(v) => v,
        Err(e) => return ValidationResult::invalid(vec![format!("invalid parameter schema: {e}")]),
    };
    if validator.is_valid(params) {
        return ValidationResult::ok();
    }
    ValidationResult::invalid(validator.iter_errors(params).map(|e| e.to_string()).collect())
}

/// A remotely executed operation
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition
    fn definition(&self) -> &ToolDefinition;

    /// Run a single attempt
    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> ToolResult;

    /// Check parameters against the declared schema
    fn validate_params(&self, params: &Value) -> ValidationResult {
        validate_against_schema(&self.definition().parameters, params)
    }

    /// Validate, then run one attempt.
    ///
    /// Invalid parameters short-circuit to a `validation_error` result and
    /// `execute` is never called.
    async fn execute_with_validation(&self, params: Value, ctx: &ExecutionContext) -> ToolResult {
        let name = self.definition().name.as_str();
        let validation = self.validate_params(&params);
        if !validation.valid {
            warn!(tool = %name, errors = ?validation.errors, "Parameter validation failed");
            return ToolResult::fail(ToolError::validation(validation.errors))
                .with_tool_info(name, ctx.tab_id);
        }

        let started = Instant::now();
        let result = self.execute(params, ctx).await.with_tool_info(name, ctx.tab_id);
        if result.duration_ms() == 0 {
            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            result.with_duration(elapsed)
        } else {
            result
        }
    }

    /// Run up to `ctx.retry_count` attempts with a fixed `ctx.retry_delay_ms`
    /// pause between them.
    ///
    /// Success and non-recoverable failures return at once with
    /// `meta.attempt` set. After the last attempt the final error is
    /// returned with `meta.attempt = retry_count` and
    /// `duration_ms = retry_count * retry_delay_ms`.
    async fn execute_with_retry(&self, params: Value, ctx: &ExecutionContext) -> ToolResult {
        let name = self.definition().name.clone();
        let attempts = ctx.retry_count.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = self.execute_with_validation(params.clone(), ctx).await;
            let recoverable = match result.error() {
                None => {
                    debug!(tool = %name, attempt, "Tool succeeded");
                    return result.with_attempt(attempt);
                }
                Some(error) => error.recoverable,
            };

            if !recoverable {
                debug!(tool = %name, attempt, "Non-recoverable failure, giving up");
                return result.with_attempt(attempt);
            }

            if let Some(error) = result.error() {
                warn!(
                    tool = %name,
                    attempt,
                    max_attempts = attempts,
                    error = %error,
                    "Recoverable failure"
                );
            }
            last_error = result.into_result().err();

            if attempt < attempts {
                tokio::time::sleep(ctx.retry_delay()).await;
            }
        }

        let error = last_error
            .unwrap_or_else(|| ToolError::unknown("retry loop ended without an error"));
        ToolResult::fail(error)
            .with_tool_info(&name, ctx.tab_id)
            .with_attempt(attempts)
            .with_duration(u64::from(attempts) * ctx.retry_delay_ms)
    }
}

/// A tool executed by the agent, reached through the context's transport
#[derive(Debug, Clone)]
pub struct RemoteTool {
    definition: ToolDefinition,
}

impl RemoteTool {
    /// Wrap a definition
    #[must_use]
    pub fn new(definition: ToolDefinition) -> Self {
        Self { definition }
    }

    /// Remote tool accepting any object
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(ToolDefinition::new(name, ""))
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> ToolResult {
        let Some(transport) = ctx.transport() else {
            return ToolResult::fail(ToolError::connection(format!(
                "no transport configured for tool '{}'",
                self.definition.name
            )));
        };
        transport
            .call_tool(&self.definition.name, params, ctx.timeout())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ErrorCode;
    use crate::transport::MockToolTransport;
    use serde_json::json;
    use std::sync::Arc;

    fn click_definition() -> ToolDefinition {
        ToolDefinition::new("chrome_click", "Click an element").with_parameters(json!({
            "type": "object",
            "properties": { "selector": { "type": "string" } },
            "required": ["selector"]
        }))
    }

    fn recoverable() -> ToolError {
        ToolError::connection("agent busy")
    }

    #[test]
    fn test_schema_validation() {
        let def = click_definition();
        assert!(validate_against_schema(&def.parameters, &json!({"selector": "#a"})).valid);

        let result = validate_against_schema(&def.parameters, &json!({"selector": 1}));
        assert!(!result.valid);
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn test_invalid_schema_is_reported() {
        let result = validate_against_schema(&json!({"type": 12}), &json!({}));
        assert!(!result.valid);
        assert!(result.errors[0].contains("invalid parameter schema"));
    }

    #[tokio::test]
    async fn test_validation_failure_makes_no_transport_call() {
        let mut transport = MockToolTransport::new();
        transport.expect_call_tool().times(0);

        let ctx = ExecutionContext::new()
            .with_transport(Arc::new(transport))
            .with_retry(3, 10);
        let tool = RemoteTool::new(click_definition());

        let result = tool.execute_with_retry(json!({}), &ctx).await;
        let error = result.error().unwrap();
        assert_eq!(error.code, ErrorCode::ValidationError);
        assert_eq!(error.message, "parameter validation failed");
        assert!(!error.recoverable);
        assert_eq!(result.meta().unwrap().attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let mut transport = MockToolTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_call_tool()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _, _| ToolResult::fail(recoverable()));
        transport
            .expect_call_tool()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| ToolResult::ok(json!({"clicked": true})));

        let ctx = ExecutionContext::new()
            .with_transport(Arc::new(transport))
            .with_retry(3, 1_000);
        let tool = RemoteTool::new(click_definition());

        let result = tool.execute_with_retry(json!({"selector": "#a"}), &ctx).await;
        assert!(result.is_success());
        assert_eq!(result.data(), Some(&json!({"clicked": true})));
        assert_eq!(result.meta().unwrap().attempt, 3);
    }

    #[tokio::test]
    async fn test_non_recoverable_returns_immediately() {
        let mut transport = MockToolTransport::new();
        transport
            .expect_call_tool()
            .times(1)
            .returning(|_, _, _| ToolResult::fail(ToolError::execution_failed("boom")));

        let ctx = ExecutionContext::new()
            .with_transport(Arc::new(transport))
            .with_retry(3, 1_000);
        let tool = RemoteTool::named("chrome_click");

        let result = tool.execute_with_retry(json!({"selector": "#a"}), &ctx).await;
        assert_eq!(result.error().unwrap().message, "boom");
        assert_eq!(result.meta().unwrap().attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_last_error() {
        let mut transport = MockToolTransport::new();
        let mut calls = 0;
        transport.expect_call_tool().times(3).returning(move |_, _, _| {
            calls += 1;
            ToolResult::fail(ToolError::connection(format!("attempt {calls}")))
        });

        let ctx = ExecutionContext::new()
            .with_transport(Arc::new(transport))
            .with_retry(3, 500);
        let tool = RemoteTool::named("chrome_click");

        let started = tokio::time::Instant::now();
        let result = tool.execute_with_retry(json!({}), &ctx).await;
        let waited = started.elapsed();
        assert!(waited >= std::time::Duration::from_millis(1_000));
        assert!(waited < std::time::Duration::from_millis(1_500));

        let meta = result.meta().unwrap();
        assert_eq!(result.error().unwrap().message, "attempt 3");
        assert_eq!(meta.attempt, 3);
        assert_eq!(meta.duration_ms, 1_500);
        assert_eq!(meta.tool_name.as_deref(), Some("chrome_click"));
    }

    #[tokio::test]
    async fn test_missing_transport_is_connection_error() {
        let tool = RemoteTool::named("chrome_click");
        let result = tool
            .execute_with_validation(json!({}), &ExecutionContext::new())
            .await;
        assert_eq!(result.error().unwrap().code, ErrorCode::ConnectionError);
    }
}
