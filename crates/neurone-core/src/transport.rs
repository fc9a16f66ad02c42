//! Transport seam between the tool framework and the relay

use crate::result::ToolResult;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Something that can forward a named tool call to the agent.
///
/// Implementations fold every failure into a failed [`ToolResult`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Forward `name(args)` and wait up to `timeout` for the reply
    async fn call_tool(&self, name: &str, args: Value, timeout: Duration) -> ToolResult;
}
