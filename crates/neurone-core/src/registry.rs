//! Registry - Named tool lookup
//!
//! Callers that only know a tool by name go through the registry so an
//! unknown name becomes a `tool_not_found` result instead of a panic.

use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::result::{ToolError, ToolResult};
use crate::tool::{Tool, ToolDefinition};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Registry for managing tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names must be unique
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.definition().name.clone();
        if self.tools.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }
        debug!(tool = %name, "Registering tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Remove a tool
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    /// Get a tool by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Check if a tool exists
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted tool names
    #[must_use]
    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// All tool definitions
    #[must_use]
    pub fn list_definitions(&self) -> Vec<&ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Get tool count
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool by name through its retry loop
    pub async fn execute(&self, name: &str, params: Value, ctx: &ExecutionContext) -> ToolResult {
        match self.get(name) {
            Some(tool) => tool.execute_with_retry(params, ctx).await,
            None => ToolResult::fail(ToolError::tool_not_found(name)).with_tool_info(name, ctx.tab_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ErrorCode;
    use crate::tool::RemoteTool;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_registry_register_and_list() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());

        assert_ok!(registry.register(Arc::new(RemoteTool::named("chrome_navigate"))));
        assert_ok!(registry.register(Arc::new(RemoteTool::named("chrome_click"))));

        assert_eq!(registry.len(), 2);
        assert!(registry.has("chrome_click"));
        assert_eq!(registry.list_names(), vec!["chrome_click", "chrome_navigate"]);
        assert_eq!(registry.list_definitions().len(), 2);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        assert_ok!(registry.register(Arc::new(RemoteTool::named("chrome_click"))));
        let err = assert_err!(registry.register(Arc::new(RemoteTool::named("chrome_click"))));
        assert!(matches!(err, Error::DuplicateTool(name) if name == "chrome_click"));

        assert!(registry.unregister("chrome_click").is_some());
        assert!(!registry.has("chrome_click"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute("chrome_fly", json!({}), &ExecutionContext::new())
            .await;

        let error = result.error().unwrap();
        assert_eq!(error.code, ErrorCode::ToolNotFound);
        assert!(!error.recoverable);
        assert_eq!(result.meta().unwrap().tool_name.as_deref(), Some("chrome_fly"));
    }
}
