//! Execution context
//!
//! Per-call configuration handed to every tool: timeout, retry policy,
//! scoped variables and the transport used to reach the agent.

use crate::error::{Error, Result};
use crate::transport::ToolTransport;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default per-call timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Default number of attempts
pub const DEFAULT_RETRY_COUNT: u32 = 1;
/// Default delay between attempts in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// JavaScript world a script runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum World {
    /// Page world, shares globals with the page
    #[default]
    Main,
    /// Extension-isolated world
    Isolated,
}

/// Lifecycle of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Not started
    #[default]
    Idle,
    /// A tool is executing
    Running,
    /// Suspended by the caller
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with a failure
    Failed,
    /// Stopped by the caller
    Cancelled,
}

impl ExecutionState {
    /// Whether no further transitions are expected
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Chain of variable scopes, innermost last.
///
/// Lookups walk outward; `set` updates the nearest scope that already
/// holds the name and otherwise writes to the innermost one.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableScope {
    scopes: Vec<HashMap<String, Value>>,
}

impl Default for VariableScope {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableScope {
    /// Create a chain with a single root scope
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    /// Look a variable up, innermost scope first
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Assign to the nearest scope holding `name`, else the innermost
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let target = self
            .scopes
            .iter_mut()
            .rev()
            .position(|scope| scope.contains_key(&name));
        let len = self.scopes.len();
        let index = target.map_or(len - 1, |from_end| len - 1 - from_end);
        self.scopes[index].insert(name, value);
    }

    /// Declare in the innermost scope, shadowing outer ones
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    /// Whether any scope holds `name`
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove from the nearest scope holding `name`
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.remove(name))
    }

    /// Open a child scope
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Close the innermost scope and return its variables
    pub fn pop_scope(&mut self) -> Result<HashMap<String, Value>> {
        if self.scopes.len() <= 1 {
            return Err(Error::RootScope);
        }
        Ok(self.scopes.pop().unwrap_or_default())
    }

    /// Number of open scopes, root included
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Flattened view, inner scopes overriding outer ones
    #[must_use]
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for scope in &self.scopes {
            for (name, value) in scope {
                merged.insert(name.clone(), value.clone());
            }
        }
        merged
    }

    /// Copy every entry of `values` into the innermost scope
    pub fn merge(&mut self, values: &Map<String, Value>) {
        for (name, value) in values {
            self.define(name.clone(), value.clone());
        }
    }
}

/// Per-call execution settings
#[derive(Clone)]
pub struct ExecutionContext {
    /// Target browser tab
    pub tab_id: Option<i64>,
    /// Script world
    pub world: World,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum number of attempts, at least 1
    pub retry_count: u32,
    /// Fixed delay between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Free-form metadata
    pub metadata: Map<String, Value>,
    variables: VariableScope,
    state: ExecutionState,
    transport: Option<Arc<dyn ToolTransport>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("tab_id", &self.tab_id)
            .field("world", &self.world)
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_count", &self.retry_count)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("state", &self.state)
            .field("has_transport", &self.transport.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Context with default settings and no transport
    #[must_use]
    pub fn new() -> Self {
        Self {
            tab_id: None,
            world: World::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            metadata: Map::new(),
            variables: VariableScope::new(),
            state: ExecutionState::Idle,
            transport: None,
        }
    }

    /// Set the transport
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn ToolTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry_count: u32, retry_delay_ms: u64) -> Self {
        self.retry_count = retry_count.max(1);
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Set the target tab
    #[must_use]
    pub fn with_tab(mut self, tab_id: i64) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    /// Set the script world
    #[must_use]
    pub fn with_world(mut self, world: World) -> Self {
        self.world = world;
        self
    }

    /// Transport used to reach the agent
    #[must_use]
    pub fn transport(&self) -> Option<&Arc<dyn ToolTransport>> {
        self.transport.as_ref()
    }

    /// Timeout as a `Duration`
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay between attempts as a `Duration`
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Scoped variables
    #[must_use]
    pub fn variables(&self) -> &VariableScope {
        &self.variables
    }

    /// Mutable scoped variables
    pub fn variables_mut(&mut self) -> &mut VariableScope {
        &mut self.variables
    }

    /// Shorthand for `variables().get`
    #[must_use]
    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Shorthand for `variables_mut().set`
    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.variables.set(name, value);
    }

    /// Open a child variable scope
    pub fn push_scope(&mut self) {
        self.variables.push_scope();
    }

    /// Close the innermost variable scope
    pub fn pop_scope(&mut self) -> Result<HashMap<String, Value>> {
        self.variables.pop_scope()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Move to a new lifecycle state
    pub fn set_state(&mut self, state: ExecutionState) {
        self.state = state;
    }

    /// Child context sharing settings and transport, with a fresh inner
    /// scope over a copy of the current variables
    #[must_use]
    pub fn fork(&self) -> Self {
        let mut child = self.clone();
        child.variables.push_scope();
        child.state = ExecutionState::Idle;
        child
    }
}
