//! Neurone Core - Result model, wire protocol and tool execution framework
//!
//! This crate holds everything the relay, the controller client and the
//! tool layer agree on:
//! - Result: tagged success/failure container with structured error codes
//! - Protocol: JSON frames exchanged with the agent and with controllers
//! - Context: per-call execution settings and scoped variables
//! - Tool: parameter validation and bounded retry around a remote call
//! - Registry: named tool lookup

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod result;
pub mod tool;
pub mod transport;

pub use context::{ExecutionContext, ExecutionState, VariableScope, World};
pub use error::{Error, Result};
pub use registry::ToolRegistry;
pub use result::{Diagnostics, ErrorCode, ResultMeta, ToolError, ToolResult};
pub use tool::{validate_against_schema, RemoteTool, Tool, ToolDefinition, ValidationResult};
pub use transport::ToolTransport;
