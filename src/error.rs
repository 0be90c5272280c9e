//! Error types for the crash MCP server.
//!
//! Tool execution errors are returned with `is_error: true` in CallToolResult,
//! while protocol errors (invalid tool name, malformed args) are handled by rmcp.

use rmcp::model::{CallToolResult, Content};
use thiserror::Error;

/// Tool execution errors - returned with is_error: true in CallToolResult
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("No active crash session")]
    NoActiveSession,

    #[error("A crash session is already active for dump {0}. Use close_crash_session first.")]
    SessionAlreadyActive(String),

    #[error("Another session operation is in progress")]
    SessionBusy,

    #[error("Crash session startup timed out after {0} seconds")]
    StartupTimeout(u64),

    #[error("Command '{command}' timed out after {seconds} seconds")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("Crash engine reported an error: {0}")]
    EngineReportedError(String),

    #[error("Crash process terminated unexpectedly")]
    UnexpectedExit,

    #[error("Failed to start crash process: {0}")]
    SpawnFailed(String),

    #[error("Invalid crash dump: {0}")]
    InvalidDump(String),

    #[error("No kernel files found for crash analysis")]
    NoKernelAvailable,

    #[error("Crash dump not found: {0}")]
    DumpNotFound(String),

    #[error("No crash dumps found in {0}")]
    NoDumpsFound(String),
}

impl ToolError {
    /// Convert to MCP CallToolResult with is_error: true
    pub fn to_tool_result(&self) -> CallToolResult {
        CallToolResult {
            content: vec![Content::text(self.to_string())],
            is_error: Some(true),
            meta: None,
            structured_content: None,
        }
    }
}
