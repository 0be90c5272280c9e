//! MCP server facade for crash dump analysis.
//!
//! Maps inbound tool calls onto the dump/kernel catalogs and the session
//! engine, and renders every outcome as text. Engine failures become
//! `is_error` tool results; the transport layer never sees them.

mod requests;

pub use requests::*;

use crate::config::Config;
use crate::discovery::DumpCatalog;
use crate::error::ToolError;
use crate::kernels::KernelCatalog;
use crate::session::{SessionEngine, SessionInfo};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Dumps and kernels included in a get_crash_info snapshot.
const INFO_PREVIEW_LIMIT: usize = 5;
/// Default cap for list_crash_dumps.
const DEFAULT_LIST_LIMIT: usize = 10;

/// MCP server for crash dump analysis.
#[derive(Clone)]
pub struct CrashMcpServer {
    engine: Arc<SessionEngine>,
    dumps: Arc<DumpCatalog>,
    kernels: Arc<KernelCatalog>,
    tool_router: ToolRouter<Self>,
}

impl CrashMcpServer {
    pub fn new(engine: Arc<SessionEngine>, config: &Config) -> Self {
        Self::with_catalogs(
            engine,
            DumpCatalog::new(config.crash_dump_path.clone(), config.max_crash_dumps),
            KernelCatalog::new(&config.kernel_path),
        )
    }

    /// Build a server over explicit catalogs.
    pub fn with_catalogs(
        engine: Arc<SessionEngine>,
        dumps: DumpCatalog,
        kernels: KernelCatalog,
    ) -> Self {
        Self {
            engine,
            dumps: Arc::new(dumps),
            kernels: Arc::new(kernels),
            tool_router: Self::tool_router(),
        }
    }

    /// Resolve a dump, validate it, match a kernel, and start the engine.
    /// Shared by start_crash_session and the implicit auto-start in
    /// crash_command. Replacement semantics live here: the engine itself
    /// refuses to replace an active session, so any existing one is closed
    /// first.
    async fn start_session_inner(
        &self,
        dump_name: Option<&str>,
        timeout: Option<u64>,
    ) -> Result<SessionInfo, ToolError> {
        let dump = match dump_name {
            Some(name) => self
                .dumps
                .get_by_name(name)
                .ok_or_else(|| ToolError::DumpNotFound(name.to_string()))?,
            None => self.dumps.get_latest().ok_or_else(|| {
                ToolError::NoDumpsFound(self.dumps.root().display().to_string())
            })?,
        };

        if !self.dumps.is_valid(&dump) {
            return Err(ToolError::InvalidDump(dump.name.clone()));
        }

        let kernel = self
            .kernels
            .find_matching_kernel(&dump)
            .ok_or(ToolError::NoKernelAvailable)?;

        if self.engine.is_active() {
            self.engine.close().await;
        }
        self.engine.start(&dump, &kernel, timeout).await
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

// Tool implementations using the #[tool_router] attribute

#[tool_router]
impl CrashMcpServer {
    #[tool(
        description = "Start a new crash analysis session. Resolves a dump (by name, or the \
        most recent one), pairs it with a matching kernel symbol file, and launches the crash \
        utility against the pair. Any already-active session is closed first. \
        NOTE: Initializing a multi-gigabyte dump can take minutes; raise timeout if needed."
    )]
    #[instrument(skip(self))]
    async fn start_crash_session(
        &self,
        Parameters(req): Parameters<StartSessionRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: start_crash_session");
        match self
            .start_session_inner(req.dump_name.as_deref(), req.timeout)
            .await
        {
            Ok(info) => {
                let value = json!({
                    "session_id": info.session_id,
                    "dump": {"name": info.dump_name, "path": info.dump_path},
                    "kernel": {
                        "name": info.kernel_name,
                        "path": info.kernel_path,
                        "version": info.kernel_version,
                    },
                });
                Ok(CallToolResult::success(vec![Content::text(pretty(&value))]))
            }
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(
        description = "Execute a command in the crash utility session (e.g. 'bt', 'ps', 'log', \
        'sys', 'mount', 'files'). If no session is active, one is started automatically against \
        the most recent dump. Output is the raw text the crash utility produced."
    )]
    #[instrument(skip(self), fields(command = %req.command))]
    async fn crash_command(
        &self,
        Parameters(req): Parameters<CrashCommandRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: crash_command");
        if !self.engine.is_active() {
            if let Err(e) = self.start_session_inner(None, None).await {
                warn!(error = %e, "Implicit session start failed");
                return Ok(CallToolResult {
                    content: vec![Content::text(format!(
                        "No active crash session and could not start one: {e}"
                    ))],
                    is_error: Some(true),
                    meta: None,
                    structured_content: None,
                });
            }
        }

        match self.engine.execute(&req.command, req.timeout).await {
            Ok(result) if result.exit_code == 0 => {
                let text = if result.output.is_empty() {
                    "Command executed successfully (no output)".to_string()
                } else {
                    result.output
                };
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Ok(result) => {
                // The engine reported a command-level error; the session
                // stays usable, so relay the text rather than flagging a
                // tool failure.
                let text = format!(
                    "Command failed (exit code {})\nOutput: {}\nError: {}",
                    result.exit_code, result.output, result.error
                );
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "Close the current crash session. Safe to call when none is active.")]
    #[instrument(skip(self))]
    async fn close_crash_session(&self) -> Result<CallToolResult, McpError> {
        debug!("Tool call: close_crash_session");
        let was_active = self.engine.is_active();
        self.engine.close().await;
        let text = if was_active {
            "Crash session closed"
        } else {
            "No active crash session to close"
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(
        description = "Get information about the current crash session plus the most recent \
        dumps and available kernels. Read-only; starts nothing."
    )]
    #[instrument(skip(self))]
    async fn get_crash_info(&self) -> Result<CallToolResult, McpError> {
        debug!("Tool call: get_crash_info");
        let session = match self.engine.get_info() {
            Some(info) => serde_json::to_value(&info).unwrap_or_else(|_| json!({"active": true})),
            None => json!({"active": false}),
        };
        let dumps: Vec<Value> = self
            .dumps
            .find_crash_dumps()
            .iter()
            .take(INFO_PREVIEW_LIMIT)
            .map(|d| d.to_value())
            .collect();
        let kernels: Vec<Value> = self
            .kernels
            .find_kernel_files()
            .iter()
            .take(INFO_PREVIEW_LIMIT)
            .map(|k| k.to_value())
            .collect();

        let value = json!({
            "session": session,
            "available_dumps": dumps,
            "available_kernels": kernels,
        });
        Ok(CallToolResult::success(vec![Content::text(pretty(&value))]))
    }

    #[tool(description = "List available crash dumps, most recently modified first.")]
    #[instrument(skip(self))]
    async fn list_crash_dumps(
        &self,
        Parameters(req): Parameters<ListDumpsRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: list_crash_dumps");
        let mut dumps = self.dumps.find_crash_dumps();
        if dumps.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(
                "No crash dumps found",
            )]));
        }
        dumps.truncate(req.max_dumps.unwrap_or(DEFAULT_LIST_LIMIT));

        let mut output = format!("Found {} crash dumps:\n\n", dumps.len());
        for (i, dump) in dumps.iter().enumerate() {
            let _ = writeln!(output, "{}. {}", i + 1, dump.name);
            let _ = writeln!(output, "   Path: {}", dump.path.display());
            let _ = writeln!(output, "   Size: {} bytes", dump.size);
            let _ = writeln!(output, "   Modified: {}\n", dump.modified.to_rfc3339());
        }
        Ok(CallToolResult::success(vec![Content::text(output)]))
    }
}

#[tool_handler]
impl ServerHandler for CrashMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Post-mortem Linux kernel crash analysis over the crash utility. \
                 \n\nWorkflow: \
                 \n1. list_crash_dumps: See which crash dumps exist on this host \
                 \n2. start_crash_session: Open a session against a dump (latest by default). \
                 Initializing a large dump can take minutes. \
                 \n3. crash_command: Run crash commands ('bt' for backtraces, 'ps' for \
                 processes, 'log' for the kernel ring buffer, 'sys' for a system overview) \
                 \n4. close_crash_session: Release the session when done \
                 \n\nget_crash_info reports the session state plus discovered dumps/kernels. \
                 \ncrash_command auto-starts a session with the latest dump if none is active."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
