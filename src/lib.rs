//! Crash MCP Server
//!
//! This library provides an MCP (Model Context Protocol) server for
//! post-mortem Linux kernel crash analysis. It lets an LLM agent discover
//! crash dumps on a host, pair each with a matching kernel symbol file, and
//! drive an interactive session against the external `crash(8)` utility.
//!
//! # Architecture
//!
//! - **[`discovery::DumpCatalog`]**: scans the configured dump directory,
//!   orders candidates by recency, and validates them.
//!
//! - **[`kernels::KernelCatalog`]**: scans debug-symbol directories and the
//!   kernel directory for vmlinux/vmlinuz files, deduplicated by version.
//!
//! - **[`session::SessionEngine`]**: owns the lifecycle of exactly one
//!   crash subprocess. The crash utility speaks no structured protocol, so
//!   the engine detects readiness by matching prompt/error patterns against
//!   the subprocess's combined output stream, with per-command timeouts.
//!
//! - **[`server::CrashMcpServer`]**: the MCP facade. Uses the `rmcp` crate
//!   for protocol handling over stdio or Streamable HTTP.
//!
//! # Tools
//!
//! - `start_crash_session`: Open a session against a dump (latest by default)
//! - `crash_command`: Execute a crash command in the active session
//! - `close_crash_session`: Close the active session
//! - `get_crash_info`: Session state plus discovered dumps and kernels
//! - `list_crash_dumps`: List candidate dumps, newest first
//!
//! Session state lives only in process memory; catalogs are recomputed from
//! the filesystem on every call.

pub mod config;
pub mod discovery;
pub mod error;
pub mod kernels;
pub mod server;
pub mod session;

pub use config::Config;
pub use discovery::{CrashDump, DumpCatalog};
pub use error::ToolError;
pub use kernels::{KernelCatalog, KernelFile};
pub use server::CrashMcpServer;
pub use session::{CommandOutput, SessionEngine, SessionInfo, SessionState};
