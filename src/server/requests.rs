//! MCP tool request types.
//!
//! These structs define the parameters for each MCP tool exposed by the server.

use rmcp::schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CrashCommandRequest {
    #[schemars(description = "The crash command to execute (e.g. 'bt', 'ps', 'log', 'sys')")]
    pub command: String,
    #[schemars(
        description = "Command timeout in seconds (optional, default 120s; commands walking large dumps can be slow)"
    )]
    #[serde(alias = "timeout_secs")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartSessionRequest {
    #[schemars(
        description = "Name of the crash dump file (optional, uses the most recent dump if not specified)"
    )]
    #[serde(alias = "dump", alias = "name")]
    pub dump_name: Option<String>,
    #[schemars(
        description = "Session startup timeout in seconds (optional, default 180s; multi-gigabyte dumps take minutes to index)"
    )]
    #[serde(alias = "timeout_secs")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListDumpsRequest {
    #[schemars(description = "Maximum number of dumps to return (optional, default 10)")]
    #[serde(alias = "max", alias = "limit")]
    pub max_dumps: Option<usize>,
}
