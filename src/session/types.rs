//! Session state and info types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the crash session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session; the initial and terminal state.
    Closed,
    /// Subprocess spawned, waiting for the first prompt.
    Starting,
    /// Prompt seen; commands are accepted.
    Active,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Closed => write!(f, "closed"),
            SessionState::Starting => write!(f, "starting"),
            SessionState::Active => write!(f, "active"),
        }
    }
}

/// Snapshot of the session for API responses. Cloneable, no process handle.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub session_id: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Name of the dump under analysis.
    pub dump_name: String,
    /// Path of the dump under analysis.
    pub dump_path: String,
    /// Name of the kernel file loaded.
    pub kernel_name: String,
    /// Path of the kernel file loaded.
    pub kernel_path: String,
    /// Extracted kernel version.
    pub kernel_version: String,
    /// When the session was started.
    pub started_at: DateTime<Utc>,
}
