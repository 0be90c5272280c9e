//! Interactive crash session engine.
//!
//! Owns the lifecycle of exactly one crash subprocess: spawn with a
//! dump+kernel pair, detect the prompt on the combined output stream,
//! execute commands under per-command timeouts, and tear the process down.
//!
//! State machine: `Closed → Starting → Active → Closed`. Only `start`,
//! `close`, and an unexpected subprocess exit change state; a failed or
//! timed-out command does not.

mod engine;
mod expect;
mod types;

pub use engine::{CommandOutput, SessionEngine};
pub use expect::PROMPT_PATTERNS;
pub use types::{SessionInfo, SessionState};
