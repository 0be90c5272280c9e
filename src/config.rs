//! Server configuration and system requirement checks.
//!
//! All settings come from environment variables so the server can be
//! configured from an MCP client manifest without a config file.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

/// Default directory scanned for crash dumps.
pub const DEFAULT_CRASH_DUMP_PATH: &str = "/var/crash";
/// Default directory scanned for kernel files.
pub const DEFAULT_KERNEL_PATH: &str = "/boot";
/// Default name of the crash utility binary.
pub const DEFAULT_CRASH_BINARY: &str = "crash";
/// Default per-command timeout in seconds.
pub const DEFAULT_CRASH_TIMEOUT_SECS: u64 = 120;
/// Default session startup timeout in seconds. Large dumps can take
/// several minutes to index, so this is deliberately generous.
pub const DEFAULT_SESSION_INIT_TIMEOUT_SECS: u64 = 180;
/// Default cap on the number of dumps returned by a scan.
pub const DEFAULT_MAX_CRASH_DUMPS: usize = 10;

/// Timeout for probing `crash --version`.
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory scanned for crash dumps (`CRASH_DUMP_PATH`).
    pub crash_dump_path: PathBuf,
    /// Directory scanned for kernel files (`KERNEL_PATH`).
    pub kernel_path: PathBuf,
    /// Crash utility binary name or path (`CRASH_BINARY`).
    pub crash_binary: String,
    /// Per-command timeout in seconds (`CRASH_TIMEOUT`).
    pub crash_timeout_secs: u64,
    /// Session startup timeout in seconds (`SESSION_INIT_TIMEOUT`).
    pub session_init_timeout_secs: u64,
    /// Maximum dumps returned by a scan (`MAX_CRASH_DUMPS`).
    pub max_crash_dumps: usize,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or malformed.
    pub fn from_env() -> Self {
        Self {
            crash_dump_path: PathBuf::from(
                std::env::var("CRASH_DUMP_PATH")
                    .unwrap_or_else(|_| DEFAULT_CRASH_DUMP_PATH.to_string()),
            ),
            kernel_path: PathBuf::from(
                std::env::var("KERNEL_PATH").unwrap_or_else(|_| DEFAULT_KERNEL_PATH.to_string()),
            ),
            crash_binary: std::env::var("CRASH_BINARY")
                .unwrap_or_else(|_| DEFAULT_CRASH_BINARY.to_string()),
            crash_timeout_secs: env_parse("CRASH_TIMEOUT", DEFAULT_CRASH_TIMEOUT_SECS),
            session_init_timeout_secs: env_parse(
                "SESSION_INIT_TIMEOUT",
                DEFAULT_SESSION_INIT_TIMEOUT_SECS,
            ),
            max_crash_dumps: env_parse("MAX_CRASH_DUMPS", DEFAULT_MAX_CRASH_DUMPS),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crash_dump_path: PathBuf::from(DEFAULT_CRASH_DUMP_PATH),
            kernel_path: PathBuf::from(DEFAULT_KERNEL_PATH),
            crash_binary: DEFAULT_CRASH_BINARY.to_string(),
            crash_timeout_secs: DEFAULT_CRASH_TIMEOUT_SECS,
            session_init_timeout_secs: DEFAULT_SESSION_INIT_TIMEOUT_SECS,
            max_crash_dumps: DEFAULT_MAX_CRASH_DUMPS,
        }
    }
}

/// Parse an env var, logging and falling back to `default` on garbage.
fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: std::str::FromStr + Copy>(key: &str, raw: &str, default: T) -> T {
    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(key, value = raw, "Invalid value, using default");
            default
        }
    }
}

/// Result of probing the host for crash-analysis prerequisites.
#[derive(Debug, Clone, Serialize)]
pub struct SystemRequirements {
    /// The crash utility responds to `--version`.
    pub crash_utility: bool,
    /// The crash dump directory exists.
    pub crash_dump_access: bool,
    /// The kernel directory exists.
    pub kernel_access: bool,
    /// Running with effective uid 0.
    pub root_access: bool,
}

/// Probe the host for crash-analysis prerequisites. Failures here are
/// reported, not fatal: the server still runs with reduced capability.
pub async fn check_system_requirements(config: &Config) -> SystemRequirements {
    SystemRequirements {
        crash_utility: validate_crash_utility(&config.crash_binary)
            .await
            .is_some(),
        crash_dump_access: dir_accessible(&config.crash_dump_path),
        kernel_access: dir_accessible(&config.kernel_path),
        root_access: is_root(),
    }
}

/// Probe the crash utility and return its version banner, or `None` if
/// it is missing, hangs, or exits non-zero.
pub async fn validate_crash_utility(binary: &str) -> Option<String> {
    let probe = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(VERSION_PROBE_TIMEOUT, probe).await {
        Ok(Ok(out)) if out.status.success() => {
            Some(String::from_utf8_lossy(&out.stdout).trim().to_string())
        }
        _ => None,
    }
}

fn dir_accessible(path: &Path) -> bool {
    path.is_dir()
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}
