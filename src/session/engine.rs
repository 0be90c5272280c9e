//! Crash session lifecycle: spawn, prompt wait, command execution, teardown.

use super::expect::{ExpectOutcome, OutputStream};
use super::types::{SessionInfo, SessionState};
use crate::config::Config;
use crate::discovery::CrashDump;
use crate::error::ToolError;
use crate::kernels::KernelFile;
use chrono::Utc;
use std::process::Stdio;
use std::sync::RwLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// How long a graceful `quit` gets before the process is killed.
const QUIT_GRACE: Duration = Duration::from_secs(5);

/// Result of one command execution. A non-zero `exit_code` means the
/// engine reported an error for the command; the session stays usable.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub output: String,
    pub error: String,
    pub exit_code: i32,
}

/// One live crash subprocess bound to a dump+kernel pair.
///
/// Owned exclusively by [`SessionEngine`]; the stdin/stdout pair is never
/// exposed beyond this module.
struct CrashSession {
    info: SessionInfo,
    child: Child,
    stdin: ChildStdin,
    stream: OutputStream,
}

impl CrashSession {
    /// Spawn the crash utility against the given dump and kernel. The
    /// `--no_scroll` flag disables the built-in pager so output is not
    /// gated by terminal height.
    fn spawn(binary: &str, dump: &CrashDump, kernel: &KernelFile) -> Result<Self, ToolError> {
        info!(
            binary,
            kernel = %kernel.path.display(),
            dump = %dump.path.display(),
            "Starting crash process"
        );

        let mut child = Command::new(binary)
            .arg("--no_scroll")
            .arg(&kernel.path)
            .arg(&dump.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::SpawnFailed(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::SpawnFailed("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::SpawnFailed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolError::SpawnFailed("stderr not captured".to_string()))?;

        let info = SessionInfo {
            session_id: format!("crash_{}", Utc::now().timestamp()),
            state: SessionState::Starting,
            dump_name: dump.name.clone(),
            dump_path: dump.path.display().to_string(),
            kernel_name: kernel.name.clone(),
            kernel_path: kernel.path.display().to_string(),
            kernel_version: kernel.version.clone(),
            started_at: Utc::now(),
        };

        Ok(Self {
            info,
            child,
            stdin,
            stream: OutputStream::new(stdout, stderr),
        })
    }

    /// Wait for the initial prompt. Consumes the startup banner; on any
    /// failure the subprocess is terminated before returning.
    async fn wait_ready(&mut self, timeout: Duration) -> Result<(), ToolError> {
        match self.stream.expect(timeout).await {
            ExpectOutcome::Prompt { .. } => {
                self.info.state = SessionState::Active;
                info!(session_id = %self.info.session_id, "Crash session started");
                Ok(())
            }
            ExpectOutcome::EngineError { error: text, .. } => {
                error!(error = %text, "Crash startup error");
                self.terminate().await;
                Err(ToolError::EngineReportedError(text))
            }
            ExpectOutcome::Timeout => {
                error!(timeout_secs = timeout.as_secs(), "Crash startup timed out");
                self.terminate().await;
                Err(ToolError::StartupTimeout(timeout.as_secs()))
            }
            ExpectOutcome::Eof { .. } => {
                error!("Crash process terminated during startup");
                self.terminate().await;
                Err(ToolError::UnexpectedExit)
            }
        }
    }

    /// Send one command line and wait for the next prompt.
    async fn execute(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, ToolError> {
        info!(command, "Executing crash command");

        let line = format!("{command}\n");
        if self.stdin.write_all(line.as_bytes()).await.is_err()
            || self.stdin.flush().await.is_err()
        {
            return Err(ToolError::UnexpectedExit);
        }

        match self.stream.expect(timeout).await {
            ExpectOutcome::Prompt { output } => Ok(CommandOutput {
                output: strip_command_echo(&output, command),
                error: String::new(),
                exit_code: 0,
            }),
            ExpectOutcome::EngineError { output, error: text } => Ok(CommandOutput {
                output: strip_command_echo(&output, command),
                error: text,
                exit_code: 1,
            }),
            ExpectOutcome::Timeout => Err(ToolError::CommandTimeout {
                command: command.to_string(),
                seconds: timeout.as_secs(),
            }),
            ExpectOutcome::Eof { .. } => Err(ToolError::UnexpectedExit),
        }
    }

    /// Graceful teardown: `quit`, bounded wait, then force-kill.
    async fn close(mut self) {
        let _ = self.stdin.write_all(b"quit\n").await;
        let _ = self.stdin.flush().await;
        match tokio::time::timeout(QUIT_GRACE, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(session_id = %self.info.session_id, "Crash process ignored quit, killing");
                let _ = self.child.kill().await;
            }
        }
    }

    /// Force-kill and reap the subprocess.
    async fn terminate(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// The command echoes back when the engine runs under a terminal; drop it.
fn strip_command_echo(output: &str, command: &str) -> String {
    let trimmed = match output.split_once('\n') {
        Some((first, rest)) if first.trim() == command.trim() => rest,
        _ => output,
    };
    trimmed.trim().to_string()
}

/// Owns the lifecycle of at most one crash subprocess.
///
/// One lock guards the single session-affecting operation in flight:
/// `start` and `execute` refuse with [`ToolError::SessionBusy`] rather than
/// queueing (interleaved writes would corrupt the line protocol), while
/// `close` waits for the in-flight operation — every operation is
/// deadline-bounded, so the wait is too, and shutdown cleanup must win.
/// Read accessors go through a separate snapshot and never block.
pub struct SessionEngine {
    crash_binary: String,
    command_timeout: Duration,
    startup_timeout: Duration,
    session: Mutex<Option<CrashSession>>,
    snapshot: RwLock<Option<SessionInfo>>,
}

impl SessionEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            crash_binary: config.crash_binary.clone(),
            command_timeout: Duration::from_secs(config.crash_timeout_secs),
            startup_timeout: Duration::from_secs(config.session_init_timeout_secs),
            session: Mutex::new(None),
            snapshot: RwLock::new(None),
        }
    }

    /// Start a session against `dump` + `kernel`. Fails with
    /// [`ToolError::SessionAlreadyActive`] if one exists; callers that want
    /// replacement semantics must close first.
    pub async fn start(
        &self,
        dump: &CrashDump,
        kernel: &KernelFile,
        timeout_secs: Option<u64>,
    ) -> Result<SessionInfo, ToolError> {
        let mut guard = self.session.try_lock().map_err(|_| ToolError::SessionBusy)?;
        if let Some(existing) = guard.as_ref() {
            return Err(ToolError::SessionAlreadyActive(
                existing.info.dump_name.clone(),
            ));
        }

        let timeout = timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.startup_timeout);

        let mut session = CrashSession::spawn(&self.crash_binary, dump, kernel)?;
        self.set_snapshot(Some(session.info.clone()));

        match session.wait_ready(timeout).await {
            Ok(()) => {
                let info = session.info.clone();
                self.set_snapshot(Some(info.clone()));
                *guard = Some(session);
                Ok(info)
            }
            Err(e) => {
                self.set_snapshot(None);
                Err(e)
            }
        }
    }

    /// Execute one command in the active session.
    pub async fn execute(
        &self,
        command: &str,
        timeout_secs: Option<u64>,
    ) -> Result<CommandOutput, ToolError> {
        let mut guard = self.session.try_lock().map_err(|_| ToolError::SessionBusy)?;
        let session = guard.as_mut().ok_or(ToolError::NoActiveSession)?;

        let timeout = timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.command_timeout);

        match session.execute(command, timeout).await {
            Err(ToolError::UnexpectedExit) => {
                error!("Crash process terminated unexpectedly");
                if let Some(mut dead) = guard.take() {
                    dead.terminate().await;
                }
                self.set_snapshot(None);
                Err(ToolError::UnexpectedExit)
            }
            other => other,
        }
    }

    /// Close the session if one exists. Idempotent; waits out any
    /// in-flight operation so shutdown cleanup always runs.
    pub async fn close(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            info!(session_id = %session.info.session_id, "Closing crash session");
            session.close().await;
        }
        self.set_snapshot(None);
    }

    /// Whether a session is currently active. Never blocks.
    pub fn is_active(&self) -> bool {
        matches!(
            self.read_snapshot().as_ref(),
            Some(info) if info.state == SessionState::Active
        )
    }

    /// Snapshot of the current session, if any. Never blocks.
    pub fn get_info(&self) -> Option<SessionInfo> {
        self.read_snapshot()
    }

    fn set_snapshot(&self, info: Option<SessionInfo>) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = info;
    }

    fn read_snapshot(&self) -> Option<SessionInfo> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    const STUB_ENGINE: &str = r#"#!/bin/sh
printf 'stub crash utility\ncrash> '
while IFS= read -r line; do
    case "$line" in
        quit) exit 0 ;;
        die) exit 3 ;;
        hang) sleep 30 ;;
        bad*) printf 'crash: %s: command not found\ncrash> ' "$line" ;;
        echoing) printf 'echoing\nresult line\ncrash> ' ;;
        *) printf 'ok %s\ncrash> ' "$line" ;;
    esac
done
"#;

    fn write_stub(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("fake-crash");
        std::fs::write(&path, contents).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fixture(dir: &Path) -> (CrashDump, KernelFile) {
        let dump_path = dir.join("vmcore-test");
        std::fs::write(&dump_path, b"dump").unwrap();
        let kernel_path = dir.join("vmlinux");
        std::fs::write(&kernel_path, b"kernel").unwrap();
        (
            CrashDump {
                name: "vmcore-test".to_string(),
                path: dump_path,
                size: 4,
                modified: Utc::now(),
            },
            KernelFile {
                name: "vmlinux".to_string(),
                path: kernel_path,
                version: "5.10.0".to_string(),
                size: 6,
            },
        )
    }

    fn engine_with(binary: &Path) -> SessionEngine {
        SessionEngine::new(&Config {
            crash_binary: binary.display().to_string(),
            crash_timeout_secs: 10,
            session_init_timeout_secs: 10,
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn start_execute_close_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), STUB_ENGINE);
        let (dump, kernel) = fixture(dir.path());
        let engine = engine_with(&stub);

        let info = engine.start(&dump, &kernel, None).await.unwrap();
        assert_eq!(info.state, SessionState::Active);
        assert_eq!(info.dump_name, "vmcore-test");
        assert!(engine.is_active());

        let result = engine.execute("ps", None).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "ok ps");
        assert!(result.error.is_empty());

        engine.close().await;
        assert!(!engine.is_active());
        assert!(engine.get_info().is_none());

        // Idempotent.
        engine.close().await;
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn failed_command_keeps_session_active() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), STUB_ENGINE);
        let (dump, kernel) = fixture(dir.path());
        let engine = engine_with(&stub);

        engine.start(&dump, &kernel, None).await.unwrap();
        let result = engine.execute("badcmd", None).await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(result.error.contains("badcmd: command not found"));
        assert!(engine.is_active());

        // The session is still usable afterwards.
        let result = engine.execute("bt", None).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "ok bt");

        engine.close().await;
    }

    #[tokio::test]
    async fn command_echo_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), STUB_ENGINE);
        let (dump, kernel) = fixture(dir.path());
        let engine = engine_with(&stub);

        engine.start(&dump, &kernel, None).await.unwrap();
        let result = engine.execute("echoing", None).await.unwrap();
        assert_eq!(result.output, "result line");

        engine.close().await;
    }

    #[tokio::test]
    async fn execute_without_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), STUB_ENGINE);
        let engine = engine_with(&stub);

        let err = engine.execute("ps", None).await.unwrap_err();
        assert!(matches!(err, ToolError::NoActiveSession));
    }

    #[tokio::test]
    async fn start_while_active_fails_and_session_survives() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), STUB_ENGINE);
        let (dump, kernel) = fixture(dir.path());
        let engine = engine_with(&stub);

        let first = engine.start(&dump, &kernel, None).await.unwrap();
        let err = engine.start(&dump, &kernel, None).await.unwrap_err();
        assert!(matches!(err, ToolError::SessionAlreadyActive(_)));

        // Untouched: same session, still active.
        let info = engine.get_info().unwrap();
        assert_eq!(info.session_id, first.session_id);
        assert_eq!(info.state, SessionState::Active);
        assert_eq!(engine.execute("ps", None).await.unwrap().exit_code, 0);

        engine.close().await;
    }

    #[tokio::test]
    async fn startup_timeout_kills_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), "#!/bin/sh\nexec sleep 30\n");
        let (dump, kernel) = fixture(dir.path());
        let engine = engine_with(&stub);

        let err = engine.start(&dump, &kernel, Some(1)).await.unwrap_err();
        assert!(matches!(err, ToolError::StartupTimeout(1)));
        assert!(!engine.is_active());
        assert!(engine.get_info().is_none());
    }

    #[tokio::test]
    async fn startup_error_line_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(
            dir.path(),
            "#!/bin/sh\nprintf 'crash: cannot open dump file\\n'\nexec sleep 30\n",
        );
        let (dump, kernel) = fixture(dir.path());
        let engine = engine_with(&stub);

        let err = engine.start(&dump, &kernel, None).await.unwrap_err();
        match err {
            ToolError::EngineReportedError(text) => {
                assert!(text.contains("cannot open dump file"))
            }
            other => panic!("expected EngineReportedError, got {other:?}"),
        }
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn early_exit_during_startup_is_unexpected_exit() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), "#!/bin/sh\nexit 1\n");
        let (dump, kernel) = fixture(dir.path());
        let engine = engine_with(&stub);

        let err = engine.start(&dump, &kernel, None).await.unwrap_err();
        assert!(matches!(err, ToolError::UnexpectedExit));
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn subprocess_death_mid_command_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), STUB_ENGINE);
        let (dump, kernel) = fixture(dir.path());
        let engine = engine_with(&stub);

        engine.start(&dump, &kernel, None).await.unwrap();
        let err = engine.execute("die", None).await.unwrap_err();
        assert!(matches!(err, ToolError::UnexpectedExit));
        assert!(!engine.is_active());
        assert!(engine.get_info().is_none());

        let err = engine.execute("ps", None).await.unwrap_err();
        assert!(matches!(err, ToolError::NoActiveSession));
    }

    #[tokio::test]
    async fn command_timeout_reports_but_keeps_session() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), STUB_ENGINE);
        let (dump, kernel) = fixture(dir.path());
        let engine = engine_with(&stub);

        engine.start(&dump, &kernel, None).await.unwrap();
        let err = engine.execute("hang", Some(1)).await.unwrap_err();
        match err {
            ToolError::CommandTimeout { command, seconds } => {
                assert_eq!(command, "hang");
                assert_eq!(seconds, 1);
            }
            other => panic!("expected CommandTimeout, got {other:?}"),
        }
        // The engine does not kill a hung command; the session stays up
        // and close still tears everything down.
        assert!(engine.is_active());
        engine.close().await;
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn prompt_without_trailing_space_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let stub = write_stub(dir.path(), "#!/bin/sh\nprintf 'crash>'\nexec sleep 30\n");
        let (dump, kernel) = fixture(dir.path());
        let engine = engine_with(&stub);

        let info = engine.start(&dump, &kernel, None).await.unwrap();
        assert_eq!(info.state, SessionState::Active);
        engine.close().await;
    }

    #[test]
    fn echo_stripping() {
        assert_eq!(strip_command_echo("bt\nPID: 1\n", "bt"), "PID: 1");
        assert_eq!(strip_command_echo("PID: 1\n", "bt"), "PID: 1");
        assert_eq!(strip_command_echo("", "bt"), "");
    }
}
