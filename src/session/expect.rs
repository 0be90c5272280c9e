//! Stream-pattern matching against the crash subprocess.
//!
//! The crash utility speaks no structured protocol: it interleaves free-form
//! status text with a short prompt token when ready for input, and writes
//! error lines of the form `crash: ...`. This module accumulates the
//! subprocess's combined stdout/stderr into a buffer and scans it after
//! every read against an ordered pattern set.
//!
//! Pattern order is load-bearing. The error pattern is tested first: the
//! engine emits the error line strictly before any subsequent prompt, so an
//! error must win even when both land in the same read. Prompt forms are
//! then tested most-specific first so `"crash> "` is preferred over the
//! bare `"crash>"` when both match.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// Accepted prompt forms, most specific first.
pub const PROMPT_PATTERNS: &[&str] = &["crash> ", "crash>"];

/// Error lines emitted by the crash utility.
static ERROR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"crash: [^\n]*").expect("valid regex"));

const READ_CHUNK_SIZE: usize = 4096;
const CHANNEL_CAPACITY: usize = 64;

/// What a pattern scan resolved to.
#[derive(Debug)]
pub enum ExpectOutcome {
    /// A prompt was seen; `output` is everything read before it.
    Prompt { output: String },
    /// The error pattern was seen first.
    EngineError { output: String, error: String },
    /// The deadline passed with no pattern matched.
    Timeout,
    /// The subprocess closed its output streams; `output` is whatever
    /// remained unconsumed.
    Eof { output: String },
}

struct Hit {
    start: usize,
    end: usize,
    error: Option<String>,
}

/// Scan `buffer` for the first pattern in declaration order.
fn scan(buffer: &str) -> Option<Hit> {
    if let Some(m) = ERROR_PATTERN.find(buffer) {
        return Some(Hit {
            start: m.start(),
            end: m.end(),
            error: Some(m.as_str().to_string()),
        });
    }
    for prompt in PROMPT_PATTERNS {
        if let Some(pos) = buffer.find(prompt) {
            return Some(Hit {
                start: pos,
                end: pos + prompt.len(),
                error: None,
            });
        }
    }
    None
}

/// Combined, incrementally-scanned view of the subprocess's output.
///
/// Two pump tasks feed stdout and stderr chunks into one channel; channel
/// closure (both pumps done) signals EOF. Unconsumed text survives between
/// `expect` calls so output split across reads is never lost.
pub struct OutputStream {
    rx: mpsc::Receiver<Vec<u8>>,
    buffer: String,
    eof: bool,
}

impl OutputStream {
    pub fn new(
        stdout: impl AsyncRead + Unpin + Send + 'static,
        stderr: impl AsyncRead + Unpin + Send + 'static,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(pump(stdout, tx.clone()));
        tokio::spawn(pump(stderr, tx));
        Self {
            rx,
            buffer: String::new(),
            eof: false,
        }
    }

    /// Read until a pattern matches, the deadline passes, or the stream
    /// ends. Matched text is consumed; on timeout the buffer is kept so a
    /// later call can still observe the in-flight command's output.
    pub async fn expect(&mut self, timeout: Duration) -> ExpectOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(hit) = scan(&self.buffer) {
                let output = self.buffer[..hit.start].to_string();
                self.buffer.drain(..hit.end);
                return match hit.error {
                    Some(error) => ExpectOutcome::EngineError { output, error },
                    None => ExpectOutcome::Prompt { output },
                };
            }
            if self.eof {
                return ExpectOutcome::Eof {
                    output: std::mem::take(&mut self.buffer),
                };
            }
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(chunk)) => self.append(&chunk),
                Ok(None) => self.eof = true,
                Err(_) => return ExpectOutcome::Timeout,
            }
        }
    }

    fn append(&mut self, chunk: &[u8]) {
        // CRs would defeat literal prompt matching.
        let text = String::from_utf8_lossy(chunk);
        self.buffer.extend(text.chars().filter(|&c| c != '\r'));
    }
}

async fn pump(mut stream: impl AsyncRead + Unpin, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_with_trailing_space_preferred() {
        let hit = scan("some output\ncrash> ").unwrap();
        assert!(hit.error.is_none());
        assert_eq!(&"some output\ncrash> "[hit.start..hit.end], "crash> ");
    }

    #[test]
    fn bare_prompt_matches_without_trailing_space() {
        let hit = scan("boot messages\ncrash>").unwrap();
        assert!(hit.error.is_none());
        assert_eq!(hit.end, "boot messages\ncrash>".len());
    }

    #[test]
    fn error_line_wins_over_later_prompt() {
        let text = "crash: badcmd: command not found\ncrash> ";
        let hit = scan(text).unwrap();
        assert_eq!(hit.error.as_deref(), Some("crash: badcmd: command not found"));
        assert_eq!(hit.start, 0);
    }

    #[test]
    fn output_is_text_before_match() {
        let text = "PID: 1234\nTASK: ffff\ncrash> next";
        let hit = scan(text).unwrap();
        assert_eq!(&text[..hit.start], "PID: 1234\nTASK: ffff\n");
        assert_eq!(&text[hit.end..], "next");
    }

    #[test]
    fn no_match_on_plain_text() {
        assert!(scan("still indexing the dump...").is_none());
        // The banner mentions the program name without a colon.
        assert!(scan("crash 8.0.2\nCopyright (C) 2002\n").is_none());
    }

    #[tokio::test]
    async fn expect_times_out_without_pattern() {
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(4);
        let mut stream = OutputStream {
            rx,
            buffer: "partial outp".to_string(),
            eof: false,
        };
        let outcome = stream.expect(Duration::from_millis(50)).await;
        assert!(matches!(outcome, ExpectOutcome::Timeout));
        // Unconsumed text is retained for the next call.
        assert_eq!(stream.buffer, "partial outp");
    }

    #[tokio::test]
    async fn expect_reports_eof_with_remaining_output() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(4);
        tx.send(b"dying words".to_vec()).await.unwrap();
        drop(tx);
        let mut stream = OutputStream {
            rx,
            buffer: String::new(),
            eof: false,
        };
        match stream.expect(Duration::from_secs(1)).await {
            ExpectOutcome::Eof { output } => assert_eq!(output, "dying words"),
            other => panic!("expected Eof, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expect_matches_across_chunk_boundaries() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(4);
        tx.send(b"output\ncra".to_vec()).await.unwrap();
        tx.send(b"sh> ".to_vec()).await.unwrap();
        let mut stream = OutputStream {
            rx,
            buffer: String::new(),
            eof: false,
        };
        match stream.expect(Duration::from_secs(1)).await {
            ExpectOutcome::Prompt { output } => assert_eq!(output, "output\n"),
            other => panic!("expected Prompt, got {other:?}"),
        }
    }
}
