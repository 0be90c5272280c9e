//! Crash dump discovery.
//!
//! Scans the configured dump directory for candidate crash dumps and
//! exposes lookups by name and recency. Catalogs hold no state between
//! calls; every operation re-scans the filesystem.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Filename prefixes that qualify a file as a crash dump candidate.
pub const DUMP_NAME_PREFIXES: &[&str] = &["vmcore", "core", "crash", "dump"];

/// Directory levels below the dump root that are scanned.
const MAX_SCAN_DEPTH: usize = 3;

/// Snapshot of a crash dump file taken at scan time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashDump {
    /// File name, unique within one scan.
    pub name: String,
    /// Absolute location on disk.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Modification time.
    pub modified: DateTime<Utc>,
}

impl CrashDump {
    /// Render for tool output.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "path": self.path.display().to_string(),
            "size": self.size,
            "size_mb": mb(self.size),
            "modified": self.modified.to_rfc3339(),
            "readable": File::open(&self.path).is_ok(),
        })
    }
}

pub(crate) fn mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// Discovers crash dump files under a single root directory.
pub struct DumpCatalog {
    root: PathBuf,
    max_dumps: usize,
}

impl DumpCatalog {
    pub fn new(root: impl Into<PathBuf>, max_dumps: usize) -> Self {
        Self {
            root: root.into(),
            max_dumps,
        }
    }

    /// The directory this catalog scans.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find crash dumps, newest modification time first, capped at the
    /// configured maximum. Unreadable entries are logged and skipped.
    pub fn find_crash_dumps(&self) -> Vec<CrashDump> {
        if !self.root.exists() {
            warn!(path = %self.root.display(), "Crash dump path does not exist");
            return Vec::new();
        }

        let mut dumps = Vec::new();
        let walker = WalkDir::new(&self.root)
            .max_depth(MAX_SCAN_DEPTH)
            .sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry in dump scan");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !matches_dump_name(&name) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) => dumps.push(CrashDump {
                    name,
                    path: entry.path().to_path_buf(),
                    size: meta.len(),
                    modified: meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now()),
                }),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Cannot stat dump file");
                }
            }
        }

        // Newest first; name breaks mtime ties so repeated scans agree.
        dumps.sort_by(|a, b| b.modified.cmp(&a.modified).then(a.name.cmp(&b.name)));
        dumps.truncate(self.max_dumps);
        debug!(count = dumps.len(), "Crash dump scan complete");
        dumps
    }

    /// The most recently modified dump, if any.
    pub fn get_latest(&self) -> Option<CrashDump> {
        self.find_crash_dumps().into_iter().next()
    }

    /// Look up a dump by exact file name.
    pub fn get_by_name(&self, name: &str) -> Option<CrashDump> {
        self.find_crash_dumps().into_iter().find(|d| d.name == name)
    }

    /// Structural validity check: the file still exists, is a regular
    /// readable file with non-zero size, and carries a dump name. Session
    /// start refuses anything that fails this.
    pub fn is_valid(&self, dump: &CrashDump) -> bool {
        if !matches_dump_name(&dump.name) {
            return false;
        }
        let meta = match std::fs::metadata(&dump.path) {
            Ok(m) => m,
            Err(_) => return false,
        };
        meta.is_file() && meta.len() > 0 && File::open(&dump.path).is_ok()
    }
}

fn matches_dump_name(name: &str) -> bool {
    DUMP_NAME_PREFIXES.iter().any(|p| name.starts_with(p))
}
