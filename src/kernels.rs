//! Kernel symbol file detection.
//!
//! Locates vmlinux/vmlinuz files across debug-symbol directories and the
//! configured kernel directory, tags each with an extracted version, and
//! deduplicates by version. Debug-symbol roots are scanned first so a
//! symbol-bearing vmlinux wins over a stripped /boot image of the same
//! version; within a directory the walk is alphabetical, which keeps the
//! first-found-wins dedup deterministic.

use crate::discovery::{mb, CrashDump};
use regex::Regex;
use serde_json::{json, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

static VERSION3: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+").expect("valid regex"));
static VERSION2: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+").expect("valid regex"));

/// Version tag used when nothing in the filename or path looks like one.
pub const UNKNOWN_VERSION: &str = "unknown";

/// A kernel symbol or image file usable for crash analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelFile {
    /// File name (`vmlinux`, `vmlinuz`, or `vmlinuz-<version>`).
    pub name: String,
    /// Absolute location on disk.
    pub path: PathBuf,
    /// Extracted kernel version, or [`UNKNOWN_VERSION`].
    pub version: String,
    /// Size in bytes.
    pub size: u64,
}

impl KernelFile {
    /// Render for tool output.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "path": self.path.display().to_string(),
            "version": self.version,
            "size": self.size,
            "size_mb": mb(self.size),
            "readable": File::open(&self.path).is_ok(),
        })
    }
}

/// Discovers kernel files for crash analysis.
pub struct KernelCatalog {
    search_roots: Vec<PathBuf>,
}

impl KernelCatalog {
    /// Standard search order: debug-symbol directories, then the
    /// configured kernel directory.
    pub fn new(kernel_path: &Path) -> Self {
        Self {
            search_roots: vec![
                PathBuf::from("/usr/lib/debug/lib/modules"),
                PathBuf::from("/usr/lib/debug/boot"),
                kernel_path.to_path_buf(),
            ],
        }
    }

    /// Catalog over explicit roots, in the given preference order.
    pub fn with_roots(search_roots: Vec<PathBuf>) -> Self {
        Self { search_roots }
    }

    /// Find kernel files across all search roots, one per distinct
    /// version (first found wins).
    pub fn find_kernel_files(&self) -> Vec<KernelFile> {
        let mut seen_versions = std::collections::HashSet::new();
        let mut kernels = Vec::new();

        for root in &self.search_roots {
            if !root.exists() {
                continue;
            }
            for kernel in self.search_directory(root) {
                if seen_versions.insert(kernel.version.clone()) {
                    kernels.push(kernel);
                }
            }
        }

        debug!(count = kernels.len(), "Kernel file scan complete");
        kernels
    }

    fn search_directory(&self, root: &Path) -> Vec<KernelFile> {
        let mut kernels = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Skipping unreadable entry in kernel scan");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_kernel_file_name(&name) {
                continue;
            }
            let dir = entry.path().parent().unwrap_or(root);
            let version = extract_version(&name, dir);
            match entry.metadata() {
                Ok(meta) => kernels.push(KernelFile {
                    name,
                    path: entry.path().to_path_buf(),
                    version,
                    size: meta.len(),
                }),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Cannot stat kernel file");
                }
            }
        }
        kernels
    }

    /// Select a kernel for the given dump.
    ///
    /// Weak-matching policy: no cross-validation against dump metadata is
    /// performed; the first catalog entry is returned. Callers get
    /// determinism (same catalog state, same pick), not a semantic
    /// guarantee that the kernel matches the dump.
    pub fn find_matching_kernel(&self, dump: &CrashDump) -> Option<KernelFile> {
        let kernels = self.find_kernel_files();
        let kernel = match kernels.into_iter().next() {
            Some(k) => k,
            None => {
                warn!(dump = %dump.name, "No kernel files found");
                return None;
            }
        };
        info!(kernel = %kernel.name, version = %kernel.version, "Selected kernel");
        Some(kernel)
    }
}

fn is_kernel_file_name(name: &str) -> bool {
    name == "vmlinux" || name == "vmlinuz" || name.starts_with("vmlinuz-")
}

/// Extract a kernel version from the filename, or failing that from the
/// containing directory path (debug-symbol trees keep vmlinux under a
/// version-named directory).
fn extract_version(file_name: &str, dir: &Path) -> String {
    if let Some(version) = file_name.strip_prefix("vmlinuz-") {
        return version.to_string();
    }

    for component in dir.components().rev() {
        let part = component.as_os_str().to_string_lossy();
        if VERSION3.is_match(&part) {
            return part.into_owned();
        }
    }

    if let Some(leaf) = dir.file_name() {
        let leaf = leaf.to_string_lossy();
        if VERSION2.is_match(&leaf) {
            return leaf.into_owned();
        }
    }

    UNKNOWN_VERSION.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, contents: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn version_from_vmlinuz_prefix() {
        assert_eq!(
            extract_version("vmlinuz-5.14.0-503.el9.x86_64", Path::new("/boot")),
            "5.14.0-503.el9.x86_64"
        );
    }

    #[test]
    fn version_from_path_component() {
        assert_eq!(
            extract_version("vmlinux", Path::new("/usr/lib/debug/lib/modules/5.10.0")),
            "5.10.0"
        );
        // Innermost component wins.
        assert_eq!(
            extract_version("vmlinux", Path::new("/d/4.18.0/sub/5.10.0")),
            "5.10.0"
        );
    }

    #[test]
    fn version_from_two_part_leaf_directory() {
        assert_eq!(extract_version("vmlinux", Path::new("/kernels/6.1")), "6.1");
    }

    #[test]
    fn version_unknown_when_nothing_matches() {
        assert_eq!(extract_version("vmlinux", Path::new("/boot")), UNKNOWN_VERSION);
    }

    #[test]
    fn finds_vmlinux_in_debug_module_tree() {
        let dir = tempfile::tempdir().unwrap();
        let debug_root = dir.path().join("usr/lib/debug/lib/modules");
        touch(&debug_root.join("5.10.0/vmlinux"), b"symbols");

        let catalog = KernelCatalog::with_roots(vec![debug_root]);
        let kernels = catalog.find_kernel_files();
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].version, "5.10.0");
        assert_eq!(kernels[0].name, "vmlinux");
    }

    #[test]
    fn dedup_keeps_one_record_per_version() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        touch(&root.join("a/5.10.0/vmlinux"), b"first");
        touch(&root.join("b/5.10.0/vmlinux"), b"second");
        touch(&root.join("c/6.1.0/vmlinux"), b"other");

        let catalog = KernelCatalog::with_roots(vec![root.clone()]);
        let kernels = catalog.find_kernel_files();
        assert_eq!(kernels.len(), 2);
        let versions: Vec<_> = kernels.iter().map(|k| k.version.as_str()).collect();
        assert_eq!(versions, vec!["5.10.0", "6.1.0"]);
        // Alphabetical walk order means a/ wins over b/.
        assert_eq!(kernels[0].path, root.join("a/5.10.0/vmlinux"));
    }

    #[test]
    fn debug_root_preferred_over_kernel_root_for_same_version() {
        let dir = tempfile::tempdir().unwrap();
        let debug_root = dir.path().join("debug");
        let boot_root = dir.path().join("boot");
        touch(&debug_root.join("5.10.0/vmlinux"), b"with symbols");
        touch(&boot_root.join("vmlinuz-5.10.0"), b"stripped");

        let catalog = KernelCatalog::with_roots(vec![debug_root.clone(), boot_root]);
        let kernels = catalog.find_kernel_files();
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].path, debug_root.join("5.10.0/vmlinux"));
    }

    #[test]
    fn matching_kernel_is_first_catalog_entry() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        touch(&root.join("5.10.0/vmlinux"), b"x");
        touch(&root.join("6.1.0/vmlinux"), b"y");

        let catalog = KernelCatalog::with_roots(vec![root]);
        let dump = CrashDump {
            name: "vmcore".to_string(),
            path: dir.path().join("vmcore"),
            size: 1,
            modified: chrono::Utc::now(),
        };
        let kernel = catalog.find_matching_kernel(&dump).unwrap();
        assert_eq!(kernel, catalog.find_kernel_files()[0]);
    }

    #[test]
    fn empty_catalog_yields_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = KernelCatalog::with_roots(vec![dir.path().to_path_buf()]);
        let dump = CrashDump {
            name: "vmcore".to_string(),
            path: dir.path().join("vmcore"),
            size: 1,
            modified: chrono::Utc::now(),
        };
        assert!(catalog.find_matching_kernel(&dump).is_none());
    }
}
