//! Age-based file cleanup and directory usage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};

/// Remove files older than `max_age` from a single directory.
///
/// Only regular files directly inside `dir` are considered. When
/// `extensions` is non-empty, only files with one of those extensions
/// (compared case-insensitively, without the dot) are removed.
#[derive(Clone, Debug)]
pub struct CleanupPolicy {
    /// Label used in logs.
    pub name: String,
    /// Directory to sweep.
    pub dir: PathBuf,
    /// Files last modified longer ago than this are removed.
    pub max_age: Duration,
    /// Allowed extensions; empty means any.
    pub extensions: Vec<String>,
}

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Files examined.
    pub scanned: usize,
    /// Names of removed files.
    pub removed: Vec<String>,
    /// Total size of removed files.
    pub bytes_freed: u64,
    /// Files that matched but could not be removed.
    pub failed: usize,
}

impl CleanupPolicy {
    /// Create a policy.
    pub fn new(
        name: impl Into<String>,
        dir: impl Into<PathBuf>,
        max_age: Duration,
        extensions: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            max_age,
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Sweep the directory now.
    pub fn sweep(&self) -> io::Result<CleanupReport> {
        self.sweep_at(SystemTime::now())
    }

    /// Sweep as if the current time were `now`.
    ///
    /// A missing directory is not an error and yields an empty report.
    pub fn sweep_at(&self, now: SystemTime) -> io::Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(policy = %self.name, dir = %self.dir.display(), "cleanup directory missing, skipping");
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            let metadata = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(policy = %self.name, path = %entry.path().display(), error = %e, "cannot stat file");
                    continue;
                }
            };
            report.scanned += 1;

            let path = entry.path();
            if !self.extension_allowed(&path) {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= self.max_age {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    report.bytes_freed += metadata.len();
                    report
                        .removed
                        .push(entry.file_name().to_string_lossy().into_owned());
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(policy = %self.name, path = %path.display(), error = %e, "failed to remove old file");
                }
            }
        }

        if !report.removed.is_empty() {
            info!(
                policy = %self.name,
                removed = report.removed.len(),
                bytes_freed = report.bytes_freed,
                "cleanup removed old files"
            );
        }
        Ok(report)
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
    }
}

/// Space taken by one directory tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DirectoryUsage {
    /// Directory measured.
    pub path: PathBuf,
    /// Total size of regular files, in MiB (2 dp).
    pub size_mb: f64,
    /// Regular files found.
    pub file_count: usize,
}

/// Walk `dir` recursively and total its regular files.
///
/// A missing directory counts as empty. Entries that cannot be read are
/// skipped with a warning.
pub fn directory_usage(dir: &Path) -> io::Result<DirectoryUsage> {
    let mut bytes = 0u64;
    let mut file_count = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) if current == dir => return Err(e),
            Err(e) => {
                warn!(path = %current.display(), error = %e, "cannot read directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            match entry.metadata() {
                Ok(m) if m.is_dir() => pending.push(entry.path()),
                Ok(m) if m.is_file() => {
                    bytes += m.len();
                    file_count += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(path = %entry.path().display(), error = %e, "cannot stat file"),
            }
        }
    }
    Ok(DirectoryUsage {
        path: dir.to_path_buf(),
        size_mb: (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
        file_count,
    })
}
