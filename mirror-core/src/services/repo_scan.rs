//! Staleness probe over the live package storage.
//!
//! The storage tree can hold tens of thousands of package archives, so the
//! scan short-circuits at the first archive newer than the cutoff instead of
//! enumerating everything. Assumes filesystem mtime granularity is fine
//! enough and clocks are not skewed relative to record timestamps.

use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

pub trait RepositoryScan: Send + Sync {
    /// True if any package archive under the root was modified strictly
    /// after `cutoff`.
    fn has_newer_archive(&self, cutoff: DateTime<Utc>) -> anyhow::Result<bool>;
}

pub struct FsRepositoryScan {
    root: PathBuf,
}

impl FsRepositoryScan {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn is_archive(name: &str) -> bool {
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

impl RepositoryScan for FsRepositoryScan {
    fn has_newer_archive(&self, cutoff: DateTime<Utc>) -> anyhow::Result<bool> {
        let cutoff: SystemTime = cutoff.into();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            // Unreadable subtrees are skipped rather than failing the probe.
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    stack.push(entry.path());
                    continue;
                }
                if !file_type.is_file() || !is_archive(&entry.file_name().to_string_lossy()) {
                    continue;
                }
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                let Ok(mtime) = meta.modified() else {
                    continue;
                };
                if mtime > cutoff {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn finds_archive_newer_than_cutoff() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("lodash");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("lodash-4.17.21.tgz"), b"tarball").unwrap();

        let scan = FsRepositoryScan::new(dir.path());
        let past = Utc::now() - Duration::hours(1);
        assert!(scan.has_newer_archive(past).unwrap());
    }

    #[test]
    fn ignores_archives_older_than_cutoff() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("left-pad-1.0.0.tgz"), b"tarball").unwrap();

        let scan = FsRepositoryScan::new(dir.path());
        let future = Utc::now() + Duration::hours(1);
        assert!(!scan.has_newer_archive(future).unwrap());
    }

    #[test]
    fn non_archive_files_do_not_count() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), b"{}").unwrap();
        std::fs::write(dir.path().join(".verdaccio-db.json"), b"{}").unwrap();

        let scan = FsRepositoryScan::new(dir.path());
        let past = Utc::now() - Duration::hours(1);
        assert!(!scan.has_newer_archive(past).unwrap());
    }

    #[test]
    fn missing_root_is_not_stale() {
        let dir = TempDir::new().unwrap();
        let scan = FsRepositoryScan::new(dir.path().join("absent"));
        assert!(!scan.has_newer_archive(Utc::now()).unwrap());
    }
}
