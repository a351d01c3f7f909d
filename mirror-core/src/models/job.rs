use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    FullSync,
    RecentSync,
    SingleSync,
    DiffBuild,
    FrozenSync,
    IntegrityCheck,
    Fix,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::FullSync => "full-sync",
            JobKind::RecentSync => "recent-sync",
            JobKind::SingleSync => "single-sync",
            JobKind::DiffBuild => "diff-build",
            JobKind::FrozenSync => "frozen-sync",
            JobKind::IntegrityCheck => "integrity-check",
            JobKind::Fix => "fix",
        }
    }

    /// Script implementing this kind, relative to the scripts directory.
    pub fn script(self) -> &'static str {
        match self {
            JobKind::FullSync => "update_all.py",
            JobKind::RecentSync => "update_recent.py",
            JobKind::SingleSync => "update_single.py",
            JobKind::DiffBuild => "create_diff.py",
            JobKind::FrozenSync => "sync_frozen.py",
            JobKind::IntegrityCheck => "check_broken.py",
            JobKind::Fix => "fix_broken.py",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statically enumerable inputs per job kind. The orchestrator turns these
/// into the environment/arguments of the spawned process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobParams {
    FullSync,
    RecentSync { modified_minutes: u32 },
    SingleSync { package: String },
    DiffBuild { diff_id: String },
    FrozenSync { diff_id: String },
    IntegrityCheck { broken_list: Option<PathBuf> },
    Fix { broken_list: Option<PathBuf> },
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::FullSync => JobKind::FullSync,
            JobParams::RecentSync { .. } => JobKind::RecentSync,
            JobParams::SingleSync { .. } => JobKind::SingleSync,
            JobParams::DiffBuild { .. } => JobKind::DiffBuild,
            JobParams::FrozenSync { .. } => JobKind::FrozenSync,
            JobParams::IntegrityCheck { .. } => JobKind::IntegrityCheck,
            JobParams::Fix { .. } => JobKind::Fix,
        }
    }

    pub(crate) fn env(&self) -> Vec<(&'static str, String)> {
        match self {
            JobParams::RecentSync { modified_minutes } => {
                vec![("MODIFIED_MINUTES", modified_minutes.to_string())]
            }
            JobParams::DiffBuild { diff_id } | JobParams::FrozenSync { diff_id } => {
                vec![("DIFF_ID", diff_id.clone())]
            }
            JobParams::IntegrityCheck { broken_list } | JobParams::Fix { broken_list } => {
                broken_list
                    .as_ref()
                    .map(|p| vec![("BROKEN_FILE", p.to_string_lossy().into_owned())])
                    .unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn args(&self) -> Vec<String> {
        match self {
            JobParams::SingleSync { package } => vec![package.clone()],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != JobStatus::Running
    }
}

/// One run of an external job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub task_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempted: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub failed: u64,
    pub log_path: Option<PathBuf>,
    pub summary: Option<JobSummary>,
}

/// Final machine-readable line a job prints to stdout. The key set varies by
/// kind, so every field is optional and one shape covers all scripts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobSummary {
    pub total_packages: Option<u64>,
    pub success: Option<u64>,
    pub failed: Option<u64>,
    pub total_archives: Option<u64>,
    pub broken_archives: Option<u64>,
    pub broken_file: Option<PathBuf>,
    pub total_broken: Option<u64>,
    pub fixed: Option<u64>,
    pub copied_files: Option<u64>,
    pub failed_files: Option<u64>,
    pub diff_id: Option<String>,
    pub files_count: Option<u64>,
    pub archive_path: Option<PathBuf>,
    pub archive_size: Option<u64>,
    pub storage_snapshot_time: Option<String>,
}

impl JobSummary {
    fn attempted_raw(&self) -> Option<u64> {
        self.total_packages
            .or(self.total_archives)
            .or(self.total_broken)
    }

    pub fn attempted(&self) -> u64 {
        self.attempted_raw()
            .unwrap_or_else(|| self.succeeded() + self.failed_count())
    }

    pub fn succeeded(&self) -> u64 {
        if let Some(n) = self.success.or(self.fixed).or(self.copied_files) {
            return n;
        }
        self.attempted_raw()
            .map(|total| total.saturating_sub(self.failed_count()))
            .unwrap_or(0)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed
            .or(self.broken_archives)
            .or(self.failed_files)
            .unwrap_or(0)
    }
}

/// Latest progress document of a job. Overwritten in place by the external
/// process; kind-specific extras stay optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobProgress {
    pub current: u64,
    pub total: u64,
    pub percent: f64,
    pub success: Option<u64>,
    pub failed: Option<u64>,
    pub current_package: Option<String>,
    pub phase: Option<String>,
    pub updated_at: Option<String>,
}

/// Status document: a coarse status code plus a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusDoc {
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Snapshot returned by `poll`: never blocks, best-effort fields.
#[derive(Debug, Clone, Serialize)]
pub struct JobPoll {
    pub running: bool,
    pub progress: Option<JobProgress>,
    pub status: Option<JobStatusDoc>,
    pub record: Option<JobRecord>,
}
