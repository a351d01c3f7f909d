use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::job::JobSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Pending,
    Partial,
    Transferred,
    Outdated,
}

impl DiffStatus {
    /// Pending and Partial diffs are "active": they still accept delivery
    /// confirmations, and at most one of them may exist at a time.
    pub fn is_active(self) -> bool {
        matches!(self, DiffStatus::Pending | DiffStatus::Partial)
    }
}

/// One snapshot of repository changes pending distribution. The metadata
/// record is retained indefinitely for audit; only the archive payload at
/// `archive_path` is ever reclaimed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// `created_at` of the most recently created prior diff; none if first.
    pub since_time: Option<DateTime<Utc>>,
    pub status: DiffStatus,
    /// Destination id to acknowledgment timestamp. Add-only.
    #[serde(default)]
    pub transfers: BTreeMap<String, DateTime<Utc>>,
    pub archive_path: Option<PathBuf>,
    pub archive_size: u64,
    pub file_count: u64,
    /// Moment the storage tree was read to build the archive.
    pub snapshot_time: DateTime<Utc>,
}

/// Input to diff creation, normally the outcome of a diff-build job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDiff {
    /// Caller-chosen id (the diff-build job picks one up front); a
    /// time-derived id is generated when absent.
    pub id: Option<String>,
    pub archive_path: Option<PathBuf>,
    #[serde(default)]
    pub archive_size: u64,
    #[serde(default)]
    pub file_count: u64,
    pub snapshot_time: DateTime<Utc>,
}

impl NewDiff {
    /// Build creation input from a diff-build job's final summary line.
    pub fn from_summary(summary: &JobSummary) -> Self {
        let snapshot_time = summary
            .storage_snapshot_time
            .as_deref()
            .and_then(parse_snapshot_time)
            .unwrap_or_else(Utc::now);
        Self {
            id: summary.diff_id.clone(),
            archive_path: summary.archive_path.clone(),
            archive_size: summary.archive_size.unwrap_or(0),
            file_count: summary.files_count.unwrap_or(0),
            snapshot_time,
        }
    }
}

// The build job emits a naive local-ish ISO timestamp; accept both that and
// a proper RFC 3339 one.
fn parse_snapshot_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    s.parse::<NaiveDateTime>().ok().map(|n| n.and_utc())
}
