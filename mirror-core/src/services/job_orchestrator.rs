//! Launches and supervises one external process per caller-assigned task id.
//!
//! The live-handle table is in-memory only and lost when the supervisor
//! process restarts; `is_running` answering false after a restart is a
//! documented limitation, and startup reconciliation fails any job record
//! still marked running from before the restart. Per-kind exclusivity is an
//! advisory lock file taken at the moment of intent to launch and released
//! when the supervisor task finishes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::{CoreError, Result};
use crate::models::job::{
    JobKind, JobParams, JobPoll, JobProgress, JobRecord, JobStatus, JobStatusDoc, JobSummary,
};
use crate::store::{EntityKind, EntityStore};

struct JobHandle {
    cancel: CancellationToken,
    progress_path: PathBuf,
    status_path: PathBuf,
    last_progress: Mutex<Option<JobProgress>>,
    last_status: Mutex<Option<JobStatusDoc>>,
}

#[derive(Clone)]
pub struct JobOrchestrator {
    store: Arc<EntityStore>,
    config: Arc<AppConfig>,
    handles: Arc<DashMap<String, Arc<JobHandle>>>,
}

impl JobOrchestrator {
    pub fn new(store: Arc<EntityStore>, config: Arc<AppConfig>) -> Self {
        Self {
            store,
            config,
            handles: Arc::new(DashMap::new()),
        }
    }

    /// Spawn the external process for `params` under `task_id`. The running
    /// record is persisted before the spawn, so a crash right after leaves a
    /// record that startup reconciliation repairs.
    pub async fn launch(&self, task_id: &str, params: JobParams) -> Result<JobRecord> {
        let kind = params.kind();
        if self.handles.contains_key(task_id) {
            return Err(CoreError::JobLaunchFailure(format!(
                "task {task_id} is already running"
            )));
        }
        self.acquire_kind_lock(kind, task_id)?;

        let progress_path = self.progress_path(task_id);
        let status_path = self.status_path(task_id);
        let log_path = self.config.logs_dir.join(format!("{task_id}.log"));
        // stale documents from an earlier run under the same task id
        let _ = tokio::fs::remove_file(&progress_path).await;
        let _ = tokio::fs::remove_file(&status_path).await;

        let mut record = JobRecord {
            task_id: task_id.to_string(),
            kind,
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            log_path: Some(log_path.clone()),
            summary: None,
        };
        if let Err(e) = self.store.write(EntityKind::Job, task_id, &record).await {
            self.release_kind_lock(kind);
            return Err(e);
        }

        let mut cmd = Command::new(&self.config.job_runner);
        cmd.arg(self.config.scripts_dir.join(kind.script()))
            .args(params.args())
            .env("STORAGE_DIR", &self.config.storage_dir)
            .env("FROZEN_DIR", &self.config.frozen_dir)
            .env("DIFF_ARCHIVES_DIR", &self.config.archives_dir)
            .env("REGISTRY_URL", &self.config.registry_url)
            .env("PARALLEL_JOBS", self.config.parallel_jobs.to_string())
            .env("PROGRESS_FILE", &progress_path)
            .env("STATUS_FILE", &status_path)
            .env("LOG_FILE", &log_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in params.env() {
            cmd.env(key, value);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                record.status = JobStatus::Failed;
                record.finished_at = Some(Utc::now());
                let _ = self.store.write(EntityKind::Job, task_id, &record).await;
                self.release_kind_lock(kind);
                return Err(CoreError::JobLaunchFailure(format!(
                    "failed to spawn {kind}: {e}"
                )));
            }
        };

        let handle = Arc::new(JobHandle {
            cancel: CancellationToken::new(),
            progress_path,
            status_path,
            last_progress: Mutex::new(None),
            last_status: Mutex::new(None),
        });
        self.handles.insert(task_id.to_string(), handle.clone());

        let this = self.clone();
        let tid = task_id.to_string();
        let started_at = record.started_at;
        tokio::spawn(async move {
            this.supervise(tid, kind, child, handle, started_at).await;
        });

        tracing::info!(task_id, kind = %kind, "launched job");
        Ok(record)
    }

    /// Best-effort, non-blocking snapshot. Live jobs answer from the
    /// progress/status documents with a cached fallback when a read races
    /// the writer; finished jobs answer from the persisted record.
    pub async fn poll(&self, task_id: &str) -> Result<JobPoll> {
        let handle = self.handles.get(task_id).map(|h| h.value().clone());
        if let Some(handle) = handle {
            let progress = match read_json::<JobProgress>(&handle.progress_path).await {
                Some(p) => {
                    *handle.last_progress.lock().await = Some(p.clone());
                    Some(p)
                }
                None => handle.last_progress.lock().await.clone(),
            };
            let status = match read_json::<JobStatusDoc>(&handle.status_path).await {
                Some(s) => {
                    *handle.last_status.lock().await = Some(s.clone());
                    Some(s)
                }
                None => handle.last_status.lock().await.clone(),
            };
            let record = self.store.read(EntityKind::Job, task_id).await?;
            return Ok(JobPoll {
                running: true,
                progress,
                status,
                record,
            });
        }

        match self.store.read::<JobRecord>(EntityKind::Job, task_id).await? {
            Some(record) => Ok(JobPoll {
                running: false,
                progress: None,
                status: Some(JobStatusDoc {
                    status: record.status.as_str().to_string(),
                    message: terminal_message(&record),
                    updated_at: record.finished_at.map(|t| t.to_rfc3339()),
                }),
                record: Some(record),
            }),
            None => Err(CoreError::JobNotFound(task_id.to_string())),
        }
    }

    /// True iff a live handle exists for the task. False after a supervisor
    /// restart even if the process is technically still alive.
    pub fn is_running(&self, task_id: &str) -> bool {
        self.handles.contains_key(task_id)
    }

    /// Advisory cancellation: signal the process and drop the bookkeeping
    /// immediately. Returns false when no live handle is known.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.handles.remove(task_id) {
            Some((_, handle)) => {
                handle.cancel.cancel();
                tracing::info!(task_id, "cancel requested");
                true
            }
            None => false,
        }
    }

    /// Startup hook: a record still marked running cannot correspond to a
    /// live process once the handle table is gone, so rewrite it to failed.
    /// Leftover kind locks and progress/status documents are cleared too.
    pub async fn reconcile(&self) -> Result<usize> {
        let records: Vec<JobRecord> = self.store.list_all(EntityKind::Job).await?;
        let mut repaired = 0;
        for mut record in records {
            if record.status != JobStatus::Running {
                continue;
            }
            record.status = JobStatus::Failed;
            record.finished_at = Some(Utc::now());
            let task_id = record.task_id.clone();
            self.store.write(EntityKind::Job, &task_id, &record).await?;
            tracing::warn!(task_id = %task_id, kind = %record.kind, "reconciled orphaned running job to failed");
            repaired += 1;
        }

        remove_matching(&self.locks_dir(), |_| true).await;
        remove_matching(&self.config.runtime_dir, |name| {
            name.ends_with(".progress.json") || name.ends_with(".status.json")
        })
        .await;
        Ok(repaired)
    }

    async fn supervise(
        &self,
        task_id: String,
        kind: JobKind,
        mut child: Child,
        handle: Arc<JobHandle>,
        started_at: chrono::DateTime<Utc>,
    ) {
        // Drain stdout on the side, keeping the last JSON object line: the
        // job's final machine-readable summary.
        let stdout = child.stdout.take();
        let reader = tokio::spawn(async move {
            let mut summary: Option<JobSummary> = None;
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
                        continue;
                    };
                    if !value.is_object() {
                        continue;
                    }
                    if let Ok(parsed) = serde_json::from_value::<JobSummary>(value) {
                        summary = Some(parsed);
                    }
                }
            }
            summary
        });

        let mut cancelled = false;
        let exit = tokio::select! {
            status = child.wait() => status,
            _ = handle.cancel.cancelled() => {
                cancelled = true;
                let _ = child.start_kill();
                child.wait().await
            }
        };

        let summary = reader.await.ok().flatten();
        let status_doc = read_json::<JobStatusDoc>(&handle.status_path).await;

        let status = if cancelled {
            JobStatus::Failed
        } else {
            match &exit {
                Ok(s) if s.success() => {
                    let with_errors = summary.as_ref().map_or(0, |s| s.failed_count()) > 0
                        || status_doc
                            .as_ref()
                            .is_some_and(|d| d.status.starts_with("completed_with"));
                    if with_errors {
                        JobStatus::CompletedWithErrors
                    } else {
                        JobStatus::Completed
                    }
                }
                _ => JobStatus::Failed,
            }
        };

        let current = self
            .store
            .read::<JobRecord>(EntityKind::Job, &task_id)
            .await
            .ok()
            .flatten();
        // A cancelled run's task id may already be reused by the time the
        // old process exits; the newer run owns the record and documents.
        let superseded = current.as_ref().is_some_and(|r| r.started_at != started_at);
        if superseded {
            tracing::warn!(task_id = %task_id, kind = %kind, "task id was relaunched while the old process was exiting");
        } else {
            let mut record = current.unwrap_or_else(|| JobRecord {
                task_id: task_id.clone(),
                kind,
                status: JobStatus::Running,
                started_at,
                finished_at: None,
                attempted: 0,
                succeeded: 0,
                failed: 0,
                log_path: None,
                summary: None,
            });
            record.status = status;
            record.finished_at = Some(Utc::now());
            if let Some(s) = &summary {
                record.attempted = s.attempted();
                record.succeeded = s.succeeded();
                record.failed = s.failed_count();
            }
            record.summary = summary;
            if let Err(e) = self.store.write(EntityKind::Job, &task_id, &record).await {
                tracing::error!(task_id = %task_id, error = %e, "failed to persist terminal job record");
            }

            // the terminal record supersedes the ephemeral documents; the log
            // stream stays
            let _ = tokio::fs::remove_file(&handle.progress_path).await;
            let _ = tokio::fs::remove_file(&handle.status_path).await;
            tracing::info!(task_id = %task_id, kind = %kind, status = ?record.status, cancelled, "job finished");
        }

        self.handles
            .remove_if(&task_id, |_, h| Arc::ptr_eq(h, &handle));
        self.release_kind_lock(kind);
    }

    fn locks_dir(&self) -> PathBuf {
        self.config.runtime_dir.join("locks")
    }

    fn lock_path(&self, kind: JobKind) -> PathBuf {
        self.locks_dir().join(format!("{kind}.lock"))
    }

    fn progress_path(&self, task_id: &str) -> PathBuf {
        self.config.runtime_dir.join(format!("{task_id}.progress.json"))
    }

    fn status_path(&self, task_id: &str) -> PathBuf {
        self.config.runtime_dir.join(format!("{task_id}.status.json"))
    }

    // create_new makes taking the lock atomic; two near-simultaneous
    // launches of the same kind cannot both win.
    fn acquire_kind_lock(&self, kind: JobKind, task_id: &str) -> Result<()> {
        let path = self.lock_path(kind);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use std::io::Write;
                let _ = writeln!(file, "{task_id}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(CoreError::JobLaunchFailure(
                format!("another {kind} job is already running"),
            )),
            Err(e) => Err(CoreError::io(path, e)),
        }
    }

    fn release_kind_lock(&self, kind: JobKind) {
        let _ = std::fs::remove_file(self.lock_path(kind));
    }
}

fn terminal_message(record: &JobRecord) -> String {
    match record.status {
        JobStatus::Running => "running".to_string(),
        JobStatus::Completed => format!("completed: {} succeeded", record.succeeded),
        JobStatus::CompletedWithErrors => format!(
            "completed with errors: {} succeeded, {} failed",
            record.succeeded, record.failed
        ),
        JobStatus::Failed => "failed".to_string(),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

async fn remove_matching(dir: &Path, matches: impl Fn(&str) -> bool) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let path = entry.path();
        if path.is_file() && matches(&name) {
            let _ = tokio::fs::remove_file(&path).await;
        }
    }
}
