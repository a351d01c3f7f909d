//! Diff record state machine: creation, per-destination acknowledgment,
//! staleness retirement, and archive retention.
//!
//! The entity store provides no cross-call locking, so every read-modify-write
//! of diff records goes through one mutex here. That serializes concurrent
//! `confirm_delivery` calls on the same record (otherwise acknowledgments get
//! lost) and makes "retire previous diff + write new diff" a single logical
//! transaction during creation.

use std::io::ErrorKind;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::models::destination::DestinationState;
use crate::models::diff::{DiffRecord, DiffStatus, NewDiff};
use crate::services::destination_registry::DestinationRegistry;
use crate::services::repo_scan::RepositoryScan;
use crate::store::{EntityKind, EntityStore};

pub struct DiffLifecycle {
    store: Arc<EntityStore>,
    destinations: DestinationRegistry,
    scanner: Arc<dyn RepositoryScan>,
    write_lock: Mutex<()>,
}

impl DiffLifecycle {
    pub fn new(
        store: Arc<EntityStore>,
        destinations: DestinationRegistry,
        scanner: Arc<dyn RepositoryScan>,
    ) -> Self {
        Self {
            store,
            destinations,
            scanner,
            write_lock: Mutex::new(()),
        }
    }

    /// Record a freshly built diff. Fails with `ActiveDiffExists` while a
    /// non-stale active diff exists; a stale Pending diff is retired to
    /// Outdated instead (archive retained). Archive payloads of prior
    /// Transferred diffs are reclaimed here, the only place payloads are
    /// ever deleted.
    pub async fn create(&self, new: NewDiff) -> Result<DiffRecord> {
        let _guard = self.write_lock.lock().await;
        let diffs = self.load_all().await?;

        if let Some(active) = diffs.iter().find(|d| d.status.is_active()) {
            if active.status == DiffStatus::Pending && self.is_stale(active).await {
                let mut retired = active.clone();
                retired.status = DiffStatus::Outdated;
                self.store
                    .write(EntityKind::Diff, &retired.id, &retired)
                    .await?;
                tracing::info!(diff_id = %retired.id, "retired stale pending diff");
            } else {
                return Err(CoreError::ActiveDiffExists {
                    id: active.id.clone(),
                });
            }
        }

        for delivered in diffs.iter().filter(|d| d.status == DiffStatus::Transferred) {
            reclaim_archive(delivered).await;
        }

        let now = Utc::now();
        let id = new
            .id
            .unwrap_or_else(|| format!("diff_{}", now.format("%Y%m%d_%H%M%S")));
        if self
            .store
            .read::<DiffRecord>(EntityKind::Diff, &id)
            .await?
            .is_some()
        {
            return Err(CoreError::Internal(anyhow::anyhow!(
                "diff {id} already exists"
            )));
        }

        let record = DiffRecord {
            id,
            created_at: now,
            since_time: diffs.iter().map(|d| d.created_at).max(),
            status: DiffStatus::Pending,
            transfers: Default::default(),
            archive_path: new.archive_path,
            archive_size: new.archive_size,
            file_count: new.file_count,
            snapshot_time: new.snapshot_time,
        };
        self.store
            .write(EntityKind::Diff, &record.id, &record)
            .await?;
        tracing::info!(diff_id = %record.id, files = record.file_count, size = record.archive_size, "created diff");
        Ok(record)
    }

    /// Record a destination's acknowledgment. Completeness is recomputed
    /// against the destinations registered right now, not at creation time,
    /// so a backfilled confirmation may re-evaluate an already Transferred
    /// diff.
    pub async fn confirm_delivery(&self, diff_id: &str, destination_id: &str) -> Result<DiffRecord> {
        let _guard = self.write_lock.lock().await;
        if self.destinations.get(destination_id).await?.is_none() {
            return Err(CoreError::UnknownDestination(destination_id.to_string()));
        }
        let mut diff = self
            .store
            .read::<DiffRecord>(EntityKind::Diff, diff_id)
            .await?
            .ok_or_else(|| CoreError::UnknownDiff(diff_id.to_string()))?;

        if diff.status == DiffStatus::Outdated {
            return Err(CoreError::Superseded {
                id: diff_id.to_string(),
            });
        }
        if diff.transfers.contains_key(destination_id) {
            return Err(CoreError::DuplicateConfirmation {
                id: diff_id.to_string(),
                destination_id: destination_id.to_string(),
            });
        }

        diff.transfers.insert(destination_id.to_string(), Utc::now());
        let registered = self.destinations.list().await?;
        let complete = registered
            .iter()
            .all(|d| diff.transfers.contains_key(&d.id));
        diff.status = if complete {
            DiffStatus::Transferred
        } else {
            DiffStatus::Partial
        };

        self.store.write(EntityKind::Diff, diff_id, &diff).await?;
        tracing::info!(diff_id, destination_id, status = ?diff.status, "delivery confirmed");
        Ok(diff)
    }

    /// Explicit operator retirement. The archive payload is retained: a
    /// lagging destination may still need it to catch up.
    pub async fn mark_outdated(&self, diff_id: &str) -> Result<DiffRecord> {
        let _guard = self.write_lock.lock().await;
        let mut diff = self
            .store
            .read::<DiffRecord>(EntityKind::Diff, diff_id)
            .await?
            .ok_or_else(|| CoreError::UnknownDiff(diff_id.to_string()))?;
        if !diff.status.is_active() {
            return Err(CoreError::Superseded {
                id: diff_id.to_string(),
            });
        }
        diff.status = DiffStatus::Outdated;
        self.store.write(EntityKind::Diff, diff_id, &diff).await?;
        tracing::info!(diff_id, "diff marked outdated");
        Ok(diff)
    }

    /// The single active diff, if any. A Pending diff found stale here is
    /// retired on the spot; a Partial diff is never auto-retired, the
    /// in-flight delivery wins over freshness.
    pub async fn active(&self) -> Result<Option<DiffRecord>> {
        let _guard = self.write_lock.lock().await;
        let diffs = self.load_all().await?;
        let Some(active) = diffs.into_iter().find(|d| d.status.is_active()) else {
            return Ok(None);
        };
        if active.status == DiffStatus::Pending && self.is_stale(&active).await {
            let mut retired = active;
            retired.status = DiffStatus::Outdated;
            self.store
                .write(EntityKind::Diff, &retired.id, &retired)
                .await?;
            tracing::info!(diff_id = %retired.id, "pending diff went stale");
            return Ok(None);
        }
        Ok(Some(active))
    }

    pub async fn get(&self, diff_id: &str) -> Result<DiffRecord> {
        self.store
            .read(EntityKind::Diff, diff_id)
            .await?
            .ok_or_else(|| CoreError::UnknownDiff(diff_id.to_string()))
    }

    /// All diffs, most recent first.
    pub async fn list(&self) -> Result<Vec<DiffRecord>> {
        let mut diffs = self.load_all().await?;
        diffs.reverse();
        Ok(diffs)
    }

    /// Display bookkeeping per destination, recomputed from diff records.
    pub async fn destination_states(&self) -> Result<Vec<DestinationState>> {
        let diffs = self.load_all().await?;
        let destinations = self.destinations.list().await?;
        Ok(destinations
            .into_iter()
            .map(|dest| {
                let mut state = DestinationState {
                    destination_id: dest.id.clone(),
                    last_sync_at: None,
                    last_diff_id: None,
                    file_count: 0,
                    total_bytes: 0,
                };
                for diff in &diffs {
                    if let Some(at) = diff.transfers.get(&dest.id) {
                        state.file_count += diff.file_count;
                        state.total_bytes += diff.archive_size;
                        if state.last_sync_at.map_or(true, |prev| *at > prev) {
                            state.last_sync_at = Some(*at);
                            state.last_diff_id = Some(diff.id.clone());
                        }
                    }
                }
                state
            })
            .collect())
    }

    // Oldest first.
    async fn load_all(&self) -> Result<Vec<DiffRecord>> {
        let mut diffs: Vec<DiffRecord> = self.store.list_all(EntityKind::Diff).await?;
        diffs.sort_by_key(|d| d.created_at);
        Ok(diffs)
    }

    async fn is_stale(&self, diff: &DiffRecord) -> bool {
        let scanner = self.scanner.clone();
        let cutoff = diff.created_at;
        match tokio::task::spawn_blocking(move || scanner.has_newer_archive(cutoff)).await {
            Ok(Ok(stale)) => stale,
            Ok(Err(e)) => {
                tracing::warn!(diff_id = %diff.id, error = %e, "staleness scan failed, assuming fresh");
                false
            }
            Err(e) => {
                tracing::warn!(diff_id = %diff.id, error = %e, "staleness scan panicked, assuming fresh");
                false
            }
        }
    }
}

async fn reclaim_archive(diff: &DiffRecord) {
    let Some(path) = &diff.archive_path else {
        return;
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::info!(diff_id = %diff.id, path = %path.display(), "reclaimed delivered archive")
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(diff_id = %diff.id, path = %path.display(), error = %e, "failed to reclaim archive")
        }
    }
}
