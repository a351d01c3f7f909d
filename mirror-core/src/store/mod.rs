//! File-backed entity store: one JSON document per (kind, id), written with
//! a temp-file-then-rename so a reader never observes a half-written record.
//! Read failures are downgraded to "absent" (corruption is logged at warn
//! level, missing files are not); only write failures surface as errors.

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Diff,
    Destination,
    Job,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Diff, EntityKind::Destination, EntityKind::Job];

    fn dir(self) -> &'static str {
        match self {
            EntityKind::Diff => "diffs",
            EntityKind::Destination => "destinations",
            EntityKind::Job => "jobs",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityStore {
    root: PathBuf,
}

impl EntityStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn init(&self) -> Result<()> {
        for kind in EntityKind::ALL {
            let dir = self.root.join(kind.dir());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| CoreError::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn record_path(&self, kind: EntityKind, id: &str) -> PathBuf {
        self.root.join(kind.dir()).join(format!("{id}.json"))
    }

    /// Atomically replace the record: serialize, write a sibling temp file,
    /// rename over the final path. Worst case under a crash is that the
    /// previously committed version remains.
    pub async fn write<T: Serialize>(&self, kind: EntityKind, id: &str, record: &T) -> Result<()> {
        check_id(id)?;
        let path = self.record_path(kind, id);
        let tmp = path.with_extension("json.tmp");
        let bytes =
            serde_json::to_vec_pretty(record).map_err(|e| CoreError::Internal(e.into()))?;
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CoreError::io(&path, e))?;
        Ok(())
    }

    /// Missing and unreadable records both read as `None`; a record that
    /// exists but cannot be read or parsed additionally gets a warning.
    pub async fn read<T: DeserializeOwned>(&self, kind: EntityKind, id: &str) -> Result<Option<T>> {
        check_id(id)?;
        let path = self.record_path(kind, id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "record unreadable, treating as absent");
                return Ok(None);
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "record corrupt, treating as absent");
                Ok(None)
            }
        }
    }

    /// Enumerate all records of a kind, skipping unreadable ones. No
    /// ordering guarantee; callers sort by a field.
    pub async fn list_all<T: DeserializeOwned>(&self, kind: EntityKind) -> Result<Vec<T>> {
        let dir = self.root.join(kind.dir());
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::io(&dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
                    continue;
                }
            };
            match serde_json::from_slice(&bytes) {
                Ok(v) => records.push(v),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping corrupt record");
                }
            }
        }
        Ok(records)
    }

    /// Best-effort removal; a missing target is not an error.
    pub async fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        check_id(id)?;
        let path = self.record_path(kind, id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::io(&path, e)),
        }
    }
}

// Ids become file names; refuse anything that would escape the kind dir.
fn check_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
        return Err(CoreError::Internal(anyhow!("invalid record id: {id:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        id: String,
        value: u64,
    }

    fn doc(id: &str, value: u64) -> Doc {
        Doc { id: id.into(), value }
    }

    async fn store() -> (TempDir, EntityStore) {
        let dir = TempDir::new().unwrap();
        let store = EntityStore::new(dir.path());
        store.init().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_dir, store) = store().await;
        let d = doc("a", 7);
        store.write(EntityKind::Diff, "a", &d).await.unwrap();
        let back: Option<Doc> = store.read(EntityKind::Diff, "a").await.unwrap();
        assert_eq!(back, Some(d));
    }

    #[tokio::test]
    async fn missing_record_reads_as_absent() {
        let (_dir, store) = store().await;
        let back: Option<Doc> = store.read(EntityKind::Job, "nope").await.unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn stale_temp_file_does_not_clobber_committed_version() {
        // Simulates a crash between temp write and rename: the leftover
        // temp file must not affect what readers see.
        let (_dir, store) = store().await;
        store.write(EntityKind::Diff, "a", &doc("a", 1)).await.unwrap();
        let tmp = store.record_path(EntityKind::Diff, "a").with_extension("json.tmp");
        tokio::fs::write(&tmp, b"{ partial garba").await.unwrap();

        let back: Option<Doc> = store.read(EntityKind::Diff, "a").await.unwrap();
        assert_eq!(back, Some(doc("a", 1)));
    }

    #[tokio::test]
    async fn corrupt_record_reads_as_absent() {
        let (_dir, store) = store().await;
        let path = store.record_path(EntityKind::Destination, "bad");
        tokio::fs::write(&path, b"not json at all").await.unwrap();
        let back: Option<Doc> = store.read(EntityKind::Destination, "bad").await.unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn list_skips_corrupt_and_foreign_files() {
        let (_dir, store) = store().await;
        store.write(EntityKind::Job, "j1", &doc("j1", 1)).await.unwrap();
        store.write(EntityKind::Job, "j2", &doc("j2", 2)).await.unwrap();
        tokio::fs::write(store.record_path(EntityKind::Job, "j3"), b"%%%")
            .await
            .unwrap();
        tokio::fs::write(
            store.record_path(EntityKind::Job, "j4").with_extension("json.tmp"),
            b"tmp",
        )
        .await
        .unwrap();

        let mut all: Vec<Doc> = store.list_all(EntityKind::Job).await.unwrap();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(all, vec![doc("j1", 1), doc("j2", 2)]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store().await;
        store.write(EntityKind::Diff, "a", &doc("a", 1)).await.unwrap();
        store.delete(EntityKind::Diff, "a").await.unwrap();
        store.delete(EntityKind::Diff, "a").await.unwrap();
        let back: Option<Doc> = store.read(EntityKind::Diff, "a").await.unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn rejects_path_escaping_ids() {
        let (_dir, store) = store().await;
        let err = store.write(EntityKind::Diff, "../evil", &doc("e", 0)).await;
        assert!(err.is_err());
    }
}
