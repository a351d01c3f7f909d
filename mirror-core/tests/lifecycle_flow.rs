//! End-to-end flows through `AppState`: a diff-build job feeding the
//! lifecycle, multi-destination acknowledgment, archive retention, and
//! staleness retirement against a real storage tree.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use mirror_core::models::destination::CreateDestination;
use mirror_core::models::diff::{DiffStatus, NewDiff};
use mirror_core::models::job::{JobParams, JobStatus};
use mirror_core::{AppConfig, AppState};
use tempfile::TempDir;

fn test_config(root: &Path) -> AppConfig {
    AppConfig {
        data_dir: root.join("data"),
        storage_dir: root.join("storage"),
        frozen_dir: root.join("frozen"),
        archives_dir: root.join("archives"),
        runtime_dir: root.join("runtime"),
        logs_dir: root.join("logs"),
        scripts_dir: root.join("scripts"),
        job_runner: "/bin/sh".into(),
        registry_url: "http://localhost:8013/".into(),
        parallel_jobs: 4,
        log_level: "info".into(),
    }
}

async fn wait_done(state: &AppState, task_id: &str) {
    for _ in 0..400 {
        if !state.jobs.is_running(task_id) {
            tokio::time::sleep(Duration::from_millis(25)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {task_id} did not finish in time");
}

async fn add_destination(state: &AppState, id: &str) {
    state
        .destinations
        .create(CreateDestination {
            id: Some(id.to_string()),
            name: id.to_string(),
            description: String::new(),
            color: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn diff_build_delivery_and_retention_flow() {
    let root = TempDir::new().unwrap();
    let state = AppState::init(test_config(root.path())).await.unwrap();
    add_destination(&state, "alpha").await;
    add_destination(&state, "beta").await;

    // stand-in for create_diff.py honoring the job contract
    std::fs::create_dir_all(state.config.scripts_dir.clone()).unwrap();
    std::fs::write(
        state.config.scripts_dir.join("create_diff.py"),
        r#"
ARCHIVE="$DIFF_ARCHIVES_DIR/$DIFF_ID.tar.gz"
printf 'payload' > "$ARCHIVE"
echo '{"status":"completed","message":"diff created"}' > "$STATUS_FILE"
echo "{\"diffId\":\"$DIFF_ID\",\"filesCount\":4,\"archivePath\":\"$ARCHIVE\",\"archiveSize\":7,\"storageSnapshotTime\":\"2025-03-01T10:20:30.5\"}"
"#,
    )
    .unwrap();

    state
        .jobs
        .launch("build-1", JobParams::DiffBuild { diff_id: "diff_d1".into() })
        .await
        .unwrap();
    wait_done(&state, "build-1").await;

    let record = state.jobs.poll("build-1").await.unwrap().record.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    let summary = record.summary.expect("diff-build summary");
    assert_eq!(summary.diff_id.as_deref(), Some("diff_d1"));

    // the request layer records the built diff
    let d1 = state.diffs.create(NewDiff::from_summary(&summary)).await.unwrap();
    assert_eq!(d1.id, "diff_d1");
    assert_eq!(d1.status, DiffStatus::Pending);
    assert_eq!(d1.file_count, 4);
    assert!(d1.since_time.is_none());

    // acknowledgments from each registered network (default is seeded)
    let d1 = state.diffs.confirm_delivery("diff_d1", "alpha").await.unwrap();
    assert_eq!(d1.status, DiffStatus::Partial);
    let d1 = state.diffs.confirm_delivery("diff_d1", "beta").await.unwrap();
    assert_eq!(d1.status, DiffStatus::Partial);
    let d1 = state.diffs.confirm_delivery("diff_d1", "default").await.unwrap();
    assert_eq!(d1.status, DiffStatus::Transferred);

    let archive_d1 = state.config.archives_dir.join("diff_d1.tar.gz");
    assert!(archive_d1.exists());

    // the next diff reclaims the delivered payload and chains since_time
    let d2 = state
        .diffs
        .create(NewDiff {
            id: Some("diff_d2".into()),
            archive_path: Some(state.config.archives_dir.join("diff_d2.tar.gz")),
            archive_size: 3,
            file_count: 1,
            snapshot_time: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(d2.status, DiffStatus::Pending);
    assert_eq!(d2.since_time, Some(d1.created_at));
    assert!(!archive_d1.exists());

    let ids: Vec<String> = state
        .diffs
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(ids, vec!["diff_d2", "diff_d1"]);

    let states = state.diffs.destination_states().await.unwrap();
    let alpha = states.iter().find(|s| s.destination_id == "alpha").unwrap();
    assert_eq!(alpha.last_diff_id.as_deref(), Some("diff_d1"));
    assert_eq!(alpha.file_count, 4);
}

#[tokio::test]
async fn newer_storage_content_retires_pending_diff() {
    let root = TempDir::new().unwrap();
    let state = AppState::init(test_config(root.path())).await.unwrap();

    let archive = state.config.archives_dir.join("diff_d1.tar.gz");
    std::fs::write(&archive, b"payload").unwrap();
    let d1 = state
        .diffs
        .create(NewDiff {
            id: Some("diff_d1".into()),
            archive_path: Some(archive.clone()),
            archive_size: 7,
            file_count: 2,
            snapshot_time: Utc::now(),
        })
        .await
        .unwrap();
    assert!(state.diffs.active().await.unwrap().is_some());

    // new package content lands in storage after the diff was built; the
    // sleep keeps coarse filesystem mtimes strictly past created_at
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let pkg = state.config.storage_dir.join("lodash");
    std::fs::create_dir_all(&pkg).unwrap();
    std::fs::write(pkg.join("lodash-4.17.21.tgz"), b"tarball").unwrap();

    assert!(state.diffs.active().await.unwrap().is_none());
    let d1 = state.diffs.get(&d1.id).await.unwrap();
    assert_eq!(d1.status, DiffStatus::Outdated);
    // superseded archives stay available for lagging destinations
    assert!(archive.exists());

    let d2 = state
        .diffs
        .create(NewDiff {
            id: Some("diff_d2".into()),
            archive_path: None,
            archive_size: 0,
            file_count: 0,
            snapshot_time: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(d2.status, DiffStatus::Pending);
    assert_eq!(d2.since_time, Some(d1.created_at));
    assert!(archive.exists());
}

#[tokio::test]
async fn startup_reconciliation_runs_before_serving() {
    let root = TempDir::new().unwrap();

    // first life: a job is launched and the "process" outlives the service
    {
        let state = AppState::init(test_config(root.path())).await.unwrap();
        std::fs::create_dir_all(state.config.scripts_dir.clone()).unwrap();
        std::fs::write(state.config.scripts_dir.join("update_all.py"), "sleep 30\n").unwrap();
        state.jobs.launch("sync-1", JobParams::FullSync).await.unwrap();
        assert!(state.jobs.is_running("sync-1"));
        state.jobs.cancel("sync-1");
        // dropping state without waiting simulates the crash; the record may
        // still say running
    }

    // second life: init reconciles whatever was left running
    let state = AppState::init(test_config(root.path())).await.unwrap();
    assert!(!state.jobs.is_running("sync-1"));
    let record = state.jobs.poll("sync-1").await.unwrap().record.unwrap();
    assert!(record.status.is_terminal());

    // the default destination is in place as well
    assert!(state.destinations.get("default").await.unwrap().is_some());
}
