use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root of the entity store (diff/destination/job records).
    pub data_dir: PathBuf,
    /// Live package storage of the mirror; scanned for staleness checks.
    pub storage_dir: PathBuf,
    /// Last-shipped snapshot the diff-build job compares storage against.
    pub frozen_dir: PathBuf,
    /// Where diff-build jobs place archive payloads.
    pub archives_dir: PathBuf,
    /// Ephemeral progress/status documents and per-kind job locks.
    pub runtime_dir: PathBuf,
    /// Free-text log streams of external jobs.
    pub logs_dir: PathBuf,
    /// Directory holding the external job scripts.
    pub scripts_dir: PathBuf,
    /// Interpreter the job scripts are launched with.
    pub job_runner: String,
    pub registry_url: String,
    pub parallel_jobs: usize,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mirror_home = PathBuf::from(
            std::env::var("MIRROR_HOME").unwrap_or_else(|_| "/home/npm/verdaccio".into()),
        );
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| mirror_home.join("data"));

        Self {
            storage_dir: std::env::var("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| mirror_home.join("storage")),
            frozen_dir: std::env::var("FROZEN_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| mirror_home.join("frozen")),
            archives_dir: std::env::var("DIFF_ARCHIVES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| mirror_home.join("diff_archives")),
            scripts_dir: std::env::var("SCRIPTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| mirror_home.join("scripts")),
            runtime_dir: data_dir.join("runtime"),
            logs_dir: data_dir.join("logs"),
            job_runner: std::env::var("JOB_RUNNER").unwrap_or_else(|_| "python3".into()),
            registry_url: std::env::var("REGISTRY_URL")
                .unwrap_or_else(|_| "http://localhost:8013/".into()),
            parallel_jobs: std::env::var("PARALLEL_JOBS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(40),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            data_dir,
        }
    }
}
