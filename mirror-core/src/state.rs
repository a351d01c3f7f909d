use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{CoreError, Result};
use crate::services::destination_registry::DestinationRegistry;
use crate::services::diff_lifecycle::DiffLifecycle;
use crate::services::job_orchestrator::JobOrchestrator;
use crate::services::repo_scan::{FsRepositoryScan, RepositoryScan};
use crate::store::EntityStore;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<EntityStore>,
    pub destinations: DestinationRegistry,
    pub diffs: DiffLifecycle,
    pub jobs: JobOrchestrator,
}

impl AppState {
    /// Wire the core and run the startup hooks: directory layout, default
    /// destination seeding, and reconciliation of job records orphaned by a
    /// previous crash. Must complete before the request layer serves
    /// anything.
    pub async fn init(config: AppConfig) -> Result<Self> {
        let config = Arc::new(config);
        let locks_dir = config.runtime_dir.join("locks");
        for dir in [
            &config.data_dir,
            &config.runtime_dir,
            &locks_dir,
            &config.logs_dir,
            &config.archives_dir,
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| CoreError::io(dir, e))?;
        }

        let store = Arc::new(EntityStore::new(&config.data_dir));
        store.init().await?;

        let destinations = DestinationRegistry::new(store.clone());
        destinations.ensure_default().await?;

        let scanner: Arc<dyn RepositoryScan> =
            Arc::new(FsRepositoryScan::new(&config.storage_dir));
        let diffs = DiffLifecycle::new(store.clone(), destinations.clone(), scanner);

        let jobs = JobOrchestrator::new(store.clone(), config.clone());
        let repaired = jobs.reconcile().await?;
        if repaired > 0 {
            tracing::info!(repaired, "reconciled orphaned job records at startup");
        }

        Ok(Self {
            config,
            store,
            destinations,
            diffs,
            jobs,
        })
    }
}
