pub mod destination_registry;
pub mod diff_lifecycle;
pub mod job_orchestrator;
pub mod repo_scan;
