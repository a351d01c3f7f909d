//! Core state machinery for the offline package mirror service.
//!
//! The mirror lives on a connected host; disconnected destination networks
//! receive its content as incremental diff archives carried over by hand.
//! This crate owns the bookkeeping around that flow: a crash-safe file-backed
//! entity store, the diff lifecycle state machine with per-destination
//! acknowledgment tracking, the destination registry, and the orchestrator
//! supervising the external sync/build jobs. Delta computation, archive
//! building, storage indexing, and the HTTP layer are external collaborators.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod store;

pub use config::AppConfig;
pub use error::{CoreError, Result};
pub use state::AppState;
