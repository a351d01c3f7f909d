use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The well-known destination every installation ships with. It cannot be
/// deleted.
pub const DEFAULT_DESTINATION_ID: &str = "default";

/// A named delivery target: a physically disconnected network that must
/// separately acknowledge receipt of each diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Presentation hint only.
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDestination {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// Partial update; only provided fields are merged.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct UpdateDestination {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
}

/// Derived per-destination bookkeeping for display. Not authoritative and
/// recomputed from diff records on demand.
#[derive(Debug, Clone, Serialize)]
pub struct DestinationState {
    pub destination_id: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_diff_id: Option<String>,
    pub file_count: u64,
    pub total_bytes: u64,
}
