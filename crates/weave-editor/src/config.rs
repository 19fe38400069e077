//! Store tuning knobs.

use serde::{Deserialize, Serialize};

/// Timing and capacity settings for one [`crate::store::ElementGraphStore`].
///
/// Missing keys in JSON fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Entries kept per history timeline; the oldest are dropped.
    pub history_limit: usize,
    /// Debounce window of the per-scope reorder pass.
    pub reorder_delay_ms: u64,
    /// Delay before the selected element's props are fully resolved.
    pub hydrate_delay_ms: u64,
    /// Delay before queued persistence ops are flushed.
    pub persist_delay_ms: u64,
    /// Outcomes kept in the persistence log; the oldest are dropped.
    pub persist_log_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            reorder_delay_ms: 100,
            hydrate_delay_ms: 50,
            persist_delay_ms: 0,
            persist_log_limit: 500,
        }
    }
}

impl StoreConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
