//! Per-sweep reconciliation metrics.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters for one reconciliation sweep. A new value is built per sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncMetrics {
    /// When the sweep began
    pub started_at: DateTime<Utc>,
    /// Subjects the ingestor reported
    pub subjects_swept: u64,
    /// Subjects seen for the first time (hash recorded, nothing repaired)
    pub new_subjects: u64,
    /// Subjects whose hash differed from the recorded one
    pub mismatches: u64,
    /// Repairs written to the cache
    pub repairs_attempted: u64,
    /// Repairs that reached every cache tier
    pub repairs_succeeded: u64,
    /// Repairs whose remote write failed; retried next sweep
    pub repairs_failed: u64,
    /// Subjects the ingestor failed to return a snapshot for
    pub ingest_errors: u64,
    /// Wall-clock duration of the sweep, in milliseconds
    pub duration_ms: u64,
}

impl SyncMetrics {
    /// Fresh counters for a sweep starting now.
    pub fn begin() -> Self {
        Self {
            started_at: Utc::now(),
            ..Self::default()
        }
    }
}
