//! Event ingestor trait, the boundary to the real-time push connection.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::PresenceSnapshot;

/// Pull interface over whatever maintains the live presence view.
///
/// In production this is the local presence snapshot of a persistent
/// real-time connection; the reconciler only ever asks it for the current
/// state, never subscribes to it.
#[async_trait]
pub trait EventIngestor: Send + Sync + std::fmt::Debug {
    /// All subjects the ingestor currently has state for.
    async fn tracked_subjects(&self) -> AppResult<Vec<String>>;

    /// The most recently observed `(status, activities)` for a subject.
    async fn snapshot(&self, subject_id: &str) -> AppResult<Option<PresenceSnapshot>>;
}
