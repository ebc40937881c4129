//! Latest push-channel state per subject.

use async_trait::async_trait;
use dashmap::DashMap;

use presence_core::result::AppResult;
use presence_core::traits::EventIngestor;
use presence_core::types::PresenceSnapshot;

/// In-process view of what the push channel last delivered for each subject.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: DashMap<String, PresenceSnapshot>,
}

impl SnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot for `subject_id`.
    pub fn update(&self, subject_id: &str, snapshot: PresenceSnapshot) {
        self.snapshots.insert(subject_id.to_string(), snapshot);
    }

    /// Stop tracking `subject_id`.
    pub fn remove(&self, subject_id: &str) -> Option<PresenceSnapshot> {
        self.snapshots.remove(subject_id).map(|(_, snapshot)| snapshot)
    }

    /// Number of tracked subjects.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no subject is tracked.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait]
impl EventIngestor for SnapshotStore {
    async fn tracked_subjects(&self) -> AppResult<Vec<String>> {
        let mut subjects: Vec<String> = self.snapshots.iter().map(|e| e.key().clone()).collect();
        subjects.sort();
        Ok(subjects)
    }

    async fn snapshot(&self, subject_id: &str) -> AppResult<Option<PresenceSnapshot>> {
        Ok(self.snapshots.get(subject_id).map(|e| e.value().clone()))
    }
}
