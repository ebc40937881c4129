//! Live push path.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use presence_cache::{DualTierCache, WriteOutcome};
use presence_core::error::AppError;
use presence_core::result::AppResult;
use presence_core::types::{PresenceRecord, RecordOrigin, WirePresence};

use crate::ledger::{HashLedger, content_hash};
use crate::snapshot::SnapshotStore;

/// Write `record` to the cache and, once every tier has it, record `hash` as
/// applied. Shared by push updates and reconciliation repairs.
pub(crate) async fn apply(
    cache: &DualTierCache,
    ledger: &HashLedger,
    record: &PresenceRecord,
    hash: String,
) -> WriteOutcome {
    let outcome = cache.set(record).await;
    if outcome.is_ok() {
        ledger.record(&record.subject_id, hash);
    }
    outcome
}

/// Applies presence updates delivered by the real-time push channel.
#[derive(Debug, Clone)]
pub struct PushHandler {
    cache: Arc<DualTierCache>,
    ledger: Arc<HashLedger>,
    store: Arc<SnapshotStore>,
}

impl PushHandler {
    /// Create a handler writing to `cache`, `ledger` and `store`.
    pub fn new(cache: Arc<DualTierCache>, ledger: Arc<HashLedger>, store: Arc<SnapshotStore>) -> Self {
        Self {
            cache,
            ledger,
            store,
        }
    }

    /// Apply one presence update.
    pub async fn handle(&self, payload: WirePresence) -> AppResult<WriteOutcome> {
        let subject_id = payload
            .subject_id()
            .map(str::to_string)
            .ok_or_else(|| AppError::invalid_request("Presence update carries no user id"))?;

        let record = payload.into_record(&subject_id, RecordOrigin::Push, Utc::now());
        let snapshot = record.snapshot();
        let hash = content_hash(&snapshot)?;
        self.store.update(&subject_id, snapshot);

        let outcome = apply(&self.cache, &self.ledger, &record, hash).await;
        if outcome.is_ok() {
            debug!(subject_id = %subject_id, status = record.status.as_str(), "Applied presence update");
        } else {
            warn!(subject_id = %subject_id, "Presence update reached the in-process tier only");
        }
        Ok(outcome)
    }

    /// Apply one presence update from its raw JSON.
    pub async fn handle_json(&self, raw: &str) -> AppResult<WriteOutcome> {
        let payload: WirePresence = serde_json::from_str(raw)?;
        self.handle(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use presence_core::config::CacheConfig;
    use presence_core::error::ErrorKind;
    use presence_core::traits::EventIngestor;
    use presence_core::types::PresenceStatus;

    fn handler() -> (PushHandler, Arc<DualTierCache>, Arc<HashLedger>, Arc<SnapshotStore>) {
        let cache = Arc::new(DualTierCache::local_only(&CacheConfig::default()));
        let ledger = Arc::new(HashLedger::new());
        let store = Arc::new(SnapshotStore::new());
        let handler = PushHandler::new(cache.clone(), ledger.clone(), store.clone());
        (handler, cache, ledger, store)
    }

    #[tokio::test]
    async fn test_push_updates_cache_ledger_and_store() {
        let (handler, cache, ledger, store) = handler();
        handler
            .handle_json(
                r#"{"user": {"id": "42"}, "status": "dnd",
                    "activities": [{"name": "Focus", "type": 4, "state": "heads down"}]}"#,
            )
            .await
            .unwrap();

        let record = cache.get("42").await.unwrap();
        assert_eq!(record.status, PresenceStatus::DoNotDisturb);
        assert_eq!(record.origin, RecordOrigin::Push);
        assert_eq!(
            ledger.get("42").unwrap(),
            content_hash(&record.snapshot()).unwrap()
        );
        assert_eq!(store.snapshot("42").await.unwrap(), Some(record.snapshot()));
    }

    #[tokio::test]
    async fn test_push_without_user_is_rejected() {
        let (handler, _, ledger, _) = handler();
        let err = handler
            .handle_json(r#"{"status": "online"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert!(ledger.is_empty());
    }
}
