//! Content hashes of the last presence applied per subject.

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use presence_core::result::AppResult;
use presence_core::types::PresenceSnapshot;

/// SHA-256 over the JSON of `(status, activities)`, hex encoded.
///
/// `last_updated` is deliberately not part of the input: two observations of
/// the same state hash equal.
pub fn content_hash(snapshot: &PresenceSnapshot) -> AppResult<String> {
    let bytes = serde_json::to_vec(&(snapshot.status, &snapshot.activities))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Last applied hash per subject, shared by the push path and the reconciler.
#[derive(Debug, Default)]
pub struct HashLedger {
    hashes: DashMap<String, String>,
}

impl HashLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash last recorded for `subject_id`.
    pub fn get(&self, subject_id: &str) -> Option<String> {
        self.hashes.get(subject_id).map(|hash| hash.value().clone())
    }

    /// Record `hash` as the last applied state of `subject_id`.
    pub fn record(&self, subject_id: &str, hash: String) {
        self.hashes.insert(subject_id.to_string(), hash);
    }

    /// Forget every subject.
    pub fn clear(&self) {
        self.hashes.clear();
    }

    /// Number of subjects with a recorded hash.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether no subject has a recorded hash.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
