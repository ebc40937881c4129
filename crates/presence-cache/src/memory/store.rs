//! In-memory presence store using DashMap.
//!
//! Entries carry their own expiry. Expired entries are invisible to normal
//! reads but stay in the map until a sweep removes them, so the dual-tier
//! cache can still serve them while the remote tier is down.

use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

use presence_core::types::PresenceRecord;

/// A cached value with its absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The cached value.
    pub value: T,
    /// Instant after which normal reads no longer see the entry.
    pub expires_at: Instant,
    /// Instant the entry was written.
    pub inserted_at: Instant,
}

impl<T> CacheEntry<T> {
    /// Create an entry expiring `ttl` from now.
    pub fn new(value: T, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now + ttl,
            inserted_at: now,
        }
    }

    /// Whether the entry has expired at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// In-process presence tier.
#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: DashMap<String, CacheEntry<PresenceRecord>>,
}

impl MemoryTier {
    /// Create an empty tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unexpired record for `key`.
    pub fn get(&self, key: &str) -> Option<PresenceRecord> {
        let entry = self.entries.get(key)?;
        if entry.is_expired_at(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Record for `key` even if it has expired. Only for the degraded path.
    pub fn get_stale(&self, key: &str) -> Option<PresenceRecord> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store `record` unless a live entry with a newer `last_updated` exists.
    ///
    /// Equal timestamps overwrite. Returns `true` if the record was stored.
    pub fn insert_if_newer(&self, key: &str, record: PresenceRecord, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if !current.is_expired_at(now) && current.value.last_updated > record.last_updated
                {
                    debug!(
                        key,
                        stored = %current.value.last_updated,
                        incoming = %record.last_updated,
                        "Skipping older in-process write"
                    );
                    return false;
                }
                occupied.insert(CacheEntry::new(record, ttl));
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(record, ttl));
                true
            }
        }
    }

    /// Remove `key`. Returns `true` if it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop entries that expired more than `grace` ago. Returns how many went.
    pub fn sweep(&self, grace: Duration) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at + grace > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tier holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
