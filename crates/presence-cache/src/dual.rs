//! Dual-tier cache: in-process tier in front of an optional remote tier.
//!
//! Reads prefer a live in-process entry, then the remote tier. When the
//! remote tier is expected but unreachable, an expired in-process entry is
//! still returned. Writes always land in-process; the remote write is best
//! effort and its failure is reported, never raised.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use presence_core::config::{CacheConfig, TtlConfig};
use presence_core::error::AppError;
use presence_core::shutdown::{self, ShutdownReceiver};
use presence_core::traits::cache::{RemoteCacheTier, RemoteValue, RemoteWrite};
use presence_core::types::PresenceRecord;

use crate::keys;
use crate::memory::MemoryTier;

/// What happened to the remote half of a write.
#[derive(Debug, Clone)]
pub enum RemoteOutcome {
    /// The remote tier accepted the record.
    Written,
    /// The remote tier holds a newer record.
    Skipped,
    /// The remote write failed; the record lives in-process only.
    Failed(AppError),
    /// No remote tier is attached.
    Detached,
}

/// Per-subject result of a cache write.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// Subject written.
    pub subject_id: String,
    /// Whether the in-process tier now holds this record.
    pub stored_locally: bool,
    /// Remote tier result.
    pub remote: RemoteOutcome,
}

impl WriteOutcome {
    /// `false` only when the remote write was attempted and failed.
    pub fn is_ok(&self) -> bool {
        !matches!(self.remote, RemoteOutcome::Failed(_))
    }
}

/// Cache statistics for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// In-process entries, expired ones awaiting a sweep included.
    pub local_entries: usize,
    /// Whether a remote tier is attached.
    pub remote_attached: bool,
    /// Whether the last remote call succeeded.
    pub remote_available: bool,
    /// Reads served by a live in-process entry.
    pub local_hits: u64,
    /// Reads served by the remote tier.
    pub remote_hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Reads served by an expired entry because the remote tier was down.
    pub degraded_reads: u64,
    /// Failed remote calls.
    pub remote_errors: u64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    degraded_reads: AtomicU64,
    remote_errors: AtomicU64,
}

/// Presence cache over an in-process and a remote tier.
#[derive(Debug)]
pub struct DualTierCache {
    local: MemoryTier,
    remote: RwLock<Option<Arc<dyn RemoteCacheTier>>>,
    /// Whether a remote tier belongs in this deployment. Without one, expired
    /// entries are plain misses.
    remote_expected: bool,
    remote_available: AtomicBool,
    ttl: TtlConfig,
    stale_grace: Duration,
    sweep_interval: Duration,
    counters: CacheCounters,
}

impl DualTierCache {
    /// Create a cache from configuration. The remote tier, if enabled, is
    /// attached later with [`attach_remote`](Self::attach_remote).
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            local: MemoryTier::new(),
            remote: RwLock::new(None),
            remote_expected: config.remote_enabled,
            remote_available: AtomicBool::new(false),
            ttl: config.ttl.clone(),
            stale_grace: config.stale_grace(),
            sweep_interval: config.sweep_interval(),
            counters: CacheCounters::default(),
        }
    }

    /// Create a cache with the remote tier already attached.
    pub fn with_remote(config: &CacheConfig, remote: Arc<dyn RemoteCacheTier>) -> Self {
        let cache = Self::new(&CacheConfig {
            remote_enabled: true,
            ..config.clone()
        });
        cache.attach_remote(remote);
        cache
    }

    /// Create a cache that never uses a remote tier.
    pub fn local_only(config: &CacheConfig) -> Self {
        Self::new(&CacheConfig {
            remote_enabled: false,
            ..config.clone()
        })
    }

    /// Install (or replace) the remote tier.
    pub fn attach_remote(&self, remote: Arc<dyn RemoteCacheTier>) {
        info!(tier = ?remote, "Remote cache tier attached");
        *self.remote.write() = Some(remote);
        self.remote_available.store(true, Ordering::Relaxed);
    }

    /// TTL policy in use.
    pub fn ttl_policy(&self) -> &TtlConfig {
        &self.ttl
    }

    fn remote(&self) -> Option<Arc<dyn RemoteCacheTier>> {
        self.remote.read().clone()
    }

    fn version(record: &PresenceRecord) -> i64 {
        record.last_updated.timestamp_millis()
    }

    fn mark_available(&self) {
        if !self.remote_available.swap(true, Ordering::Relaxed) {
            info!("Remote cache tier reachable again");
        }
    }

    fn mark_unavailable(&self, err: &AppError) {
        self.counters.remote_errors.fetch_add(1, Ordering::Relaxed);
        if self.remote_available.swap(false, Ordering::Relaxed) {
            warn!(error = %err, "Remote cache tier unavailable, degrading to in-process tier");
        }
    }

    fn decode(&self, key: &str, payload: &str) -> Option<PresenceRecord> {
        match serde_json::from_str(payload) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable remote cache payload");
                None
            }
        }
    }

    /// Install a remote hit in-process for the rest of its remote lifetime.
    fn repopulate(&self, key: &str, value: RemoteValue) -> Option<PresenceRecord> {
        let record = self.decode(key, &value.payload)?;
        let ttl = value
            .ttl_remaining
            .unwrap_or_else(|| self.ttl.for_status(record.status));
        self.local.insert_if_newer(key, record.clone(), ttl);
        self.counters.remote_hits.fetch_add(1, Ordering::Relaxed);
        Some(record)
    }

    /// Fallback when the remote tier cannot answer.
    fn degraded(&self, key: &str) -> Option<PresenceRecord> {
        if self.remote_expected {
            if let Some(record) = self.local.get_stale(key) {
                self.counters.degraded_reads.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Serving expired in-process entry while remote tier is down");
                return Some(record);
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Read one subject's record.
    pub async fn get(&self, subject_id: &str) -> Option<PresenceRecord> {
        let key = keys::presence(subject_id);
        if let Some(record) = self.local.get(&key) {
            self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
            return Some(record);
        }

        let Some(remote) = self.remote() else {
            return self.degraded(&key);
        };
        match remote.get(&key).await {
            Ok(Some(value)) => {
                self.mark_available();
                let record = self.repopulate(&key, value);
                if record.is_none() {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                }
                record
            }
            Ok(None) => {
                self.mark_available();
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.mark_unavailable(&e);
                self.degraded(&key)
            }
        }
    }

    /// Read many subjects with at most one remote round trip. Subjects with
    /// no record are absent from the result.
    pub async fn get_many(&self, subject_ids: &[String]) -> HashMap<String, PresenceRecord> {
        let mut found = HashMap::with_capacity(subject_ids.len());
        let mut seen = HashSet::with_capacity(subject_ids.len());
        let mut missing = Vec::new();

        for subject_id in subject_ids {
            if !seen.insert(subject_id.as_str()) {
                continue;
            }
            match self.local.get(&keys::presence(subject_id)) {
                Some(record) => {
                    self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
                    found.insert(subject_id.clone(), record);
                }
                None => missing.push(subject_id.clone()),
            }
        }
        if missing.is_empty() {
            return found;
        }

        let remote_keys: Vec<String> = missing.iter().map(|id| keys::presence(id)).collect();
        let fetched = match self.remote() {
            Some(remote) => match remote.get_many(&remote_keys).await {
                Ok(values) => {
                    self.mark_available();
                    Some(values)
                }
                Err(e) => {
                    self.mark_unavailable(&e);
                    None
                }
            },
            None => None,
        };

        match fetched {
            Some(values) => {
                for ((subject_id, key), value) in missing.into_iter().zip(&remote_keys).zip(values)
                {
                    match value.and_then(|value| self.repopulate(key, value)) {
                        Some(record) => {
                            found.insert(subject_id, record);
                        }
                        None => {
                            self.counters.misses.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
            None => {
                for (subject_id, key) in missing.into_iter().zip(&remote_keys) {
                    if let Some(record) = self.degraded(key) {
                        found.insert(subject_id, record);
                    }
                }
            }
        }
        found
    }

    /// Write one record to both tiers. Never fails because of the remote tier.
    pub async fn set(&self, record: &PresenceRecord) -> WriteOutcome {
        let key = keys::presence(&record.subject_id);
        let ttl = self.ttl.for_status(record.status);
        let stored_locally = self.local.insert_if_newer(&key, record.clone(), ttl);

        let remote = match self.remote() {
            None => RemoteOutcome::Detached,
            Some(remote) => match serde_json::to_string(record) {
                Err(e) => RemoteOutcome::Failed(AppError::from(e)),
                Ok(payload) => {
                    match remote
                        .set_if_newer(&key, &payload, Self::version(record), ttl)
                        .await
                    {
                        Ok(true) => {
                            self.mark_available();
                            RemoteOutcome::Written
                        }
                        Ok(false) => {
                            self.mark_available();
                            RemoteOutcome::Skipped
                        }
                        Err(e) => {
                            self.mark_unavailable(&e);
                            RemoteOutcome::Failed(e)
                        }
                    }
                }
            },
        };
        self.settle(&key, stored_locally, &record.subject_id, remote)
    }

    /// Write many records, with at most one remote round trip. One outcome
    /// per record, in input order.
    pub async fn set_many(&self, records: &[PresenceRecord]) -> Vec<WriteOutcome> {
        let mut local = Vec::with_capacity(records.len());
        let mut remote: Vec<Option<RemoteOutcome>> = Vec::with_capacity(records.len());
        let mut writes = Vec::new();
        let mut pending = Vec::new();
        let tier = self.remote();

        for (index, record) in records.iter().enumerate() {
            let key = keys::presence(&record.subject_id);
            let ttl = self.ttl.for_status(record.status);
            local.push(self.local.insert_if_newer(&key, record.clone(), ttl));

            if tier.is_none() {
                remote.push(Some(RemoteOutcome::Detached));
                continue;
            }
            match serde_json::to_string(record) {
                Ok(payload) => {
                    writes.push(RemoteWrite {
                        key,
                        payload,
                        version: Self::version(record),
                        ttl,
                    });
                    pending.push(index);
                    remote.push(None);
                }
                Err(e) => remote.push(Some(RemoteOutcome::Failed(AppError::from(e)))),
            }
        }

        if let Some(tier) = tier.filter(|_| !writes.is_empty()) {
            match tier.set_many_if_newer(&writes).await {
                Ok(results) => {
                    self.mark_available();
                    for (index, result) in pending.iter().zip(results) {
                        remote[*index] = Some(match result {
                            Ok(true) => RemoteOutcome::Written,
                            Ok(false) => RemoteOutcome::Skipped,
                            Err(e) => RemoteOutcome::Failed(e),
                        });
                    }
                }
                Err(e) => {
                    self.mark_unavailable(&e);
                    for index in &pending {
                        remote[*index] = Some(RemoteOutcome::Failed(e.clone()));
                    }
                }
            }
        }

        records
            .iter()
            .zip(local)
            .zip(remote)
            .map(|((record, stored_locally), outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    RemoteOutcome::Failed(AppError::cache("Remote tier returned no result"))
                });
                let key = keys::presence(&record.subject_id);
                self.settle(&key, stored_locally, &record.subject_id, outcome)
            })
            .collect()
    }

    /// Log a failed remote write, and drop an in-process copy the remote tier
    /// just proved stale so the next read picks up the newer record.
    fn settle(
        &self,
        key: &str,
        stored_locally: bool,
        subject_id: &str,
        remote: RemoteOutcome,
    ) -> WriteOutcome {
        match &remote {
            RemoteOutcome::Failed(e) => {
                warn!(subject_id, error = %e, "Remote cache write failed, kept in-process only");
            }
            RemoteOutcome::Skipped if stored_locally => {
                self.local.remove(key);
            }
            _ => {}
        }
        WriteOutcome {
            subject_id: subject_id.to_string(),
            stored_locally,
            remote,
        }
    }

    /// Remove a subject from both tiers.
    pub async fn invalidate(&self, subject_id: &str) {
        let key = keys::presence(subject_id);
        self.local.remove(&key);
        if let Some(remote) = self.remote() {
            match remote.delete(&key).await {
                Ok(()) => self.mark_available(),
                Err(e) => {
                    self.mark_unavailable(&e);
                    warn!(subject_id, error = %e, "Remote cache invalidation failed");
                }
            }
        }
        debug!(subject_id, "Cache entry invalidated");
    }

    /// Drop in-process entries expired for longer than the stale grace window.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.local.sweep(self.stale_grace);
        if removed > 0 {
            debug!(removed, remaining = self.local.len(), "Swept expired cache entries");
        }
        removed
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every sweep interval until
    /// shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: ShutdownReceiver) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            let stop = shutdown::signalled(shutdown);
            tokio::pin!(stop);
            loop {
                tokio::select! {
                    _ = &mut stop => {
                        info!("Cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.sweep_expired();
                    }
                }
            }
        })
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local_entries: self.local.len(),
            remote_attached: self.remote.read().is_some(),
            remote_available: self.remote_available.load(Ordering::Relaxed),
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            remote_hits: self.counters.remote_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            degraded_reads: self.counters.degraded_reads.load(Ordering::Relaxed),
            remote_errors: self.counters.remote_errors.load(Ordering::Relaxed),
        }
    }
}
