//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use presence_cache::DualTierCache;
use presence_client::{PresenceTransport, ResilientApiClient, UpstreamResponse};
use presence_core::config::AppConfig;
use presence_core::error::AppError;
use presence_core::result::AppResult;
use presence_core::shutdown;
use presence_core::traits::{RemoteCacheTier, RemoteValue, RemoteWrite};
use presence_core::types::PresenceRecord;
use presence_sync::{HashLedger, PushHandler, Reconciler, SnapshotStore};

#[derive(Debug, Clone)]
struct StoredValue {
    payload: String,
    version: i64,
    expires_at: Instant,
}

/// In-memory stand-in for the shared Redis tier, shareable between several
/// relay instances and switchable to "down".
#[derive(Debug, Default)]
pub struct SharedRemote {
    entries: DashMap<String, StoredValue>,
    down: AtomicBool,
    /// Number of read round trips (single or batched)
    pub reads: AtomicUsize,
    /// Number of write round trips (single or batched)
    pub writes: AtomicUsize,
}

impl SharedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// The record stored for `subject_id`, ignoring expiry.
    pub fn stored(&self, subject_id: &str) -> Option<PresenceRecord> {
        self.entries
            .get(&format!("presence:{subject_id}"))
            .map(|entry| serde_json::from_str(&entry.payload).unwrap())
    }

    fn check(&self) -> AppResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(AppError::cache("Connection refused"));
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Option<RemoteValue> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.expires_at <= now {
            return None;
        }
        Some(RemoteValue {
            payload: entry.payload.clone(),
            ttl_remaining: Some(entry.expires_at - now),
        })
    }

    fn write(&self, key: &str, payload: &str, version: i64, ttl: Duration) -> bool {
        let now = Instant::now();
        if let Some(current) = self.entries.get(key) {
            if current.expires_at > now && current.version > version {
                return false;
            }
        }
        self.entries.insert(
            key.to_string(),
            StoredValue {
                payload: payload.to_string(),
                version,
                expires_at: now + ttl,
            },
        );
        true
    }
}

#[async_trait]
impl RemoteCacheTier for SharedRemote {
    async fn get(&self, key: &str) -> AppResult<Option<RemoteValue>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.read(key))
    }

    async fn get_many(&self, keys: &[String]) -> AppResult<Vec<Option<RemoteValue>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(keys.iter().map(|key| self.read(key)).collect())
    }

    async fn set_if_newer(
        &self,
        key: &str,
        payload: &str,
        version: i64,
        ttl: Duration,
    ) -> AppResult<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.write(key, payload, version, ttl))
    }

    async fn set_many_if_newer(&self, writes: &[RemoteWrite]) -> AppResult<Vec<AppResult<bool>>> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(writes
            .iter()
            .map(|w| Ok(self.write(&w.key, &w.payload, w.version, w.ttl)))
            .collect())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.check()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(self.check().is_ok())
    }
}

/// Upstream response body for a subject with one activity.
pub fn presence_body(status: &str, activity: Option<&str>) -> String {
    match activity {
        Some(name) => {
            format!(r#"{{"status": "{status}", "activities": [{{"name": "{name}", "type": 0}}]}}"#)
        }
        None => format!(r#"{{"status": "{status}", "activities": []}}"#),
    }
}

/// Transport answering from per-subject scripts, then with a default body.
#[derive(Debug)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<UpstreamResponse>>>,
    calls: Mutex<HashMap<String, usize>>,
    default_body: Mutex<String>,
    latency: Mutex<Option<Duration>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            default_body: Mutex::new(presence_body("online", Some("chess"))),
            latency: Mutex::new(None),
        }
    }
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue responses for `subject_id`, served before the default body.
    pub fn script(&self, subject_id: &str, responses: Vec<UpstreamResponse>) {
        self.scripts
            .lock()
            .insert(subject_id.to_string(), responses.into());
    }

    pub fn set_default_body(&self, body: String) {
        *self.default_body.lock() = body;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn calls(&self, subject_id: &str) -> usize {
        self.calls.lock().get(subject_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl PresenceTransport for ScriptedTransport {
    async fn fetch_presence(&self, subject_id: &str) -> AppResult<UpstreamResponse> {
        *self.calls.lock().entry(subject_id.to_string()).or_default() += 1;
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = self
            .scripts
            .lock()
            .get_mut(subject_id)
            .and_then(|queue| queue.pop_front());
        Ok(scripted.unwrap_or_else(|| UpstreamResponse::new(200, self.default_body.lock().clone())))
    }
}

/// Configuration with deterministic, short retry delays.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.api.initial_delay_ms = 100;
    config.retry.api.max_delay_ms = 1_000;
    config.retry.api.jitter_fraction = 0.0;
    config.retry.api.max_attempts = 3;
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.recovery_timeout_seconds = 30;
    config.batch.inter_batch_delay_ms = 0;
    config.reconciliation.interval_seconds = 60;
    config
}

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// One relay instance: every component wired as the binary wires them.
pub struct TestRelay {
    pub config: AppConfig,
    pub cache: Arc<DualTierCache>,
    pub transport: Arc<ScriptedTransport>,
    pub client: ResilientApiClient,
    pub store: Arc<SnapshotStore>,
    pub ledger: Arc<HashLedger>,
    pub push: PushHandler,
    pub reconciler: Reconciler,
    pub shutdown_tx: watch::Sender<bool>,
}

impl TestRelay {
    /// A relay using only its in-process tier.
    pub fn local(config: AppConfig) -> Self {
        let cache = Arc::new(DualTierCache::local_only(&config.cache));
        Self::build(config, cache)
    }

    /// A relay attached to a (possibly shared) remote tier.
    pub fn with_remote(config: AppConfig, remote: Arc<SharedRemote>) -> Self {
        let cache = Arc::new(DualTierCache::with_remote(&config.cache, remote));
        Self::build(config, cache)
    }

    fn build(config: AppConfig, cache: Arc<DualTierCache>) -> Self {
        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let transport = ScriptedTransport::new();
        let client = ResilientApiClient::new(
            transport.clone(),
            Arc::clone(&cache),
            &config,
            shutdown_rx.clone(),
        );
        let store = Arc::new(SnapshotStore::new());
        let ledger = Arc::new(HashLedger::new());
        let push = PushHandler::new(Arc::clone(&cache), Arc::clone(&ledger), Arc::clone(&store));
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::clone(&cache),
            Arc::clone(&ledger),
            &config.reconciliation,
            shutdown_rx,
        );
        Self {
            config,
            cache,
            transport,
            client,
            store,
            ledger,
            push,
            reconciler,
            shutdown_tx,
        }
    }
}
