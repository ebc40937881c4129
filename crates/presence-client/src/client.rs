//! Resilient presence client.
//!
//! Every upstream call follows the same path: rate-limit slot, circuit
//! breaker gate, network call with its own deadline. The retrier wraps the
//! whole path, so a circuit-open rejection or a 429 is retried after its
//! hint while permanent errors surface at once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use presence_cache::DualTierCache;
use presence_core::config::AppConfig;
use presence_core::error::AppError;
use presence_core::result::AppResult;
use presence_core::shutdown::{self, ShutdownReceiver};
use presence_core::types::{PresenceRecord, RecordOrigin};
use presence_resilience::{BackoffPolicy, CircuitBreaker, RateLimiter, Retrier};

use crate::metrics::{ClientDiagnostics, ClientMetrics};
use crate::transport::PresenceTransport;

/// Per-client tunables.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Maximum age of a cached record the client will return.
    pub freshness: Duration,
    /// Deadline for a single network call.
    pub request_timeout: Duration,
    /// Subjects fetched concurrently per batch chunk.
    pub batch_size: usize,
    /// Pause between batch chunks.
    pub inter_batch_delay: Duration,
}

impl ClientSettings {
    /// Settings from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            freshness: config.upstream.freshness(),
            request_timeout: config.upstream.request_timeout(),
            batch_size: config.batch.size.max(1),
            inter_batch_delay: config.batch.inter_batch_delay(),
        }
    }
}

/// Cache-fronted client for the upstream presence API.
#[derive(Debug)]
pub struct ResilientApiClient {
    transport: Arc<dyn PresenceTransport>,
    cache: Arc<DualTierCache>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    retrier: Retrier,
    settings: ClientSettings,
    shutdown: ShutdownReceiver,
    metrics: ClientMetrics,
}

impl ResilientApiClient {
    /// Build a client and its own limiter, breaker and retrier from configuration.
    pub fn new(
        transport: Arc<dyn PresenceTransport>,
        cache: Arc<DualTierCache>,
        config: &AppConfig,
        shutdown: ShutdownReceiver,
    ) -> Self {
        let limiter = Arc::new(
            RateLimiter::from_config(&config.rate_limit).with_shutdown(shutdown.clone()),
        );
        let breaker = Arc::new(CircuitBreaker::from_config("upstream", &config.circuit_breaker));
        Self::from_parts(
            transport,
            cache,
            limiter,
            breaker,
            BackoffPolicy::from(&config.retry.api),
            ClientSettings::from_config(config),
            shutdown,
        )
    }

    /// Build a client around a limiter and breaker shared with other callers.
    pub fn from_parts(
        transport: Arc<dyn PresenceTransport>,
        cache: Arc<DualTierCache>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        policy: BackoffPolicy,
        settings: ClientSettings,
        shutdown: ShutdownReceiver,
    ) -> Self {
        Self {
            transport,
            cache,
            limiter,
            breaker,
            retrier: Retrier::new("api", policy).with_shutdown(shutdown.clone()),
            settings,
            shutdown,
            metrics: ClientMetrics::default(),
        }
    }

    /// The cache this client reads through.
    pub fn cache(&self) -> &Arc<DualTierCache> {
        &self.cache
    }

    fn is_fresh(&self, record: &PresenceRecord) -> bool {
        record.age_at(Utc::now()) < self.settings.freshness
    }

    /// Fetch one subject, from the cache while the record is fresh.
    pub async fn fetch_one(&self, subject_id: &str) -> AppResult<PresenceRecord> {
        ClientMetrics::incr(&self.metrics.requests);
        if let Some(record) = self.cache.get(subject_id).await {
            if self.is_fresh(&record) {
                ClientMetrics::incr(&self.metrics.cache_hits);
                return Ok(record);
            }
            debug!(subject_id, last_updated = %record.last_updated, "Cached presence is stale, refetching");
        }
        ClientMetrics::incr(&self.metrics.cache_misses);

        let record = self.fetch_upstream(subject_id).await?;
        self.cache.set(&record).await;
        Ok(record)
    }

    /// Fetch many subjects. Subjects that fail are logged and left out of the
    /// result; the call as a whole never fails.
    pub async fn fetch_batch(&self, subject_ids: &[String]) -> HashMap<String, PresenceRecord> {
        let started = Instant::now();
        let mut seen = HashSet::with_capacity(subject_ids.len());
        let unique: Vec<String> = subject_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        ClientMetrics::add(&self.metrics.requests, unique.len());

        let mut cached = self.cache.get_many(&unique).await;
        let mut results = HashMap::with_capacity(unique.len());
        let mut misses = Vec::new();
        for subject_id in unique {
            match cached.remove(&subject_id) {
                Some(record) if self.is_fresh(&record) => {
                    results.insert(subject_id, record);
                }
                _ => misses.push(subject_id),
            }
        }
        let served_from_cache = results.len();
        ClientMetrics::add(&self.metrics.cache_hits, served_from_cache);
        ClientMetrics::add(&self.metrics.cache_misses, misses.len());

        let mut failed = 0usize;
        for (index, chunk) in misses.chunks(self.settings.batch_size).enumerate() {
            if index > 0
                && shutdown::sleep(self.settings.inter_batch_delay, Some(&self.shutdown))
                    .await
                    .is_err()
            {
                warn!(
                    skipped = misses.len() - index * self.settings.batch_size,
                    "Batch fetch interrupted by shutdown"
                );
                break;
            }

            let fetched = join_all(chunk.iter().map(|subject_id| async move {
                (subject_id, self.fetch_upstream(subject_id).await)
            }))
            .await;

            let mut records = Vec::with_capacity(fetched.len());
            for (subject_id, result) in fetched {
                match result {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        failed += 1;
                        warn!(subject_id = %subject_id, error = %e, "Presence fetch failed, omitted from batch");
                    }
                }
            }
            self.cache.set_many(&records).await;
            results.extend(records.into_iter().map(|r| (r.subject_id.clone(), r)));
        }

        info!(
            requested = subject_ids.len(),
            served_from_cache,
            fetched = results.len() - served_from_cache,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch fetch complete"
        );
        results
    }

    /// Drop a subject from both cache tiers.
    pub async fn invalidate(&self, subject_id: &str) {
        self.cache.invalidate(subject_id).await;
    }

    /// Counters plus limiter, breaker and cache state.
    pub fn metrics(&self) -> ClientDiagnostics {
        let circuit = self.breaker.snapshot();
        ClientDiagnostics {
            counters: self
                .metrics
                .snapshot(self.retrier.retry_count(), circuit.rejected_count),
            rate_limit: self.limiter.snapshot(),
            circuit,
            cache: self.cache.stats(),
        }
    }

    /// Upstream fetch under the full resilience stack, without touching the cache.
    async fn fetch_upstream(&self, subject_id: &str) -> AppResult<PresenceRecord> {
        let result = self
            .retrier
            .run(|attempt| self.attempt(subject_id, attempt))
            .await;
        match &result {
            Ok(_) => ClientMetrics::incr(&self.metrics.successes),
            Err(e) => {
                ClientMetrics::incr(&self.metrics.failures);
                debug!(subject_id, error = %e, "Upstream fetch failed");
            }
        }
        result
    }

    async fn attempt(&self, subject_id: &str, attempt: u32) -> AppResult<PresenceRecord> {
        self.limiter.acquire().await?;
        debug!(subject_id, attempt, "Calling upstream");
        self.breaker.execute(|| self.call(subject_id)).await
    }

    async fn call(&self, subject_id: &str) -> AppResult<PresenceRecord> {
        ClientMetrics::incr(&self.metrics.upstream_calls);
        let response = tokio::time::timeout(
            self.settings.request_timeout,
            self.transport.fetch_presence(subject_id),
        )
        .await
        .map_err(|_| {
            AppError::timeout(format!(
                "No response for '{subject_id}' within {}ms",
                self.settings.request_timeout.as_millis()
            ))
        })??;

        if response.status == 429 {
            let wait = response.rate_limit_wait();
            ClientMetrics::incr(&self.metrics.rate_limited);
            warn!(subject_id, wait_ms = wait.as_millis() as u64, "Upstream rate limit hit");
            self.limiter.pause_for(wait);
        } else if let Some(quota) = response.quota.filter(|_| response.is_success()) {
            self.limiter.observe_quota(quota.remaining, quota.reset_after);
        }

        let wire = response.into_presence(subject_id)?;
        Ok(wire.into_record(subject_id, RecordOrigin::ApiFetch, Utc::now()))
    }
}
