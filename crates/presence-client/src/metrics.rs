//! Client counters and diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use presence_cache::CacheStats;
use presence_resilience::{CircuitSnapshot, RateLimitSnapshot};

/// Live counters, updated lock-free by every caller.
#[derive(Debug, Default)]
pub(crate) struct ClientMetrics {
    pub(crate) requests: AtomicU64,
    pub(crate) cache_hits: AtomicU64,
    pub(crate) cache_misses: AtomicU64,
    pub(crate) upstream_calls: AtomicU64,
    pub(crate) successes: AtomicU64,
    pub(crate) failures: AtomicU64,
    pub(crate) rate_limited: AtomicU64,
}

impl ClientMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, retries: u64, circuit_rejections: u64) -> ClientCounters {
        ClientCounters {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            circuit_rejections,
            retries,
        }
    }
}

/// Point-in-time copy of the client counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientCounters {
    /// Subjects requested through `fetch_one` / `fetch_batch`
    pub requests: u64,
    /// Requests served by a fresh cached record
    pub cache_hits: u64,
    /// Requests that needed the upstream
    pub cache_misses: u64,
    /// Network calls issued
    pub upstream_calls: u64,
    /// Subjects fetched successfully
    pub successes: u64,
    /// Subjects whose fetch failed after retries
    pub failures: u64,
    /// 429 responses received
    pub rate_limited: u64,
    /// Calls rejected by the open circuit
    pub circuit_rejections: u64,
    /// Backoff retries scheduled
    pub retries: u64,
}

/// Everything an operator needs to see why the client is slow or failing.
#[derive(Debug, Clone, Serialize)]
pub struct ClientDiagnostics {
    /// Request counters
    pub counters: ClientCounters,
    /// Rate-limit window
    pub rate_limit: RateLimitSnapshot,
    /// Circuit breaker
    pub circuit: CircuitSnapshot,
    /// Cache tiers
    pub cache: CacheStats,
}
