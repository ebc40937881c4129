//! Remote cache tier trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::result::AppResult;

/// A value read back from the remote tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteValue {
    /// Serialized payload (JSON).
    pub payload: String,
    /// Time left before the remote tier expires the key, if it reports one.
    pub ttl_remaining: Option<Duration>,
}

/// One write in a batched remote write.
#[derive(Debug, Clone)]
pub struct RemoteWrite {
    /// Cache key, without the tier's own prefix.
    pub key: String,
    /// Serialized payload (JSON).
    pub payload: String,
    /// Monotonic version (unix millis of `last_updated`); older versions never
    /// overwrite newer ones.
    pub version: i64,
    /// Time to live.
    pub ttl: Duration,
}

/// Trait for the shared, slower cache tier (Redis in production).
///
/// Implementations are responsible for key prefixing, TTL enforcement and
/// the last-write-wins version check. Every method may fail when the tier is
/// unreachable; callers decide how to degrade.
#[async_trait]
pub trait RemoteCacheTier: Send + Sync + std::fmt::Debug + 'static {
    /// Get a value by key. Returns `None` if the key does not exist or has expired.
    async fn get(&self, key: &str) -> AppResult<Option<RemoteValue>>;

    /// Get many values in a single round trip, in key order.
    async fn get_many(&self, keys: &[String]) -> AppResult<Vec<Option<RemoteValue>>>;

    /// Store a value unless a newer version is already stored.
    /// Returns `true` if the value was written.
    async fn set_if_newer(
        &self,
        key: &str,
        payload: &str,
        version: i64,
        ttl: Duration,
    ) -> AppResult<bool>;

    /// Store many values in a single round trip, reporting each key separately.
    async fn set_many_if_newer(&self, writes: &[RemoteWrite]) -> AppResult<Vec<AppResult<bool>>>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Check that the tier is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}
