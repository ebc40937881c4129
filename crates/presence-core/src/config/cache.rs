//! Cache tier configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::PresenceStatus;

/// Top-level cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether to use the remote (Redis) tier at all.
    #[serde(default = "default_true")]
    pub remote_enabled: bool,
    /// Interval between sweeps of the in-process tier, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// How long past expiry an in-process entry is kept for the degraded
    /// read path before a sweep removes it, in seconds.
    #[serde(default = "default_stale_grace")]
    pub stale_grace_seconds: u64,
    /// TTLs by presence status.
    #[serde(default)]
    pub ttl: TtlConfig,
    /// Redis-specific configuration.
    #[serde(default)]
    pub redis: RedisCacheConfig,
}

impl CacheConfig {
    /// Sweep interval, never below one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    /// Degraded-read grace window.
    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            remote_enabled: true,
            sweep_interval_seconds: default_sweep_interval(),
            stale_grace_seconds: default_stale_grace(),
            ttl: TtlConfig::default(),
            redis: RedisCacheConfig::default(),
        }
    }
}

/// TTL policy by presence status.
///
/// Offline subjects change less often, so they are kept longer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    /// TTL for offline records, in seconds.
    #[serde(default = "default_offline_ttl")]
    pub offline_seconds: u64,
    /// TTL for every other status, in seconds.
    #[serde(default = "default_active_ttl")]
    pub active_seconds: u64,
}

impl TtlConfig {
    /// TTL for a record with the given status.
    pub fn for_status(&self, status: PresenceStatus) -> Duration {
        match status {
            PresenceStatus::Offline => Duration::from_secs(self.offline_seconds),
            _ => Duration::from_secs(self.active_seconds),
        }
    }
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            offline_seconds: default_offline_ttl(),
            active_seconds: default_active_ttl(),
        }
    }
}

/// Redis cache backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisCacheConfig {
    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key prefix for all relay cache keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_stale_grace() -> u64 {
    600
}

fn default_offline_ttl() -> u64 {
    900
}

fn default_active_ttl() -> u64 {
    300
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "relay:".to_string()
}
