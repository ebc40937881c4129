//! Reconciliation and batch-fetch configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reconciliation sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Whether the reconciler starts with the service.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
}

impl ReconciliationConfig {
    /// Sweep interval, never below one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_interval(),
        }
    }
}

/// `fetch_batch` chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Subjects fetched concurrently per chunk.
    #[serde(default = "default_batch_size")]
    pub size: usize,
    /// Pause between chunks, in milliseconds.
    #[serde(default = "default_inter_batch_delay")]
    pub inter_batch_delay_ms: u64,
    /// Subjects fetched once at start-up to warm the cache.
    #[serde(default)]
    pub warmup_subjects: Vec<String>,
}

impl BatchConfig {
    /// Pause between chunks.
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: default_batch_size(),
            inter_batch_delay_ms: default_inter_batch_delay(),
            warmup_subjects: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

fn default_batch_size() -> usize {
    10
}

fn default_inter_batch_delay() -> u64 {
    1000
}
