//! Rate limiting, circuit breaking and retry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Local rate-limit window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// Window length in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl RateLimitConfig {
    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_ms: default_window_ms(),
        }
    }
}

/// What concurrent callers do while a half-open probe is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HalfOpenPolicy {
    /// Reject immediately with a circuit-open error.
    #[default]
    FailFast,
    /// Wait for the probe to finish, then re-evaluate.
    Wait,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds after the last failure before a probe is allowed.
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_seconds: u64,
    /// Behaviour of callers arriving during a half-open probe.
    #[serde(default)]
    pub half_open: HalfOpenPolicy,
}

impl CircuitBreakerConfig {
    /// Cool-down before a probe.
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout(),
            half_open: HalfOpenPolicy::default(),
        }
    }
}

/// Exponential backoff profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Fraction of the delay added as uniform random jitter.
    pub jitter_fraction: f64,
}

impl BackoffConfig {
    /// Profile for upstream API calls.
    pub fn api() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 5,
            jitter_fraction: 0.1,
        }
    }

    /// Profile for (re)connecting to the remote cache tier.
    pub fn cache_reconnect() -> Self {
        Self {
            initial_delay_ms: 2_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            max_attempts: 3,
            jitter_fraction: 0.2,
        }
    }
}

/// Backoff profiles per call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Upstream API calls.
    #[serde(default = "BackoffConfig::api")]
    pub api: BackoffConfig,
    /// Remote cache connection.
    #[serde(default = "BackoffConfig::cache_reconnect")]
    pub cache_reconnect: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            api: BackoffConfig::api(),
            cache_reconnect: BackoffConfig::cache_reconnect(),
        }
    }
}

fn default_capacity() -> u32 {
    50
}

fn default_window_ms() -> u64 {
    1000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    30
}
