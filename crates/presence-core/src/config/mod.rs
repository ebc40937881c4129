//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section, and every field has a default so an empty file is valid.

pub mod cache;
pub mod logging;
pub mod resilience;
pub mod sync;
pub mod upstream;

use serde::{Deserialize, Serialize};

pub use self::cache::{CacheConfig, RedisCacheConfig, TtlConfig};
pub use self::logging::{LogFormat, LoggingConfig};
pub use self::resilience::{
    BackoffConfig, CircuitBreakerConfig, HalfOpenPolicy, RateLimitConfig, RetryConfig,
};
pub use self::sync::{BatchConfig, ReconciliationConfig};
pub use self::upstream::UpstreamConfig;

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream REST API settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Local rate-limit window.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Circuit breaker settings.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Backoff profiles per call site.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Cache tiers and TTL policy.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Reconciliation sweep settings.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Batch fetch settings.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges the default configuration with an environment-specific overlay
    /// and environment variables prefixed with `PRESENCE__`.
    pub fn load(env: &str) -> Result<Self, AppError> {
        Self::load_from("config", env)
    }

    /// Load configuration from a specific directory.
    pub fn load_from(dir: &str, env: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(&format!("{dir}/default")).required(false))
            .add_source(config::File::with_name(&format!("{dir}/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("PRESENCE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values the components cannot work with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.rate_limit.capacity == 0 {
            return Err(AppError::configuration("rate_limit.capacity must be > 0"));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(AppError::configuration("rate_limit.window_ms must be > 0"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AppError::configuration(
                "circuit_breaker.failure_threshold must be > 0",
            ));
        }
        if self.batch.size == 0 {
            return Err(AppError::configuration("batch.size must be > 0"));
        }
        if self.reconciliation.interval_seconds == 0 {
            return Err(AppError::configuration(
                "reconciliation.interval_seconds must be > 0",
            ));
        }
        if self.cache.sweep_interval_seconds == 0 {
            return Err(AppError::configuration(
                "cache.sweep_interval_seconds must be > 0",
            ));
        }
        if self.upstream.request_timeout_seconds == 0 {
            return Err(AppError::configuration(
                "upstream.request_timeout_seconds must be > 0",
            ));
        }
        for (name, profile) in [
            ("retry.api", &self.retry.api),
            ("retry.cache_reconnect", &self.retry.cache_reconnect),
        ] {
            if profile.max_attempts == 0 {
                return Err(AppError::configuration(format!(
                    "{name}.max_attempts must be > 0"
                )));
            }
            if profile.multiplier < 1.0 {
                return Err(AppError::configuration(format!(
                    "{name}.multiplier must be >= 1.0"
                )));
            }
            if !(0.0..=1.0).contains(&profile.jitter_fraction) {
                return Err(AppError::configuration(format!(
                    "{name}.jitter_fraction must be within [0, 1]"
                )));
            }
        }
        Ok(())
    }
}
