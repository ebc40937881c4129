//! Exponential backoff with jitter.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;

use presence_core::config::BackoffConfig;
use presence_core::error::{AppError, ErrorKind};
use presence_core::result::AppResult;
use presence_core::shutdown::{self, ShutdownReceiver};

/// Configuration for exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for the pre-jitter delay
    pub max_delay: Duration,
    /// Growth factor per retry
    pub multiplier: f64,
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Jitter added on top of the delay, as a fraction of it
    pub jitter_fraction: f64,
}

impl From<&BackoffConfig> for BackoffPolicy {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts.max(1),
            jitter_fraction: config.jitter_fraction.clamp(0.0, 1.0),
        }
    }
}

impl BackoffPolicy {
    /// Pre-jitter delay before retry `n` (1-indexed):
    /// `min(initial_delay * multiplier^(n-1), max_delay)`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let nanos = (self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent))
            .min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }

    /// Delay with an explicit jitter sample `unit` in `[0, 1]`.
    pub fn jittered_delay(&self, retry: u32, unit: f64) -> Duration {
        let base = self.base_delay(retry);
        let jitter = base.as_nanos() as f64 * self.jitter_fraction * unit.clamp(0.0, 1.0);
        base + Duration::from_nanos(jitter.round() as u64)
    }

    /// Delay with a uniformly random jitter in `[0, base * jitter_fraction]`.
    pub fn delay(&self, retry: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(0.0..=1.0);
        self.jittered_delay(retry, unit)
    }
}

/// Outcome of classifying a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again, waiting at least `after` if the error carried a hint.
    Retry {
        /// Minimum wait requested by the upstream or the breaker
        after: Option<Duration>,
    },
    /// Surface the error to the caller.
    GiveUp,
}

/// Default classifier, delegating to [`ErrorKind::is_retryable`].
pub fn classify(err: &AppError) -> RetryDecision {
    if err.is_retryable() {
        RetryDecision::Retry {
            after: err.retry_after,
        }
    } else {
        RetryDecision::GiveUp
    }
}

/// Runs operations under a backoff policy.
#[derive(Debug)]
pub struct Retrier {
    name: &'static str,
    policy: BackoffPolicy,
    shutdown: Option<ShutdownReceiver>,
    retries: AtomicU64,
    recovered: AtomicU64,
}

impl Retrier {
    /// Create a retrier for the named call site.
    pub fn new(name: &'static str, policy: BackoffPolicy) -> Self {
        Self {
            name,
            policy,
            shutdown: None,
            retries: AtomicU64::new(0),
            recovered: AtomicU64::new(0),
        }
    }

    /// Abort backoff waits when shutdown is signalled.
    pub fn with_shutdown(mut self, shutdown: ShutdownReceiver) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// The policy in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Total retries scheduled.
    pub fn retry_count(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Operations that succeeded after at least one retry.
    pub fn recovered_count(&self) -> u64 {
        self.recovered.load(Ordering::Relaxed)
    }

    /// Run `op` with the default classifier.
    pub async fn run<T, F, Fut>(&self, op: F) -> AppResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        self.run_with(op, classify).await
    }

    /// Run `op` (called with the 1-based attempt number) until it succeeds,
    /// the classifier gives up, or `max_attempts` attempts have failed. The
    /// last error is returned in the latter two cases.
    pub async fn run_with<T, F, Fut, C>(&self, mut op: F, classifier: C) -> AppResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AppResult<T>>,
        C: Fn(&AppError) -> RetryDecision,
    {
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        self.recovered.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(call_site = self.name, attempt, "Recovered after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.kind == ErrorKind::Cancelled {
                return Err(err);
            }

            let hint = match classifier(&err) {
                RetryDecision::GiveUp => {
                    tracing::debug!(call_site = self.name, attempt, error = %err, "Not retryable");
                    return Err(err);
                }
                RetryDecision::Retry { after } => after,
            };

            if attempt >= self.policy.max_attempts {
                tracing::warn!(
                    call_site = self.name,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err);
            }

            let delay = self.policy.delay(attempt).max(hint.unwrap_or_default());
            self.retries.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                call_site = self.name,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after backoff"
            );
            shutdown::sleep(delay, self.shutdown.as_ref()).await?;
            attempt += 1;
        }
    }
}
