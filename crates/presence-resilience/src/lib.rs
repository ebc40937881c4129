//! # presence-resilience
//!
//! The three leaf components every upstream call goes through:
//!
//! - [`RateLimiter`]: sliding-window admission with upstream-signalled resets
//! - [`CircuitBreaker`]: closed/open/half-open failure isolation
//! - [`Retrier`]: exponential backoff with jitter over a [`BackoffPolicy`]
//!
//! All waits are tokio suspension points and honour the process shutdown
//! signal.

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;

pub use backoff::{BackoffPolicy, Retrier, RetryDecision, classify};
pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use rate_limiter::{RateLimitSnapshot, RateLimiter};
