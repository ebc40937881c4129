//! Circuit breaker guarding upstream calls.
//!
//! Transition table (complete):
//!
//! | from      | to        | when                                          |
//! |-----------|-----------|-----------------------------------------------|
//! | closed    | open      | consecutive failures reach the threshold      |
//! | open      | half-open | recovery timeout elapsed since last failure   |
//! | half-open | closed    | the probe succeeds (failure counter reset)    |
//! | half-open | open      | the probe fails (recovery timer restarts)     |
//!
//! In half-open exactly one probe is in flight. Only errors whose kind
//! [`trips_breaker`](presence_core::ErrorKind::trips_breaker) count as
//! failures; anything else leaves the counters untouched.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use presence_core::config::{CircuitBreakerConfig, HalfOpenPolicy};
use presence_core::error::AppError;
use presence_core::result::AppResult;

/// Circuit breaker state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow through, failures are counted
    Closed,
    /// Requests fail fast without a network attempt
    Open,
    /// A single probe decides whether to close again
    HalfOpen,
}

impl CircuitState {
    /// Converts to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Internal state tracking
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Read-only view for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures counted so far
    pub consecutive_failures: u32,
    /// Milliseconds since the last failure
    pub last_failure_ago_ms: Option<u64>,
    /// Whether a half-open probe is running
    pub probe_in_flight: bool,
    /// Times the circuit has opened
    pub opened_count: u64,
    /// Calls rejected without a network attempt
    pub rejected_count: u64,
}

/// Admission ticket for one call. Releases the probe slot if dropped early.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            // Probe abandoned (cancelled): stay half-open, let the next caller probe.
            self.breaker.state.lock().probe_in_flight = false;
            self.breaker.probe_done.notify_waiters();
        }
    }
}

enum Admission<'a> {
    Admitted(Permit<'a>),
    Rejected(AppError),
    WaitForProbe,
}

/// Failure-isolation state machine shared by every caller of one upstream.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    half_open_policy: HalfOpenPolicy,
    state: Mutex<BreakerState>,
    probe_done: Notify,
    opened_count: AtomicU64,
    rejected_count: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new breaker.
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: Duration,
        half_open_policy: HalfOpenPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            half_open_policy,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
            probe_done: Notify::new(),
            opened_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
        }
    }

    /// Create a breaker from configuration.
    pub fn from_config(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(
            name,
            config.failure_threshold,
            config.recovery_timeout(),
            config.half_open,
        )
    }

    /// Current state. An open circuit whose timeout elapsed reports `Open`
    /// until the next call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Run `op` through the breaker.
    ///
    /// In the open state (and, under [`HalfOpenPolicy::FailFast`], while a
    /// probe is running) `op` is never invoked and a circuit-open error is
    /// returned instead.
    pub async fn execute<T, F, Fut>(&self, op: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut permit = loop {
            let notified = self.probe_done.notified();
            match self.admit() {
                Admission::Admitted(permit) => break permit,
                Admission::Rejected(err) => return Err(err),
                Admission::WaitForProbe => notified.await,
            }
        };

        let result = op().await;
        match &result {
            Ok(_) => self.record_success(&mut permit),
            Err(err) if err.kind.trips_breaker() => self.record_failure(&mut permit),
            Err(_) => {}
        }
        result
    }

    fn admit(&self) -> Admission<'_> {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => Admission::Admitted(self.permit(false)),
            CircuitState::Open => {
                let elapsed = state
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    tracing::info!(breaker = %self.name, "Circuit breaker half-open, sending probe");
                    Admission::Admitted(self.permit(true))
                } else {
                    self.rejected_count.fetch_add(1, Ordering::Relaxed);
                    Admission::Rejected(AppError::circuit_open(self.recovery_timeout - elapsed))
                }
            }
            CircuitState::HalfOpen => {
                if !state.probe_in_flight {
                    state.probe_in_flight = true;
                    return Admission::Admitted(self.permit(true));
                }
                match self.half_open_policy {
                    HalfOpenPolicy::FailFast => {
                        self.rejected_count.fetch_add(1, Ordering::Relaxed);
                        Admission::Rejected(AppError::circuit_open(Duration::ZERO))
                    }
                    HalfOpenPolicy::Wait => Admission::WaitForProbe,
                }
            }
        }
    }

    fn permit(&self, probe: bool) -> Permit<'_> {
        Permit {
            breaker: self,
            probe,
            settled: false,
        }
    }

    fn record_success(&self, permit: &mut Permit<'_>) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => state.consecutive_failures = 0,
            CircuitState::HalfOpen if permit.probe => {
                state.state = CircuitState::Closed;
                state.consecutive_failures = 0;
                state.probe_in_flight = false;
                tracing::info!(breaker = %self.name, "Circuit breaker closed, upstream recovered");
            }
            // A straggler admitted before the circuit opened proves nothing.
            _ => {}
        }
        drop(state);
        self.settle(permit);
    }

    fn record_failure(&self, permit: &mut Permit<'_>) {
        let mut state = self.state.lock();
        state.last_failure = Some(Instant::now());
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.failure_threshold {
                    state.state = CircuitState::Open;
                    self.opened_count.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        breaker = %self.name,
                        failures = state.consecutive_failures,
                        cooldown_ms = self.recovery_timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen if permit.probe => {
                state.consecutive_failures += 1;
                state.state = CircuitState::Open;
                state.probe_in_flight = false;
                self.opened_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(breaker = %self.name, "Circuit breaker re-opened, probe failed");
            }
            _ => {}
        }
        drop(state);
        self.settle(permit);
    }

    fn settle(&self, permit: &mut Permit<'_>) {
        if permit.probe {
            // Neutral outcomes (e.g. 404) end the probe without deciding.
            self.state.lock().probe_in_flight = false;
            permit.settled = true;
            self.probe_done.notify_waiters();
        }
    }

    /// Read-only view for diagnostics.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock();
        CircuitSnapshot {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            last_failure_ago_ms: state.last_failure.map(|at| at.elapsed().as_millis() as u64),
            probe_in_flight: state.probe_in_flight,
            opened_count: self.opened_count.load(Ordering::Relaxed),
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
        }
    }
}
