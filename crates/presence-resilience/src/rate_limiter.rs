//! Sliding-window rate limiter.
//!
//! Callers suspend in [`RateLimiter::acquire`] until a slot is free; nothing
//! is ever dropped. Waiters are served in arrival order through an async
//! turnstile, so a caller stuck on a window never lets later callers jump it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use presence_core::config::RateLimitConfig;
use presence_core::result::AppResult;
use presence_core::shutdown::{self, ShutdownReceiver};

/// Longest pause an upstream signal can impose on the limiter.
pub const MAX_UPSTREAM_PAUSE: Duration = Duration::from_secs(3600);

/// Deadline `wait` from now, with `wait` clamped to [`MAX_UPSTREAM_PAUSE`].
fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait.min(MAX_UPSTREAM_PAUSE)).unwrap_or(now)
}

/// Mutable window state.
#[derive(Debug)]
struct RateLimitWindow {
    /// Instants of the grants still inside the window, oldest first.
    grants: VecDeque<Instant>,
    /// Upstream-signalled reset deadline. Overrides the local window.
    reset_at: Option<Instant>,
    /// Remaining upstream quota and when it resets, from response headers.
    upstream_budget: Option<(u32, Instant)>,
}

impl RateLimitWindow {
    fn new(capacity: u32) -> Self {
        Self {
            grants: VecDeque::with_capacity(capacity as usize),
            reset_at: None,
            upstream_budget: None,
        }
    }

    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.grants.front() {
            if now.duration_since(*front) >= window {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Read-only view of the window for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSnapshot {
    /// Grants allowed per window
    pub capacity: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Grants inside the current window
    pub in_window: u32,
    /// Age of the oldest grant in the window, in milliseconds
    pub window_age_ms: Option<u64>,
    /// Time until the upstream-signalled reset, in milliseconds
    pub reset_in_ms: Option<u64>,
    /// Remaining upstream quota as last reported
    pub upstream_remaining: Option<u32>,
    /// Number of acquisitions that had to wait
    pub total_waits: u64,
}

/// Sliding-window rate limiter shared by every upstream caller.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    state: Mutex<RateLimitWindow>,
    turnstile: tokio::sync::Mutex<()>,
    shutdown: Option<ShutdownReceiver>,
    waits: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter allowing `capacity` grants per `window`.
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window,
            state: Mutex::new(RateLimitWindow::new(capacity)),
            turnstile: tokio::sync::Mutex::new(()),
            shutdown: None,
            waits: AtomicU64::new(0),
        }
    }

    /// Create a limiter from configuration.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.window())
    }

    /// Abort waits when shutdown is signalled.
    pub fn with_shutdown(mut self, shutdown: ShutdownReceiver) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Suspend until a slot is available, then take it.
    ///
    /// Returns a cancellation error only if shutdown is signalled while waiting.
    pub async fn acquire(&self) -> AppResult<()> {
        let _turn = self.turnstile.lock().await;
        let mut waited = false;

        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                match self.next_wait(&mut state, now) {
                    None => {
                        state.grants.push_back(now);
                        if let Some((remaining, deadline)) = state.upstream_budget.as_mut() {
                            *remaining = remaining.saturating_sub(1);
                            if *remaining == 0 {
                                state.reset_at = Some(*deadline);
                                state.upstream_budget = None;
                            }
                        }
                        None
                    }
                    Some(wait) => Some(wait),
                }
            };

            match wait {
                None => return Ok(()),
                Some(wait) => {
                    if !waited {
                        waited = true;
                        self.waits.fetch_add(1, Ordering::Relaxed);
                    }
                    tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
                    shutdown::sleep(wait, self.shutdown.as_ref()).await?;
                }
            }
        }
    }

    /// How long the next caller must wait, or `None` if a slot is free now.
    fn next_wait(&self, state: &mut RateLimitWindow, now: Instant) -> Option<Duration> {
        if let Some(reset_at) = state.reset_at {
            if now < reset_at {
                return Some(reset_at - now);
            }
            tracing::debug!("Upstream rate-limit reset reached, clearing local window");
            state.reset_at = None;
            state.grants.clear();
        }

        if let Some((_, deadline)) = state.upstream_budget {
            if now >= deadline {
                state.upstream_budget = None;
            }
        }

        state.evict(now, self.window);
        if (state.grants.len() as u32) < self.capacity {
            return None;
        }

        // Wait only for the oldest grant to leave the window.
        state
            .grants
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
    }

    /// Block every caller for `wait` (upstream 429 with retry-after).
    pub fn pause_for(&self, wait: Duration) {
        self.pause_until(deadline_after(wait));
    }

    /// Block every caller until `deadline`.
    pub fn pause_until(&self, deadline: Instant) {
        let mut state = self.state.lock();
        let extended = state.reset_at.is_none_or(|current| deadline > current);
        if extended {
            state.reset_at = Some(deadline);
            tracing::info!(
                pause_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Rate limiter paused by upstream signal"
            );
        }
    }

    /// Record quota headers from a successful response.
    ///
    /// `remaining == 0` arms the reset deadline immediately; a positive value
    /// caps how many more grants are handed out before the deadline.
    pub fn observe_quota(&self, remaining: u32, reset_after: Duration) {
        let deadline = deadline_after(reset_after);
        if remaining == 0 {
            self.pause_until(deadline);
            return;
        }
        let mut state = self.state.lock();
        state.upstream_budget = Some((remaining, deadline));
    }

    /// Read-only view of the window.
    pub fn snapshot(&self) -> RateLimitSnapshot {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.evict(now, self.window);
        RateLimitSnapshot {
            capacity: self.capacity,
            window_ms: self.window.as_millis() as u64,
            in_window: state.grants.len() as u32,
            window_age_ms: state
                .grants
                .front()
                .map(|oldest| now.duration_since(*oldest).as_millis() as u64),
            reset_in_ms: state
                .reset_at
                .filter(|reset| *reset > now)
                .map(|reset| (reset - now).as_millis() as u64),
            upstream_remaining: state.upstream_budget.map(|(remaining, _)| remaining),
            total_waits: self.waits.load(Ordering::Relaxed),
        }
    }
}
