//! Unified application error types for the presence relay.
//!
//! All crates map their internal errors into [`AppError`] for consistent
//! propagation through the ? operator. Whether an error may be retried is
//! decided here and nowhere else, see [`ErrorKind::is_retryable`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Top-level error kind categorization used across the entire application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// The requested subject does not exist upstream.
    NotFound,
    /// The upstream refused access to the subject (401/403).
    Forbidden,
    /// The upstream rejected the request as malformed (other 4xx).
    InvalidRequest,
    /// The upstream explicitly throttled the request (429).
    RateLimit,
    /// The request could not reach the upstream.
    Network,
    /// The request did not complete within its deadline.
    Timeout,
    /// The upstream answered with a server error (5xx).
    Upstream,
    /// The circuit breaker rejected the call without a network attempt.
    CircuitOpen,
    /// A cache tier failed.
    Cache,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// A configuration error occurred.
    Configuration,
    /// The operation was abandoned because the process is shutting down.
    Cancelled,
    /// An internal error occurred.
    Internal,
}

impl ErrorKind {
    /// Whether an operation failing with this kind may be attempted again.
    ///
    /// This is the single source of truth for retry eligibility.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::Upstream | Self::RateLimit | Self::CircuitOpen
        )
    }

    /// Whether a failure of this kind counts against the circuit breaker.
    ///
    /// Throttling and fast-fail rejections are not evidence that the
    /// upstream is unhealthy.
    pub fn trips_breaker(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Upstream)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Forbidden => write!(f, "FORBIDDEN"),
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::Network => write!(f, "NETWORK"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Upstream => write!(f, "UPSTREAM"),
            Self::CircuitOpen => write!(f, "CIRCUIT_OPEN"),
            Self::Cache => write!(f, "CACHE"),
            Self::Serialization => write!(f, "SERIALIZATION"),
            Self::Configuration => write!(f, "CONFIGURATION"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

/// The unified application error used throughout the relay.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// How long the upstream (or the breaker) asked us to wait, if known.
    pub retry_after: Option<Duration>,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new application error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            source: None,
        }
    }

    /// Create a new application error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            source: Some(Box::new(source)),
        }
    }

    /// Attach a retry-after hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Create an invalid-request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// Create a rate-limit error carrying the signalled wait.
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::new(
            ErrorKind::RateLimit,
            format!("Rate limited by upstream, retry after {}ms", retry_after.as_millis()),
        )
        .with_retry_after(retry_after)
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Create an upstream (5xx) error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    /// Create a circuit-open rejection.
    pub fn circuit_open(remaining_cooldown: Duration) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            "Circuit breaker is open, request not attempted",
        )
        .with_retry_after(remaining_cooldown)
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Shorthand for [`ErrorKind::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            retry_after: self.retry_after,
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}
