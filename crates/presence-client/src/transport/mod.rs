//! Transport seam between the client and the upstream API.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use presence_core::error::AppError;
use presence_core::result::AppResult;
use presence_core::types::WirePresence;

pub use http::HttpTransport;

/// Wait applied to a 429 that carries no retry-after at all.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(1);

/// Upper bound on any wait the upstream asks for.
const MAX_UPSTREAM_WAIT: Duration = Duration::from_secs(3600);

/// Quota headers sent with successful responses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaHeaders {
    /// `X-RateLimit-Remaining`
    pub remaining: u32,
    /// `X-RateLimit-Reset-After`
    pub reset_after: Duration,
}

/// Raw upstream reply, before status mapping.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
    /// Quota headers, if both were present
    pub quota: Option<QuotaHeaders>,
    /// `Retry-After` header
    pub retry_after: Option<Duration>,
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

impl UpstreamResponse {
    /// A response with no headers of interest.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            quota: None,
            retry_after: None,
        }
    }

    /// Attach quota headers.
    pub fn with_quota(mut self, remaining: u32, reset_after: Duration) -> Self {
        self.quota = Some(QuotaHeaders {
            remaining,
            reset_after,
        });
        self
    }

    /// Attach a `Retry-After` header.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// How long a 429 asks us to wait: the header, else the JSON body field.
    pub fn rate_limit_wait(&self) -> Duration {
        self.retry_after
            .or_else(|| {
                serde_json::from_str::<RateLimitBody>(&self.body)
                    .ok()
                    .and_then(|body| parse_seconds_f64(body.retry_after))
            })
            .unwrap_or(DEFAULT_RATE_LIMIT_WAIT)
    }

    /// Map the status to a payload or a classified error.
    pub fn into_presence(self, subject_id: &str) -> AppResult<WirePresence> {
        match self.status {
            200..=299 => Ok(serde_json::from_str(&self.body)?),
            429 => Err(AppError::rate_limited(self.rate_limit_wait())),
            404 => Err(AppError::not_found(format!("Unknown subject '{subject_id}'"))),
            401 | 403 => Err(AppError::forbidden(format!(
                "Upstream refused access to '{subject_id}' (HTTP {})",
                self.status
            ))),
            500..=599 => Err(AppError::upstream(format!(
                "Upstream failed for '{subject_id}' (HTTP {})",
                self.status
            ))),
            status => Err(AppError::invalid_request(format!(
                "Upstream rejected request for '{subject_id}' (HTTP {status})"
            ))),
        }
    }
}

/// Parse a header value in (possibly fractional) seconds.
pub fn parse_seconds(value: &str) -> Option<Duration> {
    value.trim().parse::<f64>().ok().and_then(parse_seconds_f64)
}

/// Negative and non-finite values are rejected; anything past
/// [`MAX_UPSTREAM_WAIT`] is clamped to it.
fn parse_seconds_f64(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(
        Duration::try_from_secs_f64(secs)
            .map_or(MAX_UPSTREAM_WAIT, |wait| wait.min(MAX_UPSTREAM_WAIT)),
    )
}

/// One presence lookup against the upstream.
///
/// Transport-level failures (connect, reset, deadline) are errors; any HTTP
/// reply, whatever its status, is an [`UpstreamResponse`].
#[async_trait]
pub trait PresenceTransport: Send + Sync + std::fmt::Debug {
    /// Fetch the presence of one subject.
    async fn fetch_presence(&self, subject_id: &str) -> AppResult<UpstreamResponse>;
}
