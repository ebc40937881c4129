//! Production transport over reqwest.

use async_trait::async_trait;
use reqwest::{Client, Url};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::debug;

use presence_core::config::UpstreamConfig;
use presence_core::error::{AppError, ErrorKind};
use presence_core::result::AppResult;

use super::{PresenceTransport, QuotaHeaders, UpstreamResponse, parse_seconds};

const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_AFTER_HEADER: &str = "x-ratelimit-reset-after";
const RETRY_AFTER_HEADER: &str = "retry-after";

/// Authenticated HTTPS transport to the upstream REST API.
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Build a transport from configuration.
    ///
    /// The credential and client identifier are sent on every request; the
    /// per-request deadline is enforced by the caller.
    pub fn new(config: &UpstreamConfig) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        if !config.token.is_empty() {
            let mut value =
                HeaderValue::from_str(&format!("{} {}", config.auth_scheme, config.token))
                    .map_err(|e| {
                        AppError::with_source(
                            ErrorKind::Configuration,
                            "Upstream token is not a valid header value",
                            e,
                        )
                    })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(|e| {
                AppError::with_source(ErrorKind::Configuration, "Failed to build HTTP client", e)
            })?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            AppError::with_source(ErrorKind::Configuration, "Upstream base URL is invalid", e)
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::configuration(format!(
                "Upstream base URL '{base_url}' cannot carry a path"
            )));
        }

        Ok(Self { client, base_url })
    }

    /// `{base}/users/{subject_id}/presence`, with the id percent-encoded as
    /// one path segment.
    fn presence_url(&self, subject_id: &str) -> AppResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| AppError::configuration("Upstream base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["users", subject_id, "presence"]);
        Ok(url)
    }

    fn map_err(subject_id: &str, e: reqwest::Error) -> AppError {
        let kind = if e.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Network
        };
        AppError::with_source(kind, format!("Request for '{subject_id}' failed: {e}"), e)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[async_trait]
impl PresenceTransport for HttpTransport {
    async fn fetch_presence(&self, subject_id: &str) -> AppResult<UpstreamResponse> {
        let url = self.presence_url(subject_id)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::map_err(subject_id, e))?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let remaining = header(headers, REMAINING_HEADER).and_then(|v| v.trim().parse().ok());
        let reset_after = header(headers, RESET_AFTER_HEADER).and_then(parse_seconds);
        let quota = remaining
            .zip(reset_after)
            .map(|(remaining, reset_after)| QuotaHeaders {
                remaining,
                reset_after,
            });
        let retry_after = header(headers, RETRY_AFTER_HEADER).and_then(parse_seconds);

        let body = response
            .text()
            .await
            .map_err(|e| Self::map_err(subject_id, e))?;
        debug!(subject_id, status, bytes = body.len(), "Upstream responded");

        Ok(UpstreamResponse {
            status,
            body,
            quota,
            retry_after,
        })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"[REDACTED]")
            .finish()
    }
}
