//! Upstream REST API configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upstream presence API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the REST API, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Credential sent in the `Authorization` header.
    #[serde(default)]
    pub token: String,
    /// Scheme prefix for the credential (`Bot`, `Bearer`).
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,
    /// Descriptive client identifier sent as `User-Agent`.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Deadline for a single network call, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Age after which a cached record is refetched, in seconds.
    ///
    /// Independent of the cache TTLs: an offline record outlives this
    /// threshold in the cache but is still refetched by the client.
    #[serde(default = "default_freshness")]
    pub freshness_seconds: u64,
}

impl UpstreamConfig {
    /// Per-call network deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Client freshness threshold.
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_seconds)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: String::new(),
            auth_scheme: default_auth_scheme(),
            user_agent: default_user_agent(),
            request_timeout_seconds: default_request_timeout(),
            freshness_seconds: default_freshness(),
        }
    }
}

fn default_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_auth_scheme() -> String {
    "Bot".to_string()
}

fn default_user_agent() -> String {
    format!(
        "PresenceRelay (https://github.com/presence-relay/presence-relay, {})",
        env!("CARGO_PKG_VERSION")
    )
}

fn default_request_timeout() -> u64 {
    10
}

fn default_freshness() -> u64 {
    300
}
