//! Redis connection management.

use redis::Client;
use redis::aio::ConnectionManager;
use tracing::info;

use presence_core::config::RedisCacheConfig;
use presence_core::error::{AppError, ErrorKind};
use presence_core::result::AppResult;

/// Redis client wrapper with connection management.
#[derive(Clone)]
pub struct RedisClient {
    /// Redis connection manager (multiplexed, reconnecting).
    conn: ConnectionManager,
    /// Key prefix for all keys.
    key_prefix: String,
    /// URL with the password masked, for logs.
    display_url: String,
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("url", &self.display_url)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisClient {
    /// Open a connection from configuration.
    pub async fn connect(config: &RedisCacheConfig) -> AppResult<Self> {
        let display_url = mask_redis_url(&config.url);
        info!(url = %display_url, "Connecting to Redis");

        let client = Client::open(config.url.as_str()).map_err(|e| {
            AppError::with_source(ErrorKind::Configuration, "Invalid Redis URL", e)
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            AppError::with_source(ErrorKind::Cache, "Failed to connect to Redis", e)
        })?;

        info!(url = %display_url, "Connected to Redis");
        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            display_url,
        })
    }

    /// A handle to the shared connection.
    pub fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Build a full key with the configured prefix.
    pub fn prefixed_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }
}

/// Replace the password in a Redis URL with `****`.
fn mask_redis_url(url: &str) -> String {
    let (scheme, rest) = url.split_once("://").unwrap_or(("", url));
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _password)) if !scheme.is_empty() => format!("{scheme}://{user}:****@{host}"),
        Some((user, _password)) => format!("{user}:****@{host}"),
        None => url.to_string(),
    }
}
