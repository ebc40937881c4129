//! Redis remote tier implementation.
//!
//! Each record is a hash with two fields, `v` (version, unix millis of the
//! record's `last_updated`) and `d` (JSON payload). Writes go through a Lua
//! script so the version check and the write are atomic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use presence_core::config::RedisCacheConfig;
use presence_core::error::{AppError, ErrorKind};
use presence_core::result::AppResult;
use presence_core::shutdown::{self, ShutdownReceiver};
use presence_core::traits::cache::{RemoteCacheTier, RemoteValue, RemoteWrite};
use presence_resilience::backoff::{self, BackoffPolicy, Retrier, RetryDecision};

use super::client::RedisClient;
use crate::dual::DualTierCache;

/// Write `ARGV[2]` at version `ARGV[1]` with a TTL of `ARGV[3]` ms unless a
/// newer version is stored. Returns 1 if written, 0 if skipped.
const SET_IF_NEWER_LUA: &str = r#"
local current = redis.call('HGET', KEYS[1], 'v')
if current and tonumber(current) > tonumber(ARGV[1]) then
  return 0
end
redis.call('HSET', KEYS[1], 'v', ARGV[1], 'd', ARGV[2])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return 1
"#;

/// Redis-backed remote tier.
#[derive(Debug, Clone)]
pub struct RedisTier {
    /// Redis client.
    client: RedisClient,
    /// Compiled last-write-wins script.
    script: Arc<Script>,
}

impl RedisTier {
    /// Wrap an existing client.
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            script: Arc::new(Script::new(SET_IF_NEWER_LUA)),
        }
    }

    /// Connect and verify the server answers.
    pub async fn connect(config: &RedisCacheConfig) -> AppResult<Self> {
        let tier = Self::new(RedisClient::connect(config).await?);
        tier.health_check().await?;
        Ok(tier)
    }

    /// Connect under the `cache_reconnect` backoff profile.
    ///
    /// Cache errors are retried here even though the read path never retries
    /// them; a bad URL is not.
    pub async fn connect_with_retry(
        config: &RedisCacheConfig,
        retrier: &Retrier,
    ) -> AppResult<Self> {
        retrier
            .run_with(
                |attempt| {
                    debug!(attempt, "Attempting Redis connection");
                    Self::connect(config)
                },
                |err| match err.kind {
                    ErrorKind::Cache => RetryDecision::Retry { after: None },
                    _ => backoff::classify(err),
                },
            )
            .await
    }

    /// Map a Redis error to an AppError.
    fn map_err(e: redis::RedisError) -> AppError {
        AppError::with_source(ErrorKind::Cache, format!("Redis error: {e}"), e)
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        (ttl.as_millis() as u64).max(1)
    }

    /// `PTTL` reply to a remaining TTL. `-1` means no expiry.
    fn remaining(pttl: i64) -> Option<Duration> {
        u64::try_from(pttl).ok().map(Duration::from_millis)
    }

    /// Interleaved `HGET d` / `PTTL` replies, one pair per key.
    fn paired_values(replies: Vec<redis::Value>) -> AppResult<Vec<Option<RemoteValue>>> {
        let mut values = Vec::with_capacity(replies.len() / 2);
        let mut replies = replies.into_iter();
        while let (Some(payload), Some(pttl)) = (replies.next(), replies.next()) {
            let payload: Option<String> =
                redis::from_redis_value(payload).map_err(|e| Self::map_err(e.into()))?;
            let pttl: i64 = redis::from_redis_value(pttl).map_err(|e| Self::map_err(e.into()))?;
            values.push(payload.map(|payload| RemoteValue {
                payload,
                ttl_remaining: Self::remaining(pttl),
            }));
        }
        Ok(values)
    }

    /// Per-key script replies: 1 written, 0 skipped, server error failed.
    fn write_outcomes(replies: Vec<redis::RedisResult<i64>>) -> Vec<AppResult<bool>> {
        replies
            .into_iter()
            .map(|reply| reply.map(|written| written == 1).map_err(Self::map_err))
            .collect()
    }
}

#[async_trait]
impl RemoteCacheTier for RedisTier {
    async fn get(&self, key: &str) -> AppResult<Option<RemoteValue>> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn();
        let (payload, pttl): (Option<String>, i64) = redis::pipe()
            .cmd("HGET")
            .arg(&full_key)
            .arg("d")
            .cmd("PTTL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;

        Ok(payload.map(|payload| RemoteValue {
            payload,
            ttl_remaining: Self::remaining(pttl),
        }))
    }

    async fn get_many(&self, keys: &[String]) -> AppResult<Vec<Option<RemoteValue>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let full_keys: Vec<String> = keys.iter().map(|k| self.client.prefixed_key(k)).collect();
        let mut conn = self.client.conn();

        let mut pipe = redis::pipe();
        for key in &full_keys {
            pipe.cmd("HGET").arg(key).arg("d").cmd("PTTL").arg(key);
        }
        let replies: Vec<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Self::paired_values(replies)
    }

    async fn set_if_newer(
        &self,
        key: &str,
        payload: &str,
        version: i64,
        ttl: Duration,
    ) -> AppResult<bool> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn();
        let written: i64 = self
            .script
            .key(&full_key)
            .arg(version)
            .arg(payload)
            .arg(Self::ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        if written == 0 {
            debug!(key = %full_key, version, "Skipped older remote write");
        }
        Ok(written == 1)
    }

    async fn set_many_if_newer(&self, writes: &[RemoteWrite]) -> AppResult<Vec<AppResult<bool>>> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        for write in writes {
            pipe.cmd("EVAL")
                .arg(SET_IF_NEWER_LUA)
                .arg(1)
                .arg(self.client.prefixed_key(&write.key))
                .arg(write.version)
                .arg(&write.payload)
                .arg(Self::ttl_millis(write.ttl));
        }
        // One bad key must not fail the whole batch.
        pipe.ignore_errors();
        let mut conn = self.client.conn();
        let replies: Vec<redis::RedisResult<i64>> =
            pipe.query_async(&mut conn).await.map_err(Self::map_err)?;
        let outcomes = Self::write_outcomes(replies);
        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        if failed > 0 {
            warn!(failed, total = writes.len(), "Some remote writes in the batch failed");
        }
        Ok(outcomes)
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let full_key = self.client.prefixed_key(key);
        let mut conn = self.client.conn();
        let _: () = conn.del(&full_key).await.map_err(Self::map_err)?;
        Ok(())
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.client.conn();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(pong == "PONG")
    }
}

/// Connect the remote tier in the background and attach it to `cache`.
///
/// Runs one `cache_reconnect` retry cycle after another, pausing
/// `max_delay` between cycles, until a connection succeeds or shutdown is
/// signalled. The cache serves from the in-process tier meanwhile.
pub fn spawn_connector(
    cache: Arc<DualTierCache>,
    config: RedisCacheConfig,
    policy: BackoffPolicy,
    shutdown: ShutdownReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pause = policy.max_delay;
        let retrier = Retrier::new("cache_reconnect", policy).with_shutdown(shutdown.clone());
        loop {
            match RedisTier::connect_with_retry(&config, &retrier).await {
                Ok(tier) => {
                    cache.attach_remote(Arc::new(tier));
                    return;
                }
                Err(e) if e.kind == ErrorKind::Cancelled => return,
                Err(e) if e.kind == ErrorKind::Configuration => {
                    error!(error = %e, "Redis configuration is invalid, remote tier disabled");
                    return;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        pause_ms = pause.as_millis() as u64,
                        "Redis unreachable, serving from the in-process tier"
                    );
                    if shutdown::sleep(pause, Some(&shutdown)).await.is_err() {
                        info!("Redis connector stopped by shutdown");
                        return;
                    }
                }
            }
        }
    })
}
