//! At-most-once processing keys, backed by Redis `SET NX EX`.

use std::time::Duration;

use async_trait::async_trait;
use redis::Client as RedisClient;
use tracing::warn;

/// Redelivered Pub/Sub messages are suppressed for this long.
pub const MESSAGE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Drive files seen by the poller are remembered for a week.
pub const DRIVE_FILE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Claims `key` for `ttl`. `false` means someone already claimed it.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, redis::RedisError>;

    /// Drops a claim so the next attempt is treated as a first delivery.
    async fn release(&self, key: &str) -> Result<(), redis::RedisError>;
}

#[derive(Clone)]
pub struct RedisIdempotency {
    client: RedisClient,
    prefix: String,
}

impl RedisIdempotency {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            prefix: "jetsmx:".to_string(),
        }
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotency {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(format!("{}{key}", self.prefix))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("DEL")
            .arg(format!("{}{key}", self.prefix))
            .query_async::<_, ()>(&mut conn)
            .await
    }
}

/// Claims `key`, treating an unavailable store as a first delivery so a
/// Redis outage degrades to at-least-once instead of dropping work.
pub async fn first_delivery(store: &dyn IdempotencyStore, key: &str, ttl: Duration) -> bool {
    match store.claim(key, ttl).await {
        Ok(claimed) => claimed,
        Err(e) => {
            warn!(key, error = %e, "Idempotency store unavailable, processing anyway");
            true
        }
    }
}

/// Releases a claim whose work failed. An unreachable store is logged; the
/// key then expires with its TTL.
pub async fn release_claim(store: &dyn IdempotencyStore, key: &str) {
    if let Err(e) = store.release(key).await {
        warn!(key, error = %e, "Failed to release idempotency key");
    }
}
