//! Redis-backed nonce store.
//!
//! One `SET <prefix>:<nonce> 1 EX <ttl> NX` per check: the reply is `OK` for
//! a fresh nonce and nil for a replay, so the check-and-mark stays atomic
//! across every server instance sharing the Redis.

use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use fred::types::SetOptions;
use tracing::{info, warn};

use super::{DedupError, NonceStore};

/// Connect a Redis client and wait until it is ready.
pub async fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let config = Config::from_url(redis_url)?;
    let client = Client::new(config, None, None, None);
    client.connect();
    client.wait_for_connect().await?;

    info!("Connected to Redis");
    Ok(client)
}

/// Nonce store shared between server instances through Redis.
#[derive(Clone)]
pub struct RedisNonceStore {
    redis: Client,
    key_prefix: String,
    ttl: Duration,
}

impl RedisNonceStore {
    pub fn new(redis: Client, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    fn build_key(&self, nonce: &str) -> String {
        format!("{}:{}", self.key_prefix, nonce)
    }

    /// TTL in whole seconds, never below one.
    fn ttl_secs(&self) -> i64 {
        self.ttl.as_secs().max(1) as i64
    }
}

#[async_trait]
impl NonceStore for RedisNonceStore {
    #[tracing::instrument(skip(self))]
    async fn try_mark(&self, nonce: &str) -> Result<bool, DedupError> {
        if nonce.is_empty() {
            warn!("Rejected blank nonce");
            return Ok(false);
        }

        let reply: Option<String> = self
            .redis
            .set(
                self.build_key(nonce),
                "1",
                Some(Expiration::EX(self.ttl_secs())),
                Some(SetOptions::NX),
                false,
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "Redis nonce check failed");
                DedupError::Store(e.to_string())
            })?;

        Ok(reply.is_none())
    }

    fn window(&self) -> Duration {
        self.ttl
    }
}
