//! Replay nonce deduplication.
//!
//! The in-memory cache caps itself at [`DEFAULT_NONCE_MAX_ENTRIES`]; the
//! default overflow policy flushes the whole table.

use std::time::Duration;

use async_trait::async_trait;

use super::DedupError;
use crate::cache::{OverflowPolicy, TtlCache, TtlCacheConfig};

pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_NONCE_SWEEP: Duration = Duration::from_secs(60);
pub const DEFAULT_NONCE_MAX_ENTRIES: usize = 10_000;

/// Replay guard that may live in process or in a shared store.
///
/// Same contract as [`NonceDeduplicator::try_mark_as_processed`]: `Ok(true)`
/// is a replay, `Ok(false)` is a fresh nonce that is now marked.
#[async_trait]
pub trait NonceStore: Send + Sync {
    async fn try_mark(&self, nonce: &str) -> Result<bool, DedupError>;

    /// How long a nonce stays marked.
    fn window(&self) -> Duration;
}

/// In-process nonce cache.
#[derive(Debug)]
pub struct NonceDeduplicator {
    cache: TtlCache<String>,
}

impl NonceDeduplicator {
    pub fn spawn(
        ttl: Duration,
        sweep_interval: Duration,
        max_entries: usize,
        overflow: OverflowPolicy,
    ) -> Self {
        let config = TtlCacheConfig::new("nonces", ttl, sweep_interval)
            .with_max_entries(max_entries, overflow);
        Self {
            cache: TtlCache::spawn(config),
        }
    }

    pub fn with_defaults() -> Self {
        Self::spawn(
            DEFAULT_NONCE_TTL,
            DEFAULT_NONCE_SWEEP,
            DEFAULT_NONCE_MAX_ENTRIES,
            OverflowPolicy::Flush,
        )
    }

    /// Returns `true` if `nonce` was already seen inside the window.
    pub fn try_mark_as_processed(&self, nonce: &str) -> bool {
        self.cache.try_insert(nonce.to_owned(), ())
    }

    pub fn is_processed(&self, nonce: &str) -> bool {
        self.cache.contains_live(nonce)
    }

    pub fn clear(&self) -> usize {
        self.cache.clear()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub async fn dispose(&self) -> usize {
        self.cache.dispose().await
    }
}

#[async_trait]
impl NonceStore for NonceDeduplicator {
    async fn try_mark(&self, nonce: &str) -> Result<bool, DedupError> {
        Ok(self.try_mark_as_processed(nonce))
    }

    fn window(&self) -> Duration {
        self.cache.ttl()
    }
}
