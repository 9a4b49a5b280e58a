//! Webhook event id deduplication.

use std::time::Duration;

use crate::cache::{TtlCache, TtlCacheConfig};

/// Default window in which a repeated event id counts as a duplicate.
pub const DEFAULT_EVENT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default sweep period for the event id cache.
pub const DEFAULT_EVENT_SWEEP: Duration = Duration::from_secs(5 * 60);

/// Guards webhook handlers against repeated delivery of the same event.
#[derive(Debug)]
pub struct EventDeduplicator {
    cache: TtlCache<String>,
}

impl EventDeduplicator {
    /// Start a deduplicator with its own sweep task.
    pub fn spawn(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            cache: TtlCache::spawn(TtlCacheConfig::new("event_ids", ttl, sweep_interval)),
        }
    }

    /// Start a deduplicator with the default 30 minute window.
    pub fn with_defaults() -> Self {
        Self::spawn(DEFAULT_EVENT_TTL, DEFAULT_EVENT_SWEEP)
    }

    /// Mark `event_id` as processed.
    ///
    /// Returns `true` if it was already processed inside the window, in which
    /// case the caller must not run handlers again.
    pub fn try_mark_as_processed(&self, event_id: &str) -> bool {
        self.cache.try_insert(event_id.to_owned(), ())
    }

    /// Whether `event_id` is marked and still inside the window.
    pub fn is_processed(&self, event_id: &str) -> bool {
        self.cache.contains_live(event_id)
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

    /// Stop the sweep task and drop all marks.
    pub async fn dispose(&self) -> usize {
        self.cache.dispose().await
    }
}
