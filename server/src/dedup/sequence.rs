//! Push-stream sequence id deduplication.
//!
//! Sequence ids arrive with gaps and out-of-order bursts. Besides the
//! duplicate check this tracks the highest id marked so far, recomputing it
//! from the surviving ids whenever a sweep evicts the current maximum.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{CacheEntry, SweepHook, TtlCache, TtlCacheConfig};

pub const DEFAULT_SEQUENCE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SEQUENCE_SWEEP: Duration = Duration::from_secs(5 * 60);

/// Sequence id deduplicator with a high-water mark.
#[derive(Debug)]
pub struct SequenceDeduplicator {
    cache: TtlCache<u64>,
    max_seq: Arc<AtomicU64>,
}

impl SequenceDeduplicator {
    pub fn spawn(ttl: Duration, sweep_interval: Duration) -> Self {
        let max_seq = Arc::new(AtomicU64::new(0));
        let tracked = Arc::clone(&max_seq);
        let hook: SweepHook<u64, ()> = Arc::new(move |live: &HashMap<u64, CacheEntry<()>>| {
            let current = tracked.load(Ordering::Acquire);
            if current == 0 || live.contains_key(&current) {
                return;
            }
            let recomputed = live.keys().copied().max().unwrap_or(0);
            tracked.store(recomputed, Ordering::Release);
            debug!(previous = current, recomputed, "Recomputed max sequence id after eviction");
        });

        Self {
            cache: TtlCache::spawn_with_hook(
                TtlCacheConfig::new("sequence_ids", ttl, sweep_interval),
                hook,
            ),
            max_seq,
        }
    }

    pub fn with_defaults() -> Self {
        Self::spawn(DEFAULT_SEQUENCE_TTL, DEFAULT_SEQUENCE_SWEEP)
    }

    /// Returns `true` if `seq_id` was already marked inside the window.
    ///
    /// Id `0` is treated as blank: never marked, never a duplicate.
    pub fn try_mark_as_processed(&self, seq_id: u64) -> bool {
        self.cache.try_insert_with(seq_id, (), |&id| {
            self.max_seq.fetch_max(id, Ordering::AcqRel);
        })
    }

    pub fn is_processed(&self, seq_id: u64) -> bool {
        self.cache.contains_live(&seq_id)
    }

    /// Highest sequence id marked and not yet evicted, or `0` if none.
    pub fn max_processed_seq_id(&self) -> u64 {
        self.max_seq.load(Ordering::Acquire)
    }

    /// Drop all marks; the hook resets the maximum to `0`.
    pub fn clear(&self) -> usize {
        self.cache.clear()
    }

    /// Run one eviction pass now.
    pub fn sweep(&self) -> usize {
        self.cache.sweep()
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
