//! Expiring Caches
//!
//! In-process, TTL-bounded key stores shared by the deduplicators. Each cache
//! owns one background sweep task for its whole lifetime.

pub mod ttl;

pub use ttl::{CacheEntry, CacheKey, OverflowPolicy, SweepHook, TtlCache, TtlCacheConfig};
