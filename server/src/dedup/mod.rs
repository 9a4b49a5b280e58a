//! Idempotency Guards
//!
//! Three specializations of [`TtlCache`](crate::cache::TtlCache) share one
//! contract: `try_mark_as_processed(id)` returns `true` for a duplicate and
//! `false` for a newly accepted id, atomically. Callers must never split this
//! into a separate check and mark.
//!
//! - [`EventDeduplicator`]: webhook event ids (30 min window).
//! - [`NonceDeduplicator`]: signature replay nonces (5 min window), plus the
//!   async [`NonceStore`] seam with a Redis-backed implementation.
//! - [`SequenceDeduplicator`]: push-stream sequence ids (24 h window) with
//!   the highest id seen.

pub mod event;
pub mod nonce;
pub mod redis;
pub mod sequence;

pub use event::EventDeduplicator;
pub use nonce::{NonceDeduplicator, NonceStore};
pub use redis::RedisNonceStore;
pub use sequence::SequenceDeduplicator;

use thiserror::Error;

/// Errors from a deduplication backend. The in-memory caches never fail.
#[derive(Debug, Error)]
pub enum DedupError {
    /// The remote store could not be reached or rejected the command.
    #[error("Dedup store unavailable: {0}")]
    Store(String),
}
