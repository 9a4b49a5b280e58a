//! Hookline Server
//!
//! Exactly-once ingestion of platform webhook events and push frames:
//! TTL deduplication, bounded admission, timeout-bounded dispatch, and a
//! singleflight cache for outbound credentials.

pub mod admission;
pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod dedup;
pub mod pipeline;
pub mod settings;
pub mod stream;
pub mod webhooks;
