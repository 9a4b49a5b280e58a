//! TTL Cache
//!
//! Mutex-guarded map of keys to creation timestamps with a cancellable
//! background sweep. All foreground operations and the sweep share the same
//! lock; nothing awaits while holding it.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Keys accepted by a [`TtlCache`].
///
/// A blank key (empty string, zero id) is never cached.
pub trait CacheKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {
    /// Whether this key is the blank/default value for its type.
    fn is_blank(&self) -> bool;
}

impl CacheKey for String {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl CacheKey for u64 {
    fn is_blank(&self) -> bool {
        *self == 0
    }
}

/// One cached value and the instant it was first marked.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
}

impl<V> CacheEntry<V> {
    /// An entry is live while `now - created_at <= ttl`.
    pub fn is_live(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) <= ttl
    }
}

/// What to do when an insert would push the cache past `max_entries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop every entry, then insert.
    Flush,
    /// Drop expired entries, then the oldest live ones, until there is room.
    PurgeExpired,
}

impl OverflowPolicy {
    /// Parse from a config string (`"flush"` or `"purge"`).
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flush" => Some(Self::Flush),
            "purge" | "purge_expired" => Some(Self::PurgeExpired),
            _ => None,
        }
    }
}

/// Construction parameters for a [`TtlCache`].
#[derive(Debug, Clone)]
pub struct TtlCacheConfig {
    /// Short name used in log fields.
    pub name: &'static str,
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub max_entries: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl TtlCacheConfig {
    /// Unbounded cache with the given TTL and sweep interval.
    pub const fn new(name: &'static str, ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            name,
            ttl,
            sweep_interval,
            max_entries: None,
            overflow: OverflowPolicy::PurgeExpired,
        }
    }

    /// Cap the number of entries and choose how overflow is handled.
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize, overflow: OverflowPolicy) -> Self {
        self.max_entries = Some(max_entries);
        self.overflow = overflow;
        self
    }
}

/// Callback run under the cache lock after entries are evicted, with read
/// access to everything that survived.
pub type SweepHook<K, V> = Arc<dyn Fn(&HashMap<K, CacheEntry<V>>) + Send + Sync>;

struct Shared<K, V> {
    table: Mutex<HashMap<K, CacheEntry<V>>>,
    config: TtlCacheConfig,
    hook: Option<SweepHook<K, V>>,
}

impl<K: CacheKey, V> Shared<K, V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<V>>> {
        // Nothing under the lock can leave the map half-updated.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn after_eviction(&self, table: &HashMap<K, CacheEntry<V>>) {
        if let Some(hook) = &self.hook {
            hook(table);
        }
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let mut table = self.lock();
        let before = table.len();
        table.retain(|_, entry| entry.is_live(now, ttl));
        let removed = before - table.len();
        self.after_eviction(&table);
        removed
    }

    /// Make room for one more entry according to the overflow policy.
    fn enforce_capacity(&self, table: &mut HashMap<K, CacheEntry<V>>, now: Instant) {
        let Some(max) = self.config.max_entries else {
            return;
        };
        if table.len() < max {
            return;
        }

        match self.config.overflow {
            OverflowPolicy::Flush => {
                warn!(
                    cache = self.config.name,
                    entries = table.len(),
                    max_entries = max,
                    "Cache reached capacity, flushing all entries"
                );
                table.clear();
            }
            OverflowPolicy::PurgeExpired => {
                let ttl = self.config.ttl;
                table.retain(|_, entry| entry.is_live(now, ttl));
                while table.len() >= max {
                    let oldest = table
                        .iter()
                        .min_by_key(|(_, entry)| entry.created_at)
                        .map(|(key, _)| key.clone());
                    match oldest {
                        Some(key) => {
                            table.remove(&key);
                        }
                        None => break,
                    }
                }
                debug!(
                    cache = self.config.name,
                    entries = table.len(),
                    "Cache reached capacity, purged expired and oldest entries"
                );
            }
        }
        self.after_eviction(table);
    }
}

/// Expiring key/value store with background eviction.
///
/// Must be constructed inside a Tokio runtime: construction spawns the sweep
/// task. Dropping the cache cancels the task; [`TtlCache::dispose`] also
/// joins it and clears the table.
pub struct TtlCache<K: CacheKey, V = ()> {
    shared: Arc<Shared<K, V>>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: CacheKey,
    V: Clone + Send + 'static,
{
    /// Create the cache and start its sweep task.
    pub fn spawn(config: TtlCacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Create the cache with a hook that runs after every eviction pass.
    pub fn spawn_with_hook(config: TtlCacheConfig, hook: SweepHook<K, V>) -> Self {
        Self::build(config, Some(hook))
    }

    fn build(config: TtlCacheConfig, hook: Option<SweepHook<K, V>>) -> Self {
        let shared = Arc::new(Shared {
            table: Mutex::new(HashMap::new()),
            config,
            hook,
        });
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_sweeper(Arc::clone(&shared), shutdown.clone()));

        Self {
            shared,
            shutdown,
            sweeper: Mutex::new(Some(handle)),
        }
    }

    /// Atomically mark `key`.
    ///
    /// Returns `true` if a live entry already existed (duplicate; its
    /// timestamp is left untouched) and `false` if the key was newly marked.
    /// Blank keys are never cached and report `false`.
    pub fn try_insert(&self, key: K, value: V) -> bool {
        self.try_insert_with(key, value, |_| {})
    }

    /// [`try_insert`](Self::try_insert) that runs `on_marked` under the
    /// cache lock when the key is newly marked, so state derived from the
    /// table cannot interleave with a sweep or [`clear`](Self::clear).
    pub fn try_insert_with<F>(&self, key: K, value: V, on_marked: F) -> bool
    where
        F: FnOnce(&K),
    {
        if key.is_blank() {
            warn!(cache = self.shared.config.name, "Rejected blank cache key");
            return false;
        }

        let now = Instant::now();
        let ttl = self.shared.config.ttl;
        let mut table = self.shared.lock();

        if let Some(entry) = table.get(&key) {
            if entry.is_live(now, ttl) {
                return true;
            }
        } else {
            self.shared.enforce_capacity(&mut table, now);
        }

        on_marked(&key);
        table.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
            },
        );
        false
    }

    /// Insert or replace `key`, restarting its TTL.
    pub fn insert(&self, key: K, value: V) {
        if key.is_blank() {
            warn!(cache = self.shared.config.name, "Rejected blank cache key");
            return;
        }

        let now = Instant::now();
        let mut table = self.shared.lock();
        if !table.contains_key(&key) {
            self.shared.enforce_capacity(&mut table, now);
        }
        table.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
            },
        );
    }

    /// Value of a live entry, if any.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        let table = self.shared.lock();
        table
            .get(key)
            .filter(|entry| entry.is_live(now, self.shared.config.ttl))
            .map(|entry| entry.value.clone())
    }

    /// Whether a live entry exists for `key`. Never mutates.
    pub fn contains_live<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        self.shared
            .lock()
            .get(key)
            .is_some_and(|entry| entry.is_live(now, self.shared.config.ttl))
    }

    /// Remove one entry. Returns whether it was present.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.lock().remove(key).is_some()
    }

    /// Remove every entry and return how many there were.
    pub fn clear(&self) -> usize {
        let mut table = self.shared.lock();
        let removed = table.len();
        table.clear();
        self.shared.after_eviction(&table);
        removed
    }

    /// Current entry count, including expired entries not yet swept.
    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one eviction pass now. Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    pub fn ttl(&self) -> Duration {
        self.shared.config.ttl
    }

    pub fn sweep_interval(&self) -> Duration {
        self.shared.config.sweep_interval
    }

    /// Stop the sweep task, wait for it to exit, and clear the table.
    ///
    /// Returns the number of entries dropped. Calling it twice is harmless.
    pub async fn dispose(&self) -> usize {
        self.shutdown.cancel();
        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(cache = self.shared.config.name, error = %e, "Sweep task ended abnormally");
            }
        }
        self.clear()
    }
}

impl<K: CacheKey, V> Drop for TtlCache<K, V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl<K: CacheKey, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.shared.config.name)
            .field("ttl", &self.shared.config.ttl)
            .field("sweep_interval", &self.shared.config.sweep_interval)
            .finish_non_exhaustive()
    }
}

async fn run_sweeper<K: CacheKey, V>(shared: Arc<Shared<K, V>>, shutdown: CancellationToken) {
    let period = shared.config.sweep_interval.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // consume immediate first tick

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let removed = shared.sweep();
                if removed > 0 {
                    debug!(cache = shared.config.name, removed, "Swept expired cache entries");
                }
            }
        }
    }
}
