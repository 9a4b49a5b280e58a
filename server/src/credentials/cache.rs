//! Singleflight credential cache.
//!
//! Each `(app_id, kind)` slot is either a cached token or an in-flight
//! refresh. The refresh runs on its own task and is shared with every caller
//! that arrives while it is pending, so the issuer sees at most one request
//! per slot at a time. Failed refreshes are handed to all waiters and never
//! cached. A generation number per refresh keeps a refresh that was
//! invalidated mid-flight from publishing its result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::CredentialError;
use super::issuer::TokenIssuer;
use super::types::{AppCredentials, CredentialToken, TokenKind};

/// Lifetime assumed when the issuer omits `expire`.
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(7200);

/// How long before expiry a token is refreshed.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

type SlotKey = (String, TokenKind);
type RefreshFuture = Shared<BoxFuture<'static, Result<CredentialToken, CredentialError>>>;

/// Retries for transient issuer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(1_u32.checked_shl(retry).unwrap_or(u32::MAX))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

enum Slot {
    Cached(CredentialToken),
    Loading {
        generation: u64,
        refresh: RefreshFuture,
    },
}

/// Process-wide token cache.
pub struct CredentialCache {
    issuer: Arc<dyn TokenIssuer>,
    slots: Arc<DashMap<SlotKey, Slot>>,
    generation: AtomicU64,
    refresh_threshold_ms: AtomicU64,
    default_expiry: Duration,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl CredentialCache {
    pub fn new(issuer: Arc<dyn TokenIssuer>) -> Self {
        Self::with_options(
            issuer,
            DEFAULT_REFRESH_THRESHOLD,
            DEFAULT_TOKEN_EXPIRY,
            RetryPolicy::default(),
        )
    }

    pub fn with_options(
        issuer: Arc<dyn TokenIssuer>,
        refresh_threshold: Duration,
        default_expiry: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            issuer,
            slots: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            refresh_threshold_ms: AtomicU64::new(duration_ms(refresh_threshold)),
            default_expiry,
            retry,
            shutdown: CancellationToken::new(),
        }
    }

    /// Return a usable access token, refreshing it if absent or near expiry.
    pub async fn get_token(
        &self,
        app: &AppCredentials,
        kind: TokenKind,
    ) -> Result<String, CredentialError> {
        let refresh = {
            let now = Instant::now();
            let threshold = self.refresh_threshold();
            let key = (app.app_id.clone(), kind);

            match self.slots.entry(key.clone()) {
                Entry::Occupied(mut occupied) => {
                    let pending = match occupied.get() {
                        Slot::Cached(token) if !token.needs_refresh(now, threshold) => {
                            return Ok(token.access_token.clone());
                        }
                        Slot::Loading { refresh, .. } => Some(refresh.clone()),
                        Slot::Cached(_) => None,
                    };
                    match pending {
                        Some(refresh) => refresh,
                        None => {
                            debug!(app_id = %app.app_id, %kind, "Token near expiry, refreshing");
                            let (generation, refresh) = self.start_refresh(key, app);
                            occupied.insert(Slot::Loading {
                                generation,
                                refresh: refresh.clone(),
                            });
                            refresh
                        }
                    }
                }
                Entry::Vacant(vacant) => {
                    let (generation, refresh) = self.start_refresh(key, app);
                    vacant.insert(Slot::Loading {
                        generation,
                        refresh: refresh.clone(),
                    });
                    refresh
                }
            }
        };

        refresh.await.map(|token| token.access_token)
    }

    /// Spawn the refresh task. Called with the slot's entry lock held; the
    /// task cannot publish before the caller has installed the slot.
    fn start_refresh(&self, key: SlotKey, app: &AppCredentials) -> (u64, RefreshFuture) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let issuer = Arc::clone(&self.issuer);
        let slots = Arc::clone(&self.slots);
        let app = app.clone();
        let retry = self.retry;
        let default_expiry = self.default_expiry;
        let cancel = self.shutdown.child_token();

        let task = tokio::spawn(async move {
            let result =
                issue_with_retry(issuer.as_ref(), &app, key.1, retry, default_expiry, &cancel)
                    .await;

            let owns_slot = |slot: &Slot| {
                matches!(slot, Slot::Loading { generation: g, .. } if *g == generation)
            };
            match &result {
                Ok(token) => {
                    if let Some(mut slot) = slots.get_mut(&key) {
                        if owns_slot(slot.value()) {
                            *slot = Slot::Cached(token.clone());
                        }
                    }
                }
                Err(_) => {
                    slots.remove_if(&key, |_, slot| owns_slot(slot));
                }
            }
            result
        });

        let refresh = async move {
            task.await
                .map_err(|e| CredentialError::Internal(e.to_string()))?
        }
        .boxed()
        .shared();

        (generation, refresh)
    }

    /// Drop one cached token or pending refresh.
    pub fn invalidate(&self, app_id: &str, kind: TokenKind) -> bool {
        let removed = self.slots.remove(&(app_id.to_string(), kind)).is_some();
        if removed {
            info!(app_id, %kind, "Credential invalidated");
        }
        removed
    }

    /// Drop everything. Returns the number of slots removed.
    pub fn clear(&self) -> usize {
        let count = self.slots.len();
        self.slots.clear();
        count
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_millis(self.refresh_threshold_ms.load(Ordering::Acquire))
    }

    pub fn set_refresh_threshold(&self, threshold: Duration) {
        let previous = self
            .refresh_threshold_ms
            .swap(duration_ms(threshold), Ordering::AcqRel);
        if previous != duration_ms(threshold) {
            info!(threshold_secs = threshold.as_secs(), "Credential refresh threshold updated");
        }
    }

    /// Number of cached or loading slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Cancel in-flight refreshes; waiters receive [`CredentialError::Cancelled`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for CredentialCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("slots", &self.slots.len())
            .field("refresh_threshold", &self.refresh_threshold())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[tracing::instrument(skip(issuer, app, retry, default_expiry, cancel), fields(app_id = %app.app_id))]
async fn issue_with_retry(
    issuer: &dyn TokenIssuer,
    app: &AppCredentials,
    kind: TokenKind,
    retry: RetryPolicy,
    default_expiry: Duration,
    cancel: &CancellationToken,
) -> Result<CredentialToken, CredentialError> {
    let mut attempt = 0;
    loop {
        match issue_once(issuer, app, kind, default_expiry, cancel).await {
            Ok(token) => {
                debug!(attempt, "Token issued");
                return Ok(token);
            }
            Err(e) if e.is_transient() && attempt < retry.max_retries => {
                let delay = retry.delay_for(attempt);
                attempt += 1;
                warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "Token issue failed, retrying");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(CredentialError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                warn!(error = %e, attempt, "Token issue failed");
                return Err(e);
            }
        }
    }
}

async fn issue_once(
    issuer: &dyn TokenIssuer,
    app: &AppCredentials,
    kind: TokenKind,
    default_expiry: Duration,
    cancel: &CancellationToken,
) -> Result<CredentialToken, CredentialError> {
    let grant = issuer
        .acquire_token(&app.app_id, &app.app_secret, kind, cancel)
        .await?
        .ok_or(CredentialError::EmptyResponse)?;

    if grant.code != 0 {
        return Err(CredentialError::Rejected {
            code: grant.code,
            message: grant.message,
        });
    }
    if grant.access_token.is_empty() {
        return Err(CredentialError::EmptyToken);
    }

    let lifetime = grant
        .expires_in
        .filter(|secs| *secs > 0)
        .map_or(default_expiry, Duration::from_secs);

    Ok(CredentialToken {
        access_token: grant.access_token,
        expires_at: Instant::now() + lifetime,
        kind,
    })
}
