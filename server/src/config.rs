//! Server Configuration
//!
//! Loads configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::cache::OverflowPolicy;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    pub dedup: DedupConfig,

    pub admission: AdmissionConfig,

    pub pipeline: PipelineConfig,

    pub credentials: CredentialConfig,

    pub webhook: WebhookConfig,

    /// Env file re-read on SIGHUP (optional)
    pub reload_file: Option<PathBuf>,
}

/// Windows and sweep intervals for the three deduplicators.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Event id window (default: 30 min)
    pub event_ttl: Duration,
    pub event_sweep: Duration,
    /// Nonce replay window (default: 5 min)
    pub nonce_ttl: Duration,
    pub nonce_sweep: Duration,
    /// In-memory nonce table cap (default: 10,000)
    pub nonce_max_entries: usize,
    /// What to do when the nonce table is full (default: flush)
    pub nonce_overflow: OverflowPolicy,
    /// Sequence id window (default: 24 h)
    pub sequence_ttl: Duration,
    pub sequence_sweep: Duration,
    /// Redis URL for the shared nonce store (optional; in-memory when unset)
    pub redis_url: Option<String>,
    /// Prefix for Redis nonce keys
    pub redis_key_prefix: String,
}

/// Admission gate sizing.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Concurrent handler runs (default: 100)
    pub capacity: usize,
    /// Longest wait for a slot; unbounded when unset
    pub timeout: Option<Duration>,
}

/// Event pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Budget for all handlers of one event (default: 30 s)
    pub handler_timeout: Duration,
    /// Key for `{"encrypt": ...}` bodies; plain JSON when unset
    pub encrypt_key: Option<String>,
}

/// Outbound credential settings.
#[derive(Debug, Clone)]
pub struct CredentialConfig {
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    /// Base URL of the token endpoints
    pub issuer_base_url: String,
    /// Refresh this long before expiry (default: 300 s)
    pub refresh_threshold: Duration,
    /// Retries after a transient issuer failure (default: 2)
    pub max_retries: u32,
    /// First retry delay, doubled per retry (default: 1 s)
    pub retry_base_delay: Duration,
}

/// Inbound webhook verification.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// HMAC signing secret; signature checks are skipped when unset
    pub signing_secret: Option<String>,
    /// Whether to accept requests when the nonce store is unavailable
    pub fail_open: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let nonce_overflow = match get("NONCE_OVERFLOW_POLICY") {
            Some(raw) => match OverflowPolicy::parse_str(&raw) {
                Some(policy) => policy,
                None => bail!("NONCE_OVERFLOW_POLICY must be 'flush' or 'purge', got '{raw}'"),
            },
            None => OverflowPolicy::Flush,
        };

        let capacity: usize = parse_or(&get, "ADMISSION_CAPACITY", 100)?;
        if capacity == 0 {
            bail!("ADMISSION_CAPACITY must be at least 1");
        }

        Ok(Self {
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".into()),
            dedup: DedupConfig {
                event_ttl: secs_or(&get, "EVENT_DEDUP_TTL_SECS", 30 * 60)?,
                event_sweep: secs_or(&get, "EVENT_DEDUP_SWEEP_SECS", 5 * 60)?,
                nonce_ttl: secs_or(&get, "NONCE_TTL_SECS", 5 * 60)?,
                nonce_sweep: secs_or(&get, "NONCE_SWEEP_SECS", 60)?,
                nonce_max_entries: parse_or(&get, "NONCE_MAX_ENTRIES", 10_000)?,
                nonce_overflow,
                sequence_ttl: secs_or(&get, "SEQUENCE_DEDUP_TTL_SECS", 24 * 60 * 60)?,
                sequence_sweep: secs_or(&get, "SEQUENCE_DEDUP_SWEEP_SECS", 5 * 60)?,
                redis_url: get("REDIS_URL"),
                redis_key_prefix: get("REDIS_KEY_PREFIX")
                    .unwrap_or_else(|| "hookline:nonce".into()),
            },
            admission: AdmissionConfig {
                capacity,
                timeout: get("ADMISSION_TIMEOUT_MS")
                    .map(|v| v.parse().map(Duration::from_millis))
                    .transpose()
                    .context("ADMISSION_TIMEOUT_MS must be an integer")?,
            },
            pipeline: PipelineConfig {
                handler_timeout: millis_or(&get, "HANDLER_TIMEOUT_MS", 30_000)?,
                encrypt_key: get("ENCRYPT_KEY"),
            },
            credentials: CredentialConfig {
                app_id: get("APP_ID"),
                app_secret: get("APP_SECRET"),
                issuer_base_url: get("TOKEN_ISSUER_URL")
                    .unwrap_or_else(|| "https://open.feishu.cn/open-apis".into()),
                refresh_threshold: secs_or(&get, "TOKEN_REFRESH_THRESHOLD_SECS", 300)?,
                max_retries: parse_or(&get, "TOKEN_RETRY_MAX", 2)?,
                retry_base_delay: millis_or(&get, "TOKEN_RETRY_BASE_MS", 1_000)?,
            },
            webhook: WebhookConfig {
                signing_secret: get("WEBHOOK_SIGNING_SECRET"),
                fail_open: parse_or(&get, "WEBHOOK_FAIL_OPEN", true)?,
            },
            reload_file: get("HOOKLINE_RELOAD_FILE").map(PathBuf::from),
        })
    }

    /// Check if outbound credentials are configured.
    #[must_use]
    pub const fn has_app_credentials(&self) -> bool {
        self.credentials.app_id.is_some() && self.credentials.app_secret.is_some()
    }

    /// Create a default configuration for testing.
    ///
    /// Plain JSON bodies, no signing secret, in-memory nonce store.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            dedup: DedupConfig {
                event_ttl: Duration::from_secs(30 * 60),
                event_sweep: Duration::from_secs(5 * 60),
                nonce_ttl: Duration::from_secs(5 * 60),
                nonce_sweep: Duration::from_secs(60),
                nonce_max_entries: 10_000,
                nonce_overflow: OverflowPolicy::Flush,
                sequence_ttl: Duration::from_secs(24 * 60 * 60),
                sequence_sweep: Duration::from_secs(5 * 60),
                redis_url: None,
                redis_key_prefix: "hookline-test:nonce".into(),
            },
            admission: AdmissionConfig {
                capacity: 8,
                timeout: None,
            },
            pipeline: PipelineConfig {
                handler_timeout: Duration::from_secs(5),
                encrypt_key: None,
            },
            credentials: CredentialConfig {
                app_id: None,
                app_secret: None,
                issuer_base_url: "http://127.0.0.1:9".into(),
                refresh_threshold: Duration::from_secs(300),
                max_retries: 2,
                retry_base_delay: Duration::from_secs(1),
            },
            webhook: WebhookConfig {
                signing_secret: None,
                fail_open: true,
            },
            reload_file: None,
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: '{raw}'")),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &str, default: u64) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default).map(Duration::from_secs)
}

fn millis_or<G>(get: &G, key: &str, default: u64) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default).map(Duration::from_millis)
}
