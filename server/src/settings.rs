//! Hot-reloadable runtime settings.
//!
//! The hot subset of [`Config`] is published on a `watch` channel. The
//! pipeline reads it per request; an applier task pushes capacity and
//! refresh-threshold changes into the admission gate and credential cache.
//! TTLs and sweep intervals are not part of it: they only apply to caches
//! built at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::admission::AdmissionGate;
use crate::config::Config;
use crate::credentials::CredentialCache;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub admission_capacity: usize,
    pub handler_timeout: Duration,
    pub admission_timeout: Option<Duration>,
    pub refresh_threshold: Duration,
}

impl RuntimeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            admission_capacity: config.admission.capacity,
            handler_timeout: config.pipeline.handler_timeout,
            admission_timeout: config.admission.timeout,
            refresh_threshold: config.credentials.refresh_threshold,
        }
    }
}

/// Publish `settings` if they differ from the current value.
pub fn publish(tx: &watch::Sender<RuntimeSettings>, settings: RuntimeSettings) -> bool {
    tx.send_if_modified(|current| {
        if *current == settings {
            return false;
        }
        *current = settings;
        true
    })
}

/// Push settings into the live components.
pub fn apply(settings: &RuntimeSettings, gate: &AdmissionGate, credentials: Option<&CredentialCache>) {
    if gate.capacity() != settings.admission_capacity {
        gate.set_capacity(settings.admission_capacity);
    }
    if let Some(credentials) = credentials {
        credentials.set_refresh_threshold(settings.refresh_threshold);
    }
}

/// Apply every published change until `shutdown` fires.
pub fn spawn_applier(
    mut rx: watch::Receiver<RuntimeSettings>,
    gate: Arc<AdmissionGate>,
    credentials: Option<Arc<CredentialCache>>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let settings = rx.borrow_and_update().clone();
                    apply(&settings, &gate, credentials.as_deref());
                    info!(
                        admission_capacity = settings.admission_capacity,
                        handler_timeout_ms = settings.handler_timeout.as_millis() as u64,
                        "Runtime settings applied"
                    );
                }
            }
        }
    })
}

/// Re-read configuration with `path` overlaid on the process environment.
pub fn reload_from(path: &Path) -> Result<RuntimeSettings> {
    let overrides = dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .collect::<Result<HashMap<String, String>, _>>()
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let config = Config::from_lookup(|key| {
        overrides
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    })?;
    Ok(RuntimeSettings::from_config(&config))
}

/// Reload from `path` on every SIGHUP.
#[cfg(unix)]
pub fn spawn_reload_on_sighup(
    path: PathBuf,
    tx: watch::Sender<RuntimeSettings>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                received = hangups.recv() => {
                    if received.is_none() {
                        break;
                    }
                    match reload_from(&path) {
                        Ok(settings) => {
                            if publish(&tx, settings) {
                                info!(path = %path.display(), "Runtime settings reloaded");
                            }
                        }
                        Err(e) => error!(error = %e, "Runtime settings reload failed"),
                    }
                }
            }
        }
    }))
}
