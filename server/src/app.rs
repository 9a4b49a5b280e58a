//! Component wiring.
//!
//! Builds every long-lived component once from [`Config`] and hands them out
//! by `Arc`. Nothing here is global; tests build as many apps as they like.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::admission::AdmissionGate;
use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::credentials::{
    CredentialCache, HttpTokenIssuer, RetryPolicy, TokenIssuer, DEFAULT_TOKEN_EXPIRY,
};
use crate::dedup::{
    redis::create_redis_client, EventDeduplicator, NonceDeduplicator, NonceStore,
    RedisNonceStore, SequenceDeduplicator,
};
use crate::pipeline::{AesGcmDecoder, EventDecoder, EventPipeline, HandlerRegistry, PlainJsonDecoder};
use crate::settings::{self, RuntimeSettings};
use crate::stream::{PushFrame, PushFrameIntake, FRAME_CHANNEL_CAPACITY};

/// Everything a running server owns.
pub struct App {
    pub state: AppState,
    pub events: Arc<EventDeduplicator>,
    pub sequences: Arc<SequenceDeduplicator>,
    pub gate: Arc<AdmissionGate>,
    pub settings: watch::Sender<RuntimeSettings>,
    frame_tx: mpsc::Sender<PushFrame>,
    frame_rx: Option<mpsc::Receiver<PushFrame>>,
}

impl App {
    /// Build all components.
    ///
    /// `handlers` receives the credential cache (when app credentials are
    /// configured) so handlers can call back into the platform. `issuer`
    /// overrides the HTTP token issuer.
    pub async fn build<F>(
        config: Config,
        issuer: Option<Arc<dyn TokenIssuer>>,
        handlers: F,
    ) -> Result<Self>
    where
        F: FnOnce(Option<Arc<CredentialCache>>) -> HandlerRegistry,
    {
        let dedup = &config.dedup;
        let events = Arc::new(EventDeduplicator::spawn(dedup.event_ttl, dedup.event_sweep));
        let nonces = Arc::new(NonceDeduplicator::spawn(
            dedup.nonce_ttl,
            dedup.nonce_sweep,
            dedup.nonce_max_entries,
            dedup.nonce_overflow,
        ));
        let sequences = Arc::new(SequenceDeduplicator::spawn(
            dedup.sequence_ttl,
            dedup.sequence_sweep,
        ));

        let nonce_store: Arc<dyn NonceStore> = match dedup.redis_url.as_deref() {
            Some(url) => {
                let redis = create_redis_client(url)
                    .await
                    .context("Failed to connect to Redis")?;
                info!("Using Redis nonce store");
                Arc::new(RedisNonceStore::new(
                    redis,
                    dedup.redis_key_prefix.clone(),
                    dedup.nonce_ttl,
                ))
            }
            None => Arc::clone(&nonces) as Arc<dyn NonceStore>,
        };

        let decoder: Arc<dyn EventDecoder> = match config.pipeline.encrypt_key.as_deref() {
            Some(key) => Arc::new(AesGcmDecoder::new(key)),
            None => {
                warn!("ENCRYPT_KEY not set, accepting plain JSON events");
                Arc::new(PlainJsonDecoder)
            }
        };

        let credentials = match issuer {
            Some(issuer) => Some(issuer),
            None if config.has_app_credentials() => Some(Arc::new(
                HttpTokenIssuer::new(config.credentials.issuer_base_url.clone())
                    .context("Failed to build token issuer")?,
            ) as Arc<dyn TokenIssuer>),
            None => None,
        }
        .map(|issuer| {
            Arc::new(CredentialCache::with_options(
                issuer,
                config.credentials.refresh_threshold,
                DEFAULT_TOKEN_EXPIRY,
                RetryPolicy {
                    max_retries: config.credentials.max_retries,
                    base_delay: config.credentials.retry_base_delay,
                },
            ))
        });

        let registry = handlers(credentials.clone());
        let mut event_types: Vec<_> = registry.event_types().collect();
        event_types.sort_unstable();
        info!(?event_types, "Event handlers registered");

        let gate = Arc::new(AdmissionGate::new(config.admission.capacity));
        let (settings_tx, settings_rx) = watch::channel(RuntimeSettings::from_config(&config));
        let pipeline = EventPipeline::new(
            decoder,
            Arc::clone(&events),
            Arc::clone(&gate),
            Arc::new(registry),
            settings_rx,
        );
        let frames = Arc::new(PushFrameIntake::new(Arc::clone(&sequences), pipeline.clone()));

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let state = AppState::new(config, pipeline, nonce_store, nonces, frames, credentials);

        Ok(Self {
            state,
            events,
            sequences,
            gate,
            settings: settings_tx,
            frame_tx,
            frame_rx: Some(frame_rx),
        })
    }

    /// Replace the replay-protection store, e.g. with another shared
    /// backend. Call before [`router`](Self::router).
    #[must_use]
    pub fn with_nonce_store(mut self, store: Arc<dyn NonceStore>) -> Self {
        self.state.nonce_store = store;
        self
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Sender for push frames from the streaming transport.
    pub fn frame_sender(&self) -> mpsc::Sender<PushFrame> {
        self.frame_tx.clone()
    }

    /// Start the push-frame intake, the settings applier and, when a reload
    /// file is configured, the SIGHUP reloader.
    pub fn spawn_background(&mut self) -> Result<Vec<JoinHandle<()>>> {
        let shutdown = self.state.shutdown.clone();
        let mut tasks = vec![settings::spawn_applier(
            self.settings.subscribe(),
            Arc::clone(&self.gate),
            self.state.credentials.clone(),
            shutdown.clone(),
        )];

        match self.frame_rx.take() {
            Some(frames) => tasks.push(Arc::clone(&self.state.frames).spawn(
                frames,
                self.state.config.admission.capacity,
                shutdown.clone(),
            )),
            None => warn!("Push-frame intake already started"),
        }

        #[cfg(unix)]
        if let Some(path) = self.state.config.reload_file.clone() {
            info!(path = %path.display(), "Reloading runtime settings on SIGHUP");
            tasks.push(settings::spawn_reload_on_sighup(
                path,
                self.settings.clone(),
                shutdown,
            )?);
        }

        Ok(tasks)
    }

    /// Stop background work and drop cached state.
    pub async fn dispose(&self) {
        self.state.shutdown.cancel();
        if let Some(credentials) = &self.state.credentials {
            credentials.shutdown();
        }
        let events = self.events.dispose().await;
        let nonces = self.state.nonces.dispose().await;
        let sequences = self.sequences.dispose().await;
        info!(events, nonces, sequences, "Deduplicators disposed");
    }
}
