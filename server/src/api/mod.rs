//! HTTP API
//!
//! Router and shared state for the webhook server.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, Request},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::credentials::CredentialCache;
use crate::dedup::{NonceDeduplicator, NonceStore};
use crate::pipeline::EventPipeline;
use crate::stream::PushFrameIntake;
use crate::webhooks;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Inbound event pipeline
    pub pipeline: EventPipeline,
    /// Replay guard used by signature verification
    pub nonce_store: Arc<dyn NonceStore>,
    /// In-process nonce cache (also the nonce store unless Redis is configured)
    pub nonces: Arc<NonceDeduplicator>,
    /// Sequence-deduplicated push-frame intake
    pub frames: Arc<PushFrameIntake>,
    /// Outbound token cache (optional, needs app credentials)
    pub credentials: Option<Arc<CredentialCache>>,
    /// Cancelled on shutdown; every request token derives from it
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        config: Config,
        pipeline: EventPipeline,
        nonce_store: Arc<dyn NonceStore>,
        nonces: Arc<NonceDeduplicator>,
        frames: Arc<PushFrameIntake>,
        credentials: Option<Arc<CredentialCache>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
            nonce_store,
            nonces,
            frames,
            credentials,
            shutdown: CancellationToken::new(),
        }
    }

    /// Check if outbound credentials are available.
    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Request ids are time-ordered UUIDs.
#[derive(Debug, Clone, Copy, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::now_v7().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/webhook", webhooks::router())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    admission: AdmissionHealth,
    dedup: DedupHealth,
    /// Cached or loading credential slots
    credential_slots: usize,
}

#[derive(Serialize)]
struct AdmissionHealth {
    capacity: usize,
    available: usize,
    in_use: usize,
}

#[derive(Serialize)]
struct DedupHealth {
    events: usize,
    nonces: usize,
    sequences: usize,
    max_seq_id: u64,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let gate = state.pipeline.gate();
    Json(HealthResponse {
        status: "ok",
        admission: AdmissionHealth {
            capacity: gate.capacity(),
            available: gate.available(),
            in_use: gate.in_use(),
        },
        dedup: DedupHealth {
            events: state.pipeline.events().len(),
            nonces: state.nonces.len(),
            sequences: state.frames.sequences().len(),
            max_seq_id: state.frames.max_processed_seq_id(),
        },
        credential_slots: state.credentials.as_ref().map_or(0, |c| c.len()),
    })
}
