//! Reusable test helpers for HTTP integration tests.
//!
//! Provides `TestApp` for building and sending requests through the full axum
//! router, plus event bodies, request signing, and handler doubles.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use hookline_server::app::App;
use hookline_server::config::Config;
use hookline_server::dedup::{DedupError, NonceStore};
use hookline_server::pipeline::{EventHandler, HandlerError, HandlerRegistry, PipelineEvent};
use hookline_server::webhooks::{signing, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const MESSAGE_EVENT: &str = "im.message.receive_v1";
pub const SIGNING_SECRET: &str = "test-signing-secret";

/// Counts calls; optionally sleeps or fails.
#[derive(Default)]
pub struct CountingHandler {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
    pub fail: bool,
}

impl CountingHandler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for CountingHandler {
    async fn handle(&self, _event: &PipelineEvent, cancel: CancellationToken) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::select! {
                () = cancel.cancelled() => return Err(HandlerError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
        if self.fail {
            return Err(HandlerError::Failed("handler refused".into()));
        }
        Ok(())
    }
}

/// Nonce store whose backend is always down.
pub struct UnavailableNonceStore;

#[async_trait]
impl NonceStore for UnavailableNonceStore {
    async fn try_mark(&self, _nonce: &str) -> Result<bool, DedupError> {
        Err(DedupError::Store("connection refused".into()))
    }

    fn window(&self) -> Duration {
        Duration::from_secs(300)
    }
}

/// A built app plus its router.
pub struct TestApp {
    pub app: App,
    pub router: Router,
}

impl TestApp {
    /// Build an app whose only handler is `handler`, bound to [`MESSAGE_EVENT`].
    pub async fn new(config: Config, handler: Arc<CountingHandler>) -> Self {
        let app = App::build(config, None, move |_| {
            let mut registry = HandlerRegistry::new();
            registry.register(MESSAGE_EVENT, handler);
            registry
        })
        .await
        .expect("Failed to build app");
        let router = app.router();
        Self { app, router }
    }

    /// Build with a replacement nonce store.
    pub async fn with_nonce_store(
        config: Config,
        handler: Arc<CountingHandler>,
        store: Arc<dyn NonceStore>,
    ) -> Self {
        let app = Self::new(config, handler).await.app.with_nonce_store(store);
        let router = app.router();
        Self { app, router }
    }

    /// Send a request through the router.
    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Router is infallible")
    }
}

/// A header-envelope event body.
pub fn event_body(event_id: &str, event_type: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "schema": "2.0",
        "header": {
            "event_id": event_id,
            "event_type": event_type,
            "create_time": "1700000000000"
        },
        "event": {"message": {"content": "hello"}}
    }))
    .expect("Serializable body")
}

/// Unsigned `POST /webhook/event`.
pub fn event_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/webhook/event")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("Valid request")
}

/// Signed `POST /webhook/event` with an explicit timestamp and nonce.
pub fn signed_event_request(body: Vec<u8>, timestamp: i64, nonce: &str) -> Request<Body> {
    let timestamp = timestamp.to_string();
    let signature = signing::sign_request(SIGNING_SECRET, &timestamp, nonce, &body);
    Request::builder()
        .method(Method::POST)
        .uri("/webhook/event")
        .header("content-type", "application/json")
        .header(TIMESTAMP_HEADER, timestamp)
        .header(NONCE_HEADER, nonce)
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .expect("Valid request")
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Readable body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("JSON body")
}
