//! Webhook HTTP Tests
//!
//! Drives `POST /webhook/event` and `GET /health` through the full router
//! with `tower::ServiceExt::oneshot`.
//!
//! Run with: `cargo test --test webhook_http_test`

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use helpers::{
    body_json, event_body, event_request, signed_event_request, CountingHandler, TestApp,
    UnavailableNonceStore, MESSAGE_EVENT, SIGNING_SECRET,
};
use hookline_server::config::Config;
use hookline_server::pipeline::AesGcmDecoder;
use serde_json::json;

fn signed_config() -> Config {
    let mut config = Config::default_for_test();
    config.webhook.signing_secret = Some(SIGNING_SECRET.into());
    config
}

#[tokio::test]
async fn test_event_acknowledged_and_dispatched() {
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(Config::default_for_test(), Arc::clone(&handler)).await;

    let response = app
        .request(event_request(event_body("evt-1", MESSAGE_EVENT)))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(body_json(response).await, json!({"code": 0}));
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_redelivered_event_acknowledged_once_dispatched() {
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(Config::default_for_test(), Arc::clone(&handler)).await;

    for _ in 0..3 {
        let response = app
            .request(event_request(event_body("evt-dup", MESSAGE_EVENT)))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_unregistered_event_type_acknowledged() {
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(Config::default_for_test(), Arc::clone(&handler)).await;

    let response = app
        .request(event_request(event_body("evt-other", "contact.user.created_v3")))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn test_undecodable_body_rejected() {
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(Config::default_for_test(), Arc::clone(&handler)).await;

    let response = app.request(event_request(b"not json".to_vec())).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "decrypt_failed");
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn test_failing_handler_reported_as_server_error() {
    let handler = Arc::new(CountingHandler {
        fail: true,
        ..CountingHandler::default()
    });
    let app = TestApp::new(Config::default_for_test(), Arc::clone(&handler)).await;

    let response = app
        .request(event_request(event_body("evt-fail", MESSAGE_EVENT)))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "faulted");
    assert!(!body["message"].as_str().unwrap().contains("handler refused"));

    // Marked before dispatch, so the redelivery is not retried.
    let again = app
        .request(event_request(event_body("evt-fail", MESSAGE_EVENT)))
        .await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_slow_handler_times_out() {
    let mut config = Config::default_for_test();
    config.pipeline.handler_timeout = Duration::from_millis(50);
    let handler = Arc::new(CountingHandler {
        delay: Some(Duration::from_secs(5)),
        ..CountingHandler::default()
    });
    let app = TestApp::new(config, Arc::clone(&handler)).await;

    let response = app
        .request(event_request(event_body("evt-slow", MESSAGE_EVENT)))
        .await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_json(response).await["error"], "timed_out");
    assert_eq!(app.app.gate.in_use(), 0);
}

#[tokio::test]
async fn test_encrypted_event_decrypted() {
    let mut config = Config::default_for_test();
    config.pipeline.encrypt_key = Some("encrypt-key".into());
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(config, Arc::clone(&handler)).await;

    let sealed = AesGcmDecoder::new("encrypt-key")
        .seal(&event_body("evt-sealed", MESSAGE_EVENT))
        .unwrap();
    let body = serde_json::to_vec(&json!({ "encrypt": sealed })).unwrap();

    let response = app.request(event_request(body)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_encrypted_event_with_wrong_key_rejected() {
    let mut config = Config::default_for_test();
    config.pipeline.encrypt_key = Some("encrypt-key".into());
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(config, Arc::clone(&handler)).await;

    let sealed = AesGcmDecoder::new("another-key")
        .seal(&event_body("evt-sealed", MESSAGE_EVENT))
        .unwrap();
    let body = serde_json::to_vec(&json!({ "encrypt": sealed })).unwrap();

    let response = app.request(event_request(body)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn test_signed_event_accepted() {
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(signed_config(), Arc::clone(&handler)).await;

    let response = app
        .request(signed_event_request(
            event_body("evt-signed", MESSAGE_EVENT),
            Utc::now().timestamp(),
            "nonce-1",
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(handler.calls(), 1);
    assert!(app.app.state.nonces.is_processed("nonce-1"));
}

#[tokio::test]
async fn test_missing_signature_headers_rejected() {
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(signed_config(), Arc::clone(&handler)).await;

    let response = app
        .request(event_request(event_body("evt-unsigned", MESSAGE_EVENT)))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "missing_header");
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn test_tampered_body_rejected() {
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(signed_config(), Arc::clone(&handler)).await;

    let mut request = signed_event_request(
        event_body("evt-a", MESSAGE_EVENT),
        Utc::now().timestamp(),
        "nonce-tamper",
    );
    *request.body_mut() = Body::from(event_body("evt-b", MESSAGE_EVENT));

    let response = app.request(request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid_signature");
    assert_eq!(handler.calls(), 0);
    // A forged request does not burn the nonce.
    assert!(!app.app.state.nonces.is_processed("nonce-tamper"));
}

#[tokio::test]
async fn test_stale_timestamp_rejected() {
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(signed_config(), Arc::clone(&handler)).await;

    let response = app
        .request(signed_event_request(
            event_body("evt-stale", MESSAGE_EVENT),
            Utc::now().timestamp() - 3600,
            "nonce-stale",
        ))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "stale_request");
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn test_replayed_nonce_rejected() {
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(signed_config(), Arc::clone(&handler)).await;
    let now = Utc::now().timestamp();

    let first = app
        .request(signed_event_request(
            event_body("evt-r1", MESSAGE_EVENT),
            now,
            "nonce-replay",
        ))
        .await;
    assert_eq!(first.status(), StatusCode::OK);

    let replay = app
        .request(signed_event_request(
            event_body("evt-r2", MESSAGE_EVENT),
            now,
            "nonce-replay",
        ))
        .await;

    assert_eq!(replay.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(replay).await["error"], "replayed_request");
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_nonce_store_outage_fails_closed() {
    let mut config = signed_config();
    config.webhook.fail_open = false;
    let handler = Arc::new(CountingHandler::default());
    let app =
        TestApp::with_nonce_store(config, Arc::clone(&handler), Arc::new(UnavailableNonceStore))
            .await;

    let response = app
        .request(signed_event_request(
            event_body("evt-closed", MESSAGE_EVENT),
            Utc::now().timestamp(),
            "nonce-closed",
        ))
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "service_unavailable");
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn test_nonce_store_outage_fails_open() {
    let mut config = signed_config();
    config.webhook.fail_open = true;
    let handler = Arc::new(CountingHandler::default());
    let app =
        TestApp::with_nonce_store(config, Arc::clone(&handler), Arc::new(UnavailableNonceStore))
            .await;

    let response = app
        .request(signed_event_request(
            event_body("evt-open", MESSAGE_EVENT),
            Utc::now().timestamp(),
            "nonce-open",
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"code": 0}));
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_health_reports_components() {
    let handler = Arc::new(CountingHandler::default());
    let app = TestApp::new(Config::default_for_test(), Arc::clone(&handler)).await;

    app.request(event_request(event_body("evt-h", MESSAGE_EVENT)))
        .await;
    let response = app
        .request(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["admission"]["capacity"], 8);
    assert_eq!(body["admission"]["in_use"], 0);
    assert_eq!(body["dedup"]["events"], 1);
    assert_eq!(body["credential_slots"], 0);
}
