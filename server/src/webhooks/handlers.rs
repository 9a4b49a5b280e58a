//! Webhook HTTP handlers.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, warn};

use super::error::WebhookError;
use super::signing;
use crate::api::AppState;

pub const TIMESTAMP_HEADER: &str = "x-hookline-timestamp";
pub const NONCE_HEADER: &str = "x-hookline-nonce";
pub const SIGNATURE_HEADER: &str = "x-hookline-signature";

/// Receive one platform event.
///
/// Dropping the request (client disconnect, server shutdown) cancels the
/// event's token, so handlers still running see the cancellation.
#[tracing::instrument(skip_all)]
pub async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    if let Some(secret) = state.config.webhook.signing_secret.as_deref() {
        verify_request(&state, secret, &headers, &body).await?;
    }

    let cancel = state.shutdown.child_token();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let outcome = state.pipeline.process(&body, &cancel).await;
    if outcome.success {
        Ok(Json(json!({ "code": 0 })))
    } else {
        Err(WebhookError::Rejected(outcome))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(WebhookError::MissingHeader(name))
}

/// Check freshness and signature, then burn the nonce.
///
/// The nonce is only marked after the signature checks out, so forged
/// requests cannot use up nonces.
async fn verify_request(
    state: &AppState,
    secret: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), WebhookError> {
    let timestamp = header(headers, TIMESTAMP_HEADER)?;
    let nonce = header(headers, NONCE_HEADER)?;
    let signature = header(headers, SIGNATURE_HEADER)?;

    let sent_at: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| WebhookError::StaleRequest)?;
    let skew = Utc::now().timestamp().abs_diff(sent_at);
    if skew > state.nonce_store.window().as_secs() {
        warn!(skew_secs = skew, "Rejected stale webhook request");
        return Err(WebhookError::StaleRequest);
    }

    if !signing::verify_request(secret, timestamp, nonce, body, signature) {
        warn!("Rejected webhook request with invalid signature");
        return Err(WebhookError::InvalidSignature);
    }

    match state.nonce_store.try_mark(nonce).await {
        Ok(false) => Ok(()),
        Ok(true) => {
            warn!(nonce, "Rejected replayed webhook request");
            Err(WebhookError::ReplayedRequest)
        }
        Err(e) if state.config.webhook.fail_open => {
            warn!(error = %e, "Nonce store unavailable, accepting request (fail-open)");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Nonce store unavailable, rejecting request");
            Err(WebhookError::NonceStoreUnavailable)
        }
    }
}
