//! Inbound Webhooks
//!
//! `POST /webhook/event`: verify the signature, reject replays, run the
//! event pipeline, map the outcome to a status code.

pub mod error;
pub mod handlers;
pub mod signing;

pub use error::WebhookError;
pub use handlers::{NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};

use axum::{routing::post, Router};

use crate::api::AppState;

/// Create the webhook router.
pub fn router() -> Router<AppState> {
    Router::new().route("/event", post(handlers::receive_event))
}
