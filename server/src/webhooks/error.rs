//! Webhook error types for HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::{Disposition, PipelineOutcome};

/// Why a webhook request was not acknowledged.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Missing header {0}")]
    MissingHeader(&'static str),

    /// Timestamp outside the replay window.
    #[error("Request timestamp outside the allowed window")]
    StaleRequest,

    #[error("Signature does not match")]
    InvalidSignature,

    /// Nonce already seen inside the replay window.
    #[error("Nonce already used")]
    ReplayedRequest,

    /// Nonce store failed and the endpoint fails closed.
    #[error("Replay protection unavailable")]
    NonceStoreUnavailable,

    /// The pipeline reported a failure.
    #[error("{}", .0.reason.unwrap_or("Request failed"))]
    Rejected(PipelineOutcome),
}

/// JSON response body for webhook errors.
#[derive(Serialize)]
pub struct WebhookErrorResponse {
    /// Error code identifier.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHeader(_) | Self::StaleRequest | Self::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            Self::ReplayedRequest => StatusCode::CONFLICT,
            Self::NonceStoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Rejected(outcome) => match outcome.disposition {
                Disposition::DecryptFailed => StatusCode::BAD_REQUEST,
                Disposition::AdmissionTimeout | Disposition::Cancelled => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                Disposition::TimedOut => StatusCode::GATEWAY_TIMEOUT,
                Disposition::Faulted => StatusCode::INTERNAL_SERVER_ERROR,
                Disposition::Completed | Disposition::Duplicate => StatusCode::OK,
            },
        }
    }

    fn body(&self) -> WebhookErrorResponse {
        let error = match self {
            Self::MissingHeader(_) => "missing_header",
            Self::StaleRequest => "stale_request",
            Self::InvalidSignature => "invalid_signature",
            Self::ReplayedRequest => "replayed_request",
            Self::NonceStoreUnavailable => "service_unavailable",
            Self::Rejected(outcome) => disposition_code(outcome.disposition),
        };
        WebhookErrorResponse {
            error,
            message: self.to_string(),
        }
    }
}

const fn disposition_code(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Completed => "completed",
        Disposition::Duplicate => "duplicate",
        Disposition::DecryptFailed => "decrypt_failed",
        Disposition::AdmissionTimeout => "admission_timeout",
        Disposition::Cancelled => "cancelled",
        Disposition::TimedOut => "timed_out",
        Disposition::Faulted => "faulted",
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
