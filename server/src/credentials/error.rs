//! Credential error types.

use thiserror::Error;

/// Token issuance failure.
///
/// `Clone` because one failed refresh is handed to every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Token issuer returned no result")]
    EmptyResponse,

    #[error("Token issuer rejected the request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Token issuer returned an empty token")]
    EmptyToken,

    #[error("Token issuer unavailable: {0}")]
    Transport(String),

    #[error("Token refresh cancelled")]
    Cancelled,

    #[error("Token refresh task failed: {0}")]
    Internal(String),
}

impl CredentialError {
    /// Whether another attempt might succeed.
    ///
    /// Validation failures are definitive; only transport trouble is retried.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for CredentialError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
