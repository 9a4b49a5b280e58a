//! Credential data types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Which flavour of access token to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Tenant,
    App,
    User,
}

impl TokenKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::App => "app",
            Self::User => "user",
        }
    }

    /// Issuer endpoint path for this kind.
    pub const fn issue_path(self) -> &'static str {
        match self {
            Self::Tenant => "/auth/v3/tenant_access_token/internal",
            Self::App => "/auth/v3/app_access_token/internal",
            Self::User => "/authen/v1/access_token",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application identity used to obtain tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct AppCredentials {
    pub app_id: String,
    pub app_secret: String,
}

impl AppCredentials {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
        }
    }
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

/// Raw answer from a token issuer, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds; `None` falls back to the default expiry.
    pub expires_in: Option<u64>,
    pub code: i64,
    pub message: String,
}

impl TokenGrant {
    /// Successful grant.
    pub fn ok(access_token: impl Into<String>, expires_in: Option<u64>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in,
            code: 0,
            message: "ok".to_string(),
        }
    }
}

/// A validated token with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialToken {
    pub access_token: String,
    pub expires_at: Instant,
    pub kind: TokenKind,
}

impl CredentialToken {
    /// True once `now` is within `threshold` of expiry.
    pub fn needs_refresh(&self, now: Instant, threshold: Duration) -> bool {
        now + threshold >= self.expires_at
    }
}
