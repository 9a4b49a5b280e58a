//! Outbound Credentials
//!
//! Bearer tokens for calls back into the platform API. Tokens are cached per
//! `(app_id, kind)` and refreshed ahead of expiry; concurrent callers for the
//! same key share a single refresh.

pub mod cache;
pub mod error;
pub mod issuer;
pub mod types;

pub use cache::{CredentialCache, RetryPolicy, DEFAULT_REFRESH_THRESHOLD, DEFAULT_TOKEN_EXPIRY};
pub use error::CredentialError;
pub use issuer::{HttpTokenIssuer, TokenIssuer};
pub use types::{AppCredentials, CredentialToken, TokenGrant, TokenKind};
