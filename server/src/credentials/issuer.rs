//! Token issuance collaborators.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::CredentialError;
use super::types::{TokenGrant, TokenKind};

/// Upstream that mints access tokens.
///
/// `Ok(None)` means the issuer answered without a usable result.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn acquire_token(
        &self,
        app_id: &str,
        app_secret: &str,
        kind: TokenKind,
        cancel: &CancellationToken,
    ) -> Result<Option<TokenGrant>, CredentialError>;
}

/// Request timeout for issuer calls.
const ISSUE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct IssueRequest<'a> {
    app_id: &'a str,
    app_secret: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct IssueResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    access_token: Option<String>,
    tenant_access_token: Option<String>,
    app_access_token: Option<String>,
    expire: Option<u64>,
}

impl IssueResponse {
    fn into_grant(self, kind: TokenKind) -> TokenGrant {
        let token = match kind {
            TokenKind::Tenant => self.tenant_access_token.or(self.access_token),
            TokenKind::App => self.app_access_token.or(self.access_token),
            TokenKind::User => self.access_token,
        };
        TokenGrant {
            access_token: token.unwrap_or_default(),
            expires_in: self.expire,
            code: self.code,
            message: self.msg,
        }
    }
}

/// Issuer speaking the platform's JSON token endpoints over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTokenIssuer {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTokenIssuer {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .timeout(ISSUE_TIMEOUT)
            .user_agent(concat!("hookline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, kind: TokenKind) -> String {
        format!("{}{}", self.base_url, kind.issue_path())
    }

    async fn post(
        &self,
        app_id: &str,
        app_secret: &str,
        kind: TokenKind,
    ) -> Result<Option<TokenGrant>, CredentialError> {
        let response = self
            .http
            .post(self.endpoint(kind))
            .json(&IssueRequest { app_id, app_secret })
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(CredentialError::Transport(format!(
                "issuer returned HTTP {status}"
            )));
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }

        match serde_json::from_slice::<IssueResponse>(&body) {
            Ok(decoded) => Ok(Some(decoded.into_grant(kind))),
            Err(_) if !status.is_success() => Err(CredentialError::Rejected {
                code: i64::from(status.as_u16()),
                message: status.canonical_reason().unwrap_or("unknown").to_string(),
            }),
            Err(e) => {
                debug!(error = %e, "Undecodable issuer response");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn acquire_token(
        &self,
        app_id: &str,
        app_secret: &str,
        kind: TokenKind,
        cancel: &CancellationToken,
    ) -> Result<Option<TokenGrant>, CredentialError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CredentialError::Cancelled),
            result = self.post(app_id, app_secret, kind) => result,
        }
    }
}
