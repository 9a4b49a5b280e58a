//! Inbound payload decoding.
//!
//! Encrypted bodies look like `{"encrypt": "<base64>"}`. The blob is a
//! 12-byte nonce followed by AES-256-GCM ciphertext and tag; the AES key is
//! the SHA-256 digest of the configured encrypt key.

use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::event::PipelineEvent;

const NONCE_LEN: usize = 12;

/// Decoding failures. All of them are final for the event.
#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Base64 decoding failed: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Invalid encrypted data format")]
    InvalidFormat,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decoding cancelled")]
    Cancelled,
}

/// Turns raw request bytes into a [`PipelineEvent`].
///
/// Implementations must be side-effect free so a redelivered body decodes
/// to the same event.
#[async_trait]
pub trait EventDecoder: Send + Sync {
    async fn decode(
        &self,
        raw: &[u8],
        cancel: &CancellationToken,
    ) -> Result<PipelineEvent, DecryptError>;
}

/// Decoder for unencrypted bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainJsonDecoder;

#[async_trait]
impl EventDecoder for PlainJsonDecoder {
    async fn decode(
        &self,
        raw: &[u8],
        cancel: &CancellationToken,
    ) -> Result<PipelineEvent, DecryptError> {
        if cancel.is_cancelled() {
            return Err(DecryptError::Cancelled);
        }
        PipelineEvent::from_json(raw)
    }
}

#[derive(Deserialize)]
struct EncryptedBody {
    encrypt: Option<String>,
}

/// Decoder for `{"encrypt": ...}` bodies.
#[derive(Clone)]
pub struct AesGcmDecoder {
    cipher: Aes256Gcm,
}

impl AesGcmDecoder {
    pub fn new(encrypt_key: &str) -> Self {
        let key = Sha256::digest(encrypt_key.as_bytes());
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Decrypt one base64 blob to plaintext bytes.
    pub fn open(&self, blob: &str) -> Result<Vec<u8>, DecryptError> {
        let combined = STANDARD.decode(blob.trim())?;
        if combined.len() <= NONCE_LEN {
            return Err(DecryptError::InvalidFormat);
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| DecryptError::DecryptionFailed)
    }

    /// Encrypt `plaintext` into the blob format [`open`](Self::open) reads.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, DecryptError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| DecryptError::EncryptionFailed)?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }
}

impl fmt::Debug for AesGcmDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmDecoder").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventDecoder for AesGcmDecoder {
    async fn decode(
        &self,
        raw: &[u8],
        cancel: &CancellationToken,
    ) -> Result<PipelineEvent, DecryptError> {
        if cancel.is_cancelled() {
            return Err(DecryptError::Cancelled);
        }
        let blob = serde_json::from_slice::<EncryptedBody>(raw)?
            .encrypt
            .ok_or(DecryptError::MissingField("encrypt"))?;
        let plaintext = self.open(&blob)?;
        PipelineEvent::from_json(&plaintext)
    }
}
