//! HMAC-SHA256 Request Signing
//!
//! The signed message is `timestamp || nonce || body`; the signature is its
//! hex-encoded HMAC-SHA256 under the shared signing secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn request_mac(secret: &str, timestamp: &str, nonce: &str, body: &[u8]) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(nonce.as_bytes());
    mac.update(body);
    mac
}

/// Sign a request and return the hex-encoded signature.
pub fn sign_request(secret: &str, timestamp: &str, nonce: &str, body: &[u8]) -> String {
    hex::encode(request_mac(secret, timestamp, nonce, body).finalize().into_bytes())
}

/// Verify a hex-encoded request signature in constant time.
pub fn verify_request(
    secret: &str,
    timestamp: &str,
    nonce: &str,
    body: &[u8],
    signature: &str,
) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    request_mac(secret, timestamp, nonce, body)
        .verify_slice(&expected)
        .is_ok()
}
