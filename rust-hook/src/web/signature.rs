//! Webhook signature verification.
//!
//! The sender signs the raw request body with HMAC-SHA256 and puts
//! `sha256=<hex>` in the `X-Hub-Signature-256` header (GitHub's format).
//! Reference: https://docs.github.com/en/webhooks/using-webhooks/validating-webhook-deliveries

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the digest.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Algorithm tag in front of the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute `sha256=<lowercase hex>` of `payload` keyed by `secret`.
pub fn sign(secret: &[u8], payload: &[u8]) -> String {
    // infallible for Hmac: the key is padded or hashed to block size
    try_sign(secret, payload).expect("HMAC accepts keys of any length")
}

fn try_sign(secret: &[u8], payload: &[u8]) -> Option<String> {
    let mut mac = match <HmacSha256 as Mac>::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => {
            warn!("webhook_signature_invalid_key");
            return None;
        }
    };
    mac.update(payload);

    Some(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check `supplied` against the digest of `payload`.
///
/// The expected digest is compared with `supplied` as plain bytes in constant
/// time. Nothing is parsed first, so a missing prefix or bad hex takes the
/// same path as a near miss and simply does not match.
///
/// Never panics: a key the MAC refuses is reported as a non-match.
pub fn verify(secret: &[u8], supplied: &str, payload: &[u8]) -> bool {
    match try_sign(secret, payload) {
        Some(expected) => expected.as_bytes().ct_eq(supplied.as_bytes()).into(),
        None => false,
    }
}

/// Label a rejected digest for the server log.
///
/// Only call this after [`verify`] returned `false`; the result must never
/// reach the response.
pub fn describe_rejection(supplied: Option<&str>) -> &'static str {
    let supplied = match supplied {
        None => return "missing",
        Some(s) if s.is_empty() => return "missing",
        Some(s) => s,
    };

    match supplied.strip_prefix(SIGNATURE_PREFIX) {
        Some(digest) if digest.len() == 64 && hex::decode(digest).is_ok() => "mismatch",
        _ => "malformed",
    }
}
