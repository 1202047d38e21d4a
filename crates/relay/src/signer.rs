//! HMAC-SHA256 payload signing.
//!
//! The signed material is `{timestamp}.{body}` — the send timestamp is
//! part of the signature so receivers can bound how old a signed
//! request may be before they reject it.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 over `{timestamp}.{body}`.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");

    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    hex::encode(mac.finalize().into_bytes())
}

/// Header value for `X-Webhook-Signature`: `sha256=<hex>`.
pub fn signature_header(secret: &str, timestamp: &str, body: &[u8]) -> String {
    format!("sha256={}", sign(secret, timestamp, body))
}
