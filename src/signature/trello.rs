//! Trello webhook signatures.
//!
//! Trello signs each delivery with `base64(HMAC-SHA1(secret, body [+ callbackURL]))`
//! and sends it in the `x-trello-webhook` header.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "x-trello-webhook";

/// Verifies a Trello delivery.
///
/// With no secret configured every request is accepted (open mode). With a
/// secret, a missing or mismatching header is rejected. The comparison runs
/// in constant time via [`Mac::verify_slice`].
pub fn verify(
    secret: Option<&str>,
    body: &[u8],
    callback_url: Option<&str>,
    header: Option<&str>,
) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    let Some(header) = header else {
        return false;
    };
    let Ok(provided) = STANDARD.decode(header.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    if let Some(url) = callback_url {
        mac.update(url.as_bytes());
    }
    mac.verify_slice(&provided).is_ok()
}

/// Computes the header value Trello would send for `body`.
pub fn sign(secret: &str, body: &[u8], callback_url: Option<&str>) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    if let Some(url) = callback_url {
        mac.update(url.as_bytes());
    }
    STANDARD.encode(mac.finalize().into_bytes())
}
