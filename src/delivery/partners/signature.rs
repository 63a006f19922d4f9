//! Timing-safe HMAC-SHA256 verification of inbound partner webhooks.
//!
//! Every partner signs with `X-<Partner>-Signature: sha256=<hex>` over
//! the raw request body plus whatever extra headers that partner folds
//! into its signature (e.g. a timestamp header, to guard against
//! replay). `hmac` + `constant_time_eq` are the narrowest addition to
//! the dependency stack for this — `subtle` would pull in a second
//! constant-time comparison crate for no benefit here.

use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// `signature_header` is the full header value, e.g. `sha256=<hex>`;
/// the `sha256=` prefix is stripped if present. `extra_headers` are
/// `(name, value)` pairs folded into the MAC pre-image, in the given
/// order, after the body — callers must pass them in the exact order
/// the partner signed them in.
pub fn verify_signature(
    signature_header: &str,
    body: &Bytes,
    extra_headers: &[(&str, &str)],
    secret: &str,
) -> bool {
    let hex_digest = signature_header.strip_prefix("sha256=").unwrap_or(signature_header);

    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body.as_ref());
    for (_, value) in extra_headers {
        mac.update(value.as_bytes());
    }
    let computed = mac.finalize().into_bytes();

    constant_time_eq::constant_time_eq(&computed, &expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(body: &[u8], extra_headers: &[(&str, &str)], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        for (_, value) in extra_headers {
            mac.update(value.as_bytes());
        }
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_verifies() {
        let body = Bytes::from_static(br#"{"event":"delivered"}"#);
        let secret = "shared-secret";
        let header = sign(&body, &[], secret);
        assert!(verify_signature(&header, &body, &[], secret));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let body = Bytes::from_static(br#"{"event":"delivered"}"#);
        let secret = "shared-secret";
        let header = sign(&body, &[], secret);
        let tampered = Bytes::from_static(b"{\"event\":\"tampered\"}");
        assert!(!verify_signature(&header, &tampered, &[], secret));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let body = Bytes::from_static(br#"{"event":"delivered"}"#);
        let header = sign(&body, &[], "secret-a");
        assert!(!verify_signature(&header, &body, &[], "secret-b"));
    }

    #[test]
    fn malformed_hex_is_rejected_not_panicking() {
        let body = Bytes::from_static(b"body");
        assert!(!verify_signature("sha256=not-hex", &body, &[], "secret"));
    }

    #[test]
    fn extra_headers_change_the_digest() {
        let body = Bytes::from_static(br#"{"event":"delivered"}"#);
        let secret = "shared-secret";
        let header = sign(&body, &[("x-timestamp", "1700000000")], secret);

        assert!(verify_signature(
            &header,
            &body,
            &[("x-timestamp", "1700000000")],
            secret
        ));
        assert!(!verify_signature(&header, &body, &[], secret));
        assert!(!verify_signature(
            &header,
            &body,
            &[("x-timestamp", "1700000001")],
            secret
        ));
    }
}
