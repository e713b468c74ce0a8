//! Gateway webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac-sha256 of "<t>.<body>">`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "gateway-signature";

/// Maximum age, in seconds, of a signed webhook.
pub const TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature header format")]
    MalformedHeader,
    #[error("timestamp outside tolerance window")]
    StaleTimestamp,
    #[error("payload is not valid UTF-8")]
    InvalidPayload,
    #[error("invalid secret key")]
    InvalidSecret,
    #[error("signature mismatch")]
    Mismatch,
}

pub fn parse_signature_header(header: &str) -> Result<(i64, String), SignatureError> {
    let mut timestamp = None;
    let mut v1 = None;

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) if !value.is_empty() => v1 = Some(value.to_string()),
            _ => {}
        }
    }

    match (timestamp, v1) {
        (Some(t), Some(sig)) => Ok((t, sig)),
        _ => Err(SignatureError::MalformedHeader),
    }
}

fn digest(payload: &[u8], timestamp: i64, secret: &str) -> Result<String, SignatureError> {
    let body = std::str::from_utf8(payload).map_err(|_| SignatureError::InvalidPayload)?;
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds the header value for `payload` signed at `timestamp`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let sig = digest(payload, timestamp, secret)?;
    Ok(format!("t={},v1={}", timestamp, sig))
}

/// Verifies `header` against `payload` as of `now` (unix seconds).
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let (timestamp, received) = parse_signature_header(header)?;
    if now.abs_diff(timestamp) > TOLERANCE_SECS as u64 {
        return Err(SignatureError::StaleTimestamp);
    }

    let expected = digest(payload, timestamp, secret)?;
    if bool::from(expected.as_bytes().ct_eq(received.as_bytes())) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    #[test]
    fn parses_header_in_any_order() {
        let (t, v1) = parse_signature_header("v1=abcdef,t=1609459200").unwrap();
        assert_eq!(t, 1609459200);
        assert_eq!(v1, "abcdef");
    }

    #[test]
    fn rejects_malformed_header() {
        assert_eq!(
            parse_signature_header("invalid"),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            parse_signature_header("t=abc,v1=ff"),
            Err(SignatureError::MalformedHeader)
        );
    }

    #[test]
    fn signed_payload_verifies() {
        let body = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign_payload(body, SECRET, 1_700_000_000).unwrap();
        assert_eq!(verify_signature(body, &header, SECRET, 1_700_000_010), Ok(()));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = sign_payload(b"{\"amount\":800}", SECRET, 1_700_000_000).unwrap();
        assert_eq!(
            verify_signature(b"{\"amount\":1}", &header, SECRET, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = sign_payload(b"{}", SECRET, 1_700_000_000).unwrap();
        assert_eq!(
            verify_signature(b"{}", &header, "whsec_other", 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_signature_is_rejected() {
        let header = sign_payload(b"{}", SECRET, 1_700_000_000).unwrap();
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, 1_700_000_000 + TOLERANCE_SECS + 1),
            Err(SignatureError::StaleTimestamp)
        );
    }

    #[test]
    fn extreme_timestamps_are_stale_not_a_panic() {
        let header = format!("t={},v1={}", i64::MIN, "00");
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, 1_700_000_000),
            Err(SignatureError::StaleTimestamp)
        );
        let header = format!("t={},v1={}", i64::MAX, "00");
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, i64::MIN),
            Err(SignatureError::StaleTimestamp)
        );
    }
}
