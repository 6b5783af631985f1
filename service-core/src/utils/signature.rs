//! HMAC-SHA256 helpers for verifying inbound webhook deliveries.
//!
//! Two schemes are covered: a bare hex digest of the raw body, and the
//! timestamped `t=<unix>,v1=<hex>` header where the digest covers
//! `"{t}.{body}"`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(expected: &str, provided: &str) -> bool {
    let expected_bytes = expected.as_bytes();
    let provided_bytes = provided.as_bytes();

    if expected_bytes.len() != provided_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(provided_bytes).into()
}

/// Verify a hex digest of the raw body. Accepts an optional `sha256=` prefix.
pub fn verify_body_signature(
    secret: &str,
    body: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let provided = signature.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let expected = hmac_sha256_hex(secret, body)?;

    Ok(constant_time_eq(&expected, &provided.to_ascii_lowercase()))
}

/// Parsed `t=<unix>,v1=<hex>[,v1=<hex>...]` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedSignature {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl TimestampedSignature {
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        match (timestamp, signatures.is_empty()) {
            (Some(timestamp), false) => Some(Self {
                timestamp,
                signatures,
            }),
            _ => None,
        }
    }
}

/// Build a timestamped header for `body`. Used by tests and local tooling.
pub fn sign_timestamped(
    secret: &str,
    timestamp: i64,
    body: &[u8],
) -> Result<String, anyhow::Error> {
    let digest = hmac_sha256_hex(secret, &signed_payload(timestamp, body))?;
    Ok(format!("t={},v1={}", timestamp, digest))
}

fn signed_payload(timestamp: i64, body: &[u8]) -> Vec<u8> {
    let mut payload = format!("{}.", timestamp).into_bytes();
    payload.extend_from_slice(body);
    payload
}

/// Verify a timestamped header. Deliveries older or newer than
/// `tolerance_secs` relative to `now_unix` are rejected.
pub fn verify_timestamped_signature(
    secret: &str,
    body: &[u8],
    header: &str,
    now_unix: i64,
    tolerance_secs: i64,
) -> Result<bool, anyhow::Error> {
    let Some(parsed) = TimestampedSignature::parse(header) else {
        return Ok(false);
    };

    if (now_unix - parsed.timestamp).abs() > tolerance_secs {
        return Ok(false);
    }

    let expected = hmac_sha256_hex(secret, &signed_payload(parsed.timestamp, body))?;

    Ok(parsed
        .signatures
        .iter()
        .any(|candidate| constant_time_eq(&expected, candidate)))
}
