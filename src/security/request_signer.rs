use base64::{engine::general_purpose, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::Rejection;

// HMAC-SHA256(payload ‖ timestamp ‖ nonce, tenant api key) → X-Signature (base64)

pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";
pub const NONCE_HEADER: &str = "X-Signature-Nonce";

type HmacSha256 = Hmac<Sha256>;

const DIGEST_LEN: usize = 32;

fn keyed_mac(key: &str, payload: &[u8], timestamp: i64, nonce: &str) -> Result<HmacSha256, Rejection> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|_| Rejection::MalformedHeader("invalid hmac key".to_string()))?;
    mac.update(payload);
    mac.update(timestamp.to_string().as_bytes());
    mac.update(nonce.as_bytes());
    Ok(mac)
}

pub fn compute_signature_base64(
    key: &str,
    payload: &[u8],
    timestamp: i64,
    nonce: &str,
) -> Result<String, Rejection> {
    let sig = keyed_mac(key, payload, timestamp, nonce)?
        .finalize()
        .into_bytes();
    Ok(general_purpose::STANDARD.encode(sig))
}

fn decode_signature(sig: &str) -> Result<Vec<u8>, Rejection> {
    // Prefer base64; a 64-char hex digest also decodes as base64, so length decides
    if let Ok(bytes) = general_purpose::STANDARD.decode(sig) {
        if bytes.len() == DIGEST_LEN {
            return Ok(bytes);
        }
    }
    fn from_hex(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        let bytes = s.as_bytes();
        let mut out = Vec::with_capacity(s.len() / 2);
        for pair in bytes.chunks(2) {
            let hi = (pair[0] as char).to_digit(16)? as u8;
            let lo = (pair[1] as char).to_digit(16)? as u8;
            out.push((hi << 4) | lo);
        }
        Some(out)
    }
    from_hex(sig)
        .or_else(|| general_purpose::STANDARD.decode(sig).ok())
        .ok_or_else(|| Rejection::MalformedHeader("invalid signature encoding".to_string()))
}

/// Verify a shared-secret signature against the current clock.
pub fn verify_signature(
    key: &str,
    payload: &[u8],
    signature: &str,
    timestamp: i64,
    nonce: &str,
    max_skew_secs: i64,
) -> Result<(), Rejection> {
    verify_signature_at(
        key,
        payload,
        signature,
        timestamp,
        nonce,
        max_skew_secs,
        Utc::now().timestamp(),
    )
}

/// Freshness is checked first, so a stale request fails even when the MAC matches.
pub fn verify_signature_at(
    key: &str,
    payload: &[u8],
    signature: &str,
    timestamp: i64,
    nonce: &str,
    max_skew_secs: i64,
    now: i64,
) -> Result<(), Rejection> {
    let skew = now.abs_diff(timestamp);
    if skew > max_skew_secs.max(0).unsigned_abs() {
        return Err(Rejection::StaleTimestamp { skew_secs: skew });
    }

    let provided = decode_signature(signature)?;
    let expected = keyed_mac(key, payload, timestamp, nonce)?
        .finalize()
        .into_bytes();

    if provided.ct_eq(expected.as_slice()).unwrap_u8() == 1 {
        Ok(())
    } else {
        Err(Rejection::SignatureMismatch)
    }
}
