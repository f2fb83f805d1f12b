//! Payment provider webhook signature verification.
//!
//! The provider signs each delivery with HMAC-SHA256 and sends a header of the
//! form `t=<unix seconds>,v1=<hex digest>[,v1=<hex digest>...]`. The digest
//! covers `"{t}.{raw body}"` keyed with the endpoint's signing secret.

use axum::body::Bytes;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::event::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

/// Header the provider puts its signature in.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Why a delivery was not accepted as authentic.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("signature header missing")]
    SignatureMissing,

    #[error("signature header malformed")]
    SignatureMalformed,

    #[error("signature does not match payload")]
    SignatureInvalid,

    #[error("signature timestamp outside tolerance")]
    TimestampExpired,

    #[error("webhook secret not configured")]
    ConfigurationMissing,

    #[error("payload is not a valid event: {0}")]
    PayloadInvalid(String),
}

/// Parsed form of the signature header.
#[derive(Debug)]
struct SignatureHeader<'a> {
    timestamp_raw: &'a str,
    timestamp: i64,
    signatures: Vec<&'a str>,
}

/// Fields the pipeline needs out of the event body.
#[derive(Debug, Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    livemode: bool,
}

/// Verify a webhook delivery against the current clock.
pub fn verify(
    raw_payload: &Bytes,
    signature_header: Option<&str>,
    secret: &str,
    tolerance: Duration,
) -> Result<WebhookEvent, VerificationError> {
    verify_at(
        raw_payload,
        signature_header,
        secret,
        tolerance,
        chrono::Utc::now().timestamp(),
    )
}

/// Verify a webhook delivery as if the current time were `now` (unix seconds).
///
/// Checks run in order: secret present, header present, header parses,
/// timestamp within `tolerance`, some `v1` digest matches, body is an event.
pub fn verify_at(
    raw_payload: &Bytes,
    signature_header: Option<&str>,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<WebhookEvent, VerificationError> {
    if secret.trim().is_empty() {
        warn!("webhook_secret_missing");
        return Err(VerificationError::ConfigurationMissing);
    }

    let header = match signature_header.map(str::trim) {
        Some(h) if !h.is_empty() => h,
        _ => return Err(VerificationError::SignatureMissing),
    };

    let parsed = parse_header(header)?;

    let age = now.abs_diff(parsed.timestamp);
    if age > tolerance.as_secs() {
        warn!(
            webhook_time = parsed.timestamp,
            current_time = now,
            age_seconds = age,
            tolerance_seconds = tolerance.as_secs(),
            "webhook_signature_stale"
        );
        return Err(VerificationError::TimestampExpired);
    }

    let mac = signing_mac(raw_payload, secret, parsed.timestamp_raw)?;

    // verify_slice compares in constant time
    let matched = parsed.signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if !matched {
        warn!(
            candidates = parsed.signatures.len(),
            payload_length = raw_payload.len(),
            "webhook_signature_mismatch"
        );
        return Err(VerificationError::SignatureInvalid);
    }

    let envelope: EventEnvelope = serde_json::from_slice(raw_payload)
        .map_err(|e| VerificationError::PayloadInvalid(e.to_string()))?;

    Ok(WebhookEvent {
        id: envelope.id,
        event_type: envelope.event_type,
        livemode: envelope.livemode,
        raw_payload: raw_payload.clone(),
        signature_header: header.to_string(),
    })
}

fn parse_header(header: &str) -> Result<SignatureHeader<'_>, VerificationError> {
    let mut timestamp_raw = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp_raw = Some(value),
            "v1" if !value.is_empty() => signatures.push(value),
            _ => {}
        }
    }

    let Some(timestamp_raw) = timestamp_raw else {
        warn!("webhook_signature_no_timestamp");
        return Err(VerificationError::SignatureMalformed);
    };

    let timestamp = timestamp_raw.parse::<i64>().map_err(|_| {
        warn!(timestamp = %timestamp_raw, "webhook_signature_invalid_timestamp");
        VerificationError::SignatureMalformed
    })?;

    if signatures.is_empty() {
        warn!("webhook_signature_no_v1");
        return Err(VerificationError::SignatureMalformed);
    }

    Ok(SignatureHeader {
        timestamp_raw,
        timestamp,
        signatures,
    })
}

fn signing_mac(
    raw_payload: &[u8],
    secret: &str,
    timestamp: &str,
) -> Result<HmacSha256, VerificationError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::ConfigurationMissing)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_payload);
    Ok(mac)
}

/// Compute the hex `v1` digest for a payload, as the provider would.
pub fn compute_signature(
    raw_payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> Result<String, VerificationError> {
    let mac = signing_mac(raw_payload, secret, &timestamp.to_string())?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a full signature header value for a payload.
pub fn signature_header(
    raw_payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> Result<String, VerificationError> {
    let digest = compute_signature(raw_payload, secret, timestamp)?;
    Ok(format!("t={},v1={}", timestamp, digest))
}
