//! Untrusted token inspection and shared JWT constants.
//!
//! Identity tokens are verified in two strictly separated phases. This module is
//! the first one: it decodes the header and payload WITHOUT checking the
//! signature, only to learn which key to use and which audience and subject
//! the trusted pass must pin. Nothing returned here may be used as a claim.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE any decoding
//! - `kid` must be a non-empty string
//! - Values extracted here are routing data, never identity

use crate::error::VerifyError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;
use std::time::Duration;

/// The provider's issuer identifier, also the `aud` of client assertions.
pub const APPLE_ISSUER: &str = "https://appleid.apple.com";

/// Maximum accepted token size in bytes (8KB).
///
/// Provider identity tokens are well under 2KB; anything larger is rejected
/// before base64 decoding or signature work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default tolerance for `iat` values in the future (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound on the configurable `iat` tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Routing information read from a token before it is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedTokenHeader {
    /// Header `kid`, selects the verification key.
    pub key_id: String,

    /// First `aud` value from the payload.
    pub audience: String,

    /// Payload `sub`.
    pub subject: String,
}

impl UnverifiedTokenHeader {
    /// Decode routing fields from a compact JWS without verifying it.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError::Malformed` if the token is oversized, is not three
    /// dot-separated segments, a segment is not base64url JSON, or `kid`, `aud`
    /// or `sub` is missing or of the wrong type.
    pub fn parse(token: &str) -> Result<Self, VerifyError> {
        if token.len() > MAX_JWT_SIZE_BYTES {
            tracing::debug!(
                target: "apple_auth.jwt",
                token_size = token.len(),
                max_size = MAX_JWT_SIZE_BYTES,
                "Token rejected: size exceeds maximum allowed"
            );
            return Err(VerifyError::Malformed("token too large".to_string()));
        }

        let mut parts = token.split('.');
        let (Some(header_part), Some(payload_part), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            tracing::debug!(target: "apple_auth.jwt", "Token rejected: not a compact JWS");
            return Err(VerifyError::Malformed(
                "expected three dot-separated segments".to_string(),
            ));
        };

        let header = decode_segment(header_part, "header")?;
        let payload = decode_segment(payload_part, "payload")?;

        let key_id = header
            .get("kid")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| VerifyError::Malformed("header kid missing".to_string()))?;

        let audience = first_audience(payload.get("aud"))
            .ok_or_else(|| VerifyError::Malformed("payload aud missing".to_string()))?;

        let subject = payload
            .get("sub")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| VerifyError::Malformed("payload sub missing".to_string()))?;

        Ok(Self {
            key_id,
            audience,
            subject,
        })
    }
}

fn decode_segment(segment: &str, name: &str) -> Result<Value, VerifyError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "apple_auth.jwt", segment = name, error = %e, "Failed to decode JWT base64");
        VerifyError::Malformed(format!("{name} is not base64url"))
    })?;

    let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "apple_auth.jwt", segment = name, error = %e, "Failed to parse JWT JSON");
        VerifyError::Malformed(format!("{name} is not JSON"))
    })?;

    if value.is_object() {
        Ok(value)
    } else {
        Err(VerifyError::Malformed(format!("{name} is not a JSON object")))
    }
}

/// `aud` may be a single string or an array of strings.
fn first_audience(aud: Option<&Value>) -> Option<String> {
    match aud? {
        Value::String(s) => Some(s.clone()),
        Value::Array(values) => values.first()?.as_str().map(ToString::to_string),
        _ => None,
    }
}

/// Reject an `iat` more than `clock_skew` ahead of `now` (Unix seconds).
///
/// # Errors
///
/// Returns `VerifyError::Invalid` when `iat` is too far in the future.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), VerifyError> {
    // Safe cast: clock_skew is bounded by MAX_CLOCK_SKEW at configuration time
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "apple_auth.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(VerifyError::Invalid("iat is in the future".to_string()));
    }

    Ok(())
}
