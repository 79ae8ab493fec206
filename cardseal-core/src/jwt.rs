//! Bearer token claims inspection.
//!
//! These helpers read the claims segment of a JWT without verifying its
//! signature. The server is the only judge of a token's legitimacy; the
//! client only needs to know when to refresh and whom the token belongs to.
//!
//! When in doubt the helpers answer conservatively: a token whose claims
//! cannot be read is reported as expired, which forces a refresh instead of
//! sending a credential of unknown validity.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::Utc;
use serde::Deserialize;

use crate::error::{ErrorCode, SdkError};

/// URL-safe base64 that accepts segments with or without `=` padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The subset of registered claims the client reads.
///
/// Only `exp` and `sub` drive client behaviour and are type-checked. Issuers
/// disagree on the shape of the rest (`scope` as a string or an array, `iat`
/// as a float), so those are kept as raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Claims {
    /// Expiry, Unix seconds.
    pub exp: Option<i64>,
    /// Subject; for client-credential tokens this is the client id.
    pub sub: Option<String>,
    pub iat: Option<serde_json::Value>,
    pub iss: Option<serde_json::Value>,
    pub scope: Option<serde_json::Value>,
}

impl Claims {
    /// Granted scopes, from either a space-delimited string or an array.
    pub fn scopes(&self) -> Vec<String> {
        match &self.scope {
            Some(serde_json::Value::String(s)) => {
                s.split_whitespace().map(str::to_string).collect()
            }
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Decode the claims segment of `token`.
///
/// # Errors
///
/// Returns `AUTH_MALFORMED_TOKEN` if:
/// - The token does not have exactly 3 dot-separated parts
/// - The payload is not base64url
/// - The payload is not a JSON object, or `exp`/`sub` have the wrong type
pub fn decode_claims(token: &str) -> Result<Claims, SdkError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(SdkError::new(
            ErrorCode::MalformedToken,
            "JWT must have 3 parts separated by dots",
        ));
    }

    let payload = URL_SAFE_LENIENT.decode(parts[1]).map_err(|e| {
        SdkError::new(
            ErrorCode::MalformedToken,
            format!("failed to decode JWT payload: {}", e),
        )
    })?;

    serde_json::from_slice(&payload).map_err(|e| {
        SdkError::new(
            ErrorCode::MalformedToken,
            format!("failed to parse JWT claims: {}", e),
        )
    })
}

/// Whether `token` is expired at the current time.
///
/// A token without `exp` never expires; an unreadable token is expired.
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now().timestamp())
}

/// Whether `token` is expired at `now` (Unix seconds).
pub fn is_expired_at(token: &str, now: i64) -> bool {
    match decode_claims(token) {
        Ok(Claims { exp: Some(exp), .. }) => exp <= now,
        Ok(_) => false,
        Err(e) => {
            tracing::debug!("Treating unreadable token as expired: {}", e.message());
            true
        }
    }
}

/// Whether `token` has JWT structure with a readable claims segment.
pub fn is_well_formed(token: &str) -> bool {
    decode_claims(token).is_ok()
}

/// The `sub` claim of `token`, or `None` if absent, empty or unreadable.
pub fn subject(token: &str) -> Option<String> {
    decode_claims(token)
        .ok()
        .and_then(|claims| claims.sub)
        .filter(|sub| !sub.is_empty())
}
