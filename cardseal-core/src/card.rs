//! Card data model and tokenize endpoint payloads.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Sensitive card fields.
///
/// Lives only for the call that encrypts it: the buffers are wiped on drop
/// and `Debug` never prints the values. Serializes to the JSON record the
/// tokenize service decrypts (`pan`, `expMonth`, `expYear`, `cvv`).
#[derive(Clone, Serialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    pub pan: String,
    pub exp_month: String,
    pub exp_year: String,
    pub cvv: String,
}

impl CardRecord {
    pub fn new(
        pan: impl Into<String>,
        exp_month: impl Into<String>,
        exp_year: impl Into<String>,
        cvv: impl Into<String>,
    ) -> Self {
        Self {
            pan: pan.into(),
            exp_month: exp_month.into(),
            exp_year: exp_year.into(),
            cvv: cvv.into(),
        }
    }
}

impl std::fmt::Debug for CardRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardRecord")
            .field("pan", &"[REDACTED]")
            .field("exp_month", &"[REDACTED]")
            .field("exp_year", &"[REDACTED]")
            .field("cvv", &"[REDACTED]")
            .finish()
    }
}

/// Body of the tokenize request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenizeRequest {
    /// JWE compact serialization of the [`CardRecord`].
    pub payload: String,
    /// Ask for a token that does not expire.
    pub permanent: bool,
}

/// Successful tokenize response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResult {
    pub masked_pan: String,
    pub expiration_month: String,
    pub expiration_year: String,
    pub brand: String,
    pub fingerprint: String,
    pub token: String,
    /// Lifetime in seconds; 0 for permanent tokens.
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_art_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masked_virtual_pan: Option<String>,
}
