//! JSON Web Key representation of the server's encryption key.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, SdkError};

/// Smallest modulus accepted for envelope encryption.
const MIN_MODULUS_BITS: usize = 2048;

/// An RSA public key as published by the public-key endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Modulus, base64url big-endian.
    pub n: String,
    /// Public exponent, base64url big-endian.
    pub e: String,
}

impl Jwk {
    /// Describe `key` as an encryption JWK with id `kid`.
    pub fn from_rsa_public_key(key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            kid: kid.into(),
            key_use: Some("enc".to_string()),
            alg: Some("RSA-OAEP-256".to_string()),
            n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
        }
    }

    /// Rebuild the RSA public key from the modulus and exponent.
    ///
    /// # Errors
    ///
    /// `SECURITY_INVALID_KEY` when the key type is not RSA, a component is not
    /// base64url, or the numbers do not form an acceptable RSA key.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, SdkError> {
        if self.kty != "RSA" {
            return Err(SdkError::new(
                ErrorCode::InvalidKey,
                format!("unsupported key type {}", self.kty),
            )
            .with_data("kid", self.kid.clone()));
        }

        let n = decode_component("n", &self.n)?;
        let e = decode_component("e", &self.e)?;
        if n.bits() < MIN_MODULUS_BITS {
            return Err(SdkError::new(
                ErrorCode::InvalidKey,
                format!("RSA modulus shorter than {} bits", MIN_MODULUS_BITS),
            )
            .with_data("kid", self.kid.clone()));
        }

        RsaPublicKey::new(n, e).map_err(|err| {
            SdkError::new(ErrorCode::InvalidKey, format!("invalid RSA public key: {}", err))
                .with_data("kid", self.kid.clone())
                .with_cause(err)
        })
    }
}

fn decode_component(name: &str, value: &str) -> Result<BigUint, SdkError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| {
            SdkError::new(
                ErrorCode::InvalidKey,
                format!("JWK component {} is not base64url: {}", name, e),
            )
        })?;
    if bytes.is_empty() {
        return Err(SdkError::new(
            ErrorCode::InvalidKey,
            format!("JWK component {} is empty", name),
        ));
    }
    Ok(BigUint::from_bytes_be(&bytes))
}
