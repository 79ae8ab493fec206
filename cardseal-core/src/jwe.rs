//! Envelope encryption of card records as JWE compact serialization.
//!
//! Algorithm pair: `RSA-OAEP-256` key wrapping (SHA-256 digest, MGF1 with
//! SHA-256, empty label) and `A256GCM` content encryption. The base64url
//! protected header is the additional authenticated data.
//!
//! Output: `header.encrypted_key.iv.ciphertext.tag`, every segment
//! base64url without padding.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::Oaep;
use serde::Serialize;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::credentials::CredentialStore;
use crate::error::{ErrorCode, SdkError};
use crate::jwk::Jwk;

pub const ALG_RSA_OAEP_256: &str = "RSA-OAEP-256";
pub const ENC_A256GCM: &str = "A256GCM";

const CEK_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Field order is the serialized order.
#[derive(Serialize)]
struct ProtectedHeader<'a> {
    alg: &'a str,
    enc: &'a str,
    kid: &'a str,
    typ: &'a str,
}

pub struct EnvelopeEncryptor {
    credentials: Arc<CredentialStore>,
}

impl EnvelopeEncryptor {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self { credentials }
    }

    /// Encrypt `record` for the holder of `jwk`'s private key.
    ///
    /// A fresh content key and IV are drawn from the OS RNG on every call,
    /// so encrypting the same record twice gives unrelated envelopes.
    ///
    /// # Errors
    ///
    /// - `SECURITY_INVALID_KEY` if `jwk` is not a usable RSA key
    /// - `INTERNAL_SERIALIZATION` if `record` cannot be serialized
    /// - `SECURITY_ENCRYPTION_FAILED` if key wrapping or sealing fails
    pub fn encrypt<T: Serialize + ?Sized>(&self, record: &T, jwk: &Jwk) -> Result<String, SdkError> {
        let public_key = jwk.to_rsa_public_key()?;

        let header = ProtectedHeader {
            alg: ALG_RSA_OAEP_256,
            enc: ENC_A256GCM,
            kid: &jwk.kid,
            typ: "JWE",
        };
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);

        let mut cek = Zeroizing::new([0u8; CEK_LEN]);
        OsRng.fill_bytes(&mut cek[..]);

        let encrypted_key = public_key
            .encrypt(
                &mut OsRng,
                Oaep::new_with_mgf_hash::<Sha256, Sha256>(),
                &cek[..],
            )
            .map_err(|e| {
                SdkError::new(ErrorCode::EncryptionFailed, "content key wrapping failed")
                    .with_cause(e)
            })?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let plaintext = Zeroizing::new(serde_json::to_vec(record)?);
        let cipher = Aes256Gcm::new_from_slice(&cek[..]).map_err(|_| {
            SdkError::new(ErrorCode::EncryptionFailed, "invalid content key length")
        })?;
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &plaintext[..],
                    aad: header_b64.as_bytes(),
                },
            )
            .map_err(|_| SdkError::new(ErrorCode::EncryptionFailed, "content encryption failed"))?;

        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        tracing::debug!("Encrypted card envelope for key {}", jwk.kid);

        Ok(format!(
            "{}.{}.{}.{}.{}",
            header_b64,
            URL_SAFE_NO_PAD.encode(encrypted_key),
            URL_SAFE_NO_PAD.encode(iv),
            URL_SAFE_NO_PAD.encode(ciphertext),
            URL_SAFE_NO_PAD.encode(tag),
        ))
    }

    /// Encrypt with the public key cached in the credential store.
    ///
    /// Fails with `CONFIG_NO_PUBLIC_KEY` when nothing is cached.
    pub async fn encrypt_with_cached<T: Serialize + ?Sized + Sync>(
        &self,
        record: &T,
    ) -> Result<String, SdkError> {
        let cached = self
            .credentials
            .public_key()
            .await?
            .ok_or_else(|| SdkError::new(ErrorCode::NoPublicKey, "no key available"))?;
        let jwk: Jwk = serde_json::from_str(&cached).map_err(|e| {
            SdkError::new(ErrorCode::InvalidKey, "cached public key is not a valid JWK")
                .with_cause(e)
        })?;
        self.encrypt(record, &jwk)
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::{private_key, test_jwk};
    use super::*;
    use crate::card::CardRecord;
    use crate::store::MemoryStore;

    fn encryptor() -> (EnvelopeEncryptor, Arc<CredentialStore>) {
        let credentials = Arc::new(CredentialStore::unencrypted(Arc::new(MemoryStore::new())));
        (EnvelopeEncryptor::new(credentials.clone()), credentials)
    }

    /// Decrypt a compact JWE with the test private key.
    fn decrypt(compact: &str) -> (serde_json::Value, Vec<u8>) {
        let parts: Vec<&str> = compact.split('.').collect();
        assert_eq!(parts.len(), 5);

        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[0]).unwrap()).unwrap();
        let cek = private_key()
            .decrypt(Oaep::new::<Sha256>(), &URL_SAFE_NO_PAD.decode(parts[1]).unwrap())
            .unwrap();
        let iv = URL_SAFE_NO_PAD.decode(parts[2]).unwrap();
        let mut sealed = URL_SAFE_NO_PAD.decode(parts[3]).unwrap();
        sealed.extend(URL_SAFE_NO_PAD.decode(parts[4]).unwrap());

        let plaintext = Aes256Gcm::new_from_slice(&cek)
            .unwrap()
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: parts[0].as_bytes(),
                },
            )
            .unwrap();
        (header, plaintext)
    }

    #[test]
    fn test_round_trip_card_record() {
        let (encryptor, _) = encryptor();
        let card = CardRecord::new("4444444444444448", "06", "27", "123");

        let compact = encryptor.encrypt(&card, &test_jwk()).unwrap();
        let (header, plaintext) = decrypt(&compact);

        assert_eq!(header["alg"], "RSA-OAEP-256");
        assert_eq!(header["enc"], "A256GCM");
        assert_eq!(header["kid"], "test-key-1");
        assert_eq!(header["typ"], "JWE");

        let record: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
        assert_eq!(record["pan"], "4444444444444448");
        assert_eq!(record["expMonth"], "06");
        assert_eq!(record["cvv"], "123");
    }

    #[test]
    fn test_header_field_order() {
        let (encryptor, _) = encryptor();
        let compact = encryptor.encrypt(&serde_json::json!({}), &test_jwk()).unwrap();
        let header = URL_SAFE_NO_PAD.decode(compact.split('.').next().unwrap()).unwrap();

        assert_eq!(
            String::from_utf8(header).unwrap(),
            r#"{"alg":"RSA-OAEP-256","enc":"A256GCM","kid":"test-key-1","typ":"JWE"}"#
        );
    }

    #[test]
    fn test_segment_sizes() {
        let (encryptor, _) = encryptor();
        let compact = encryptor.encrypt(&serde_json::json!({"a": 1}), &test_jwk()).unwrap();
        let parts: Vec<&str> = compact.split('.').collect();

        assert!(parts.iter().all(|p| !p.contains('=')));
        assert_eq!(URL_SAFE_NO_PAD.decode(parts[1]).unwrap().len(), 256);
        assert_eq!(URL_SAFE_NO_PAD.decode(parts[2]).unwrap().len(), IV_LEN);
        assert_eq!(URL_SAFE_NO_PAD.decode(parts[4]).unwrap().len(), TAG_LEN);
    }

    #[test]
    fn test_each_call_uses_fresh_key_and_iv() {
        let (encryptor, _) = encryptor();
        let card = CardRecord::new("4444444444444448", "06", "27", "123");
        let jwk = test_jwk();

        let first = encryptor.encrypt(&card, &jwk).unwrap();
        let second = encryptor.encrypt(&card, &jwk).unwrap();
        let first: Vec<&str> = first.split('.').collect();
        let second: Vec<&str> = second.split('.').collect();

        assert_eq!(first[0], second[0]);
        assert_ne!(first[1], second[1]);
        assert_ne!(first[2], second[2]);
        assert_ne!(first[3], second[3]);
    }

    #[test]
    fn test_tampered_header_fails_authentication() {
        let (encryptor, _) = encryptor();
        let compact = encryptor.encrypt(&serde_json::json!({"a": 1}), &test_jwk()).unwrap();
        let parts: Vec<&str> = compact.split('.').collect();

        let cek = private_key()
            .decrypt(Oaep::new::<Sha256>(), &URL_SAFE_NO_PAD.decode(parts[1]).unwrap())
            .unwrap();
        let mut sealed = URL_SAFE_NO_PAD.decode(parts[3]).unwrap();
        sealed.extend(URL_SAFE_NO_PAD.decode(parts[4]).unwrap());
        let other_aad = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);

        let result = Aes256Gcm::new_from_slice(&cek).unwrap().decrypt(
            Nonce::from_slice(&URL_SAFE_NO_PAD.decode(parts[2]).unwrap()),
            Payload {
                msg: &sealed,
                aad: other_aad.as_bytes(),
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_non_rsa_key() {
        let (encryptor, _) = encryptor();
        let mut jwk = test_jwk();
        jwk.kty = "oct".to_string();

        let err = encryptor.encrypt(&serde_json::json!({}), &jwk).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidKey);
    }

    #[tokio::test]
    async fn test_encrypt_with_cached_requires_key() {
        let (encryptor, credentials) = encryptor();

        let err = encryptor
            .encrypt_with_cached(&serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoPublicKey);
        assert_eq!(err.message(), "no key available");

        credentials
            .save_public_key(&serde_json::to_string(&test_jwk()).unwrap())
            .await
            .unwrap();
        let compact = encryptor
            .encrypt_with_cached(&serde_json::json!({"a": 1}))
            .await
            .unwrap();
        let (_, plaintext) = decrypt(&compact);
        assert_eq!(plaintext, br#"{"a":1}"#);
    }
}
