//! Encrypted-at-rest credential persistence.
//!
//! [`CredentialStore`] owns the three persisted secrets: the access token,
//! the refresh token and the cached server public key. Values are sealed
//! with a [`Sealer`] before they reach the [`SecretStore`] backend whenever a
//! master key is available.
//!
//! Running without encryption is possible but never silent: it must be
//! requested through [`StorageConfig::allow_unencrypted`], it logs a warning,
//! and [`CredentialStore::protection`] reports it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::error::{ErrorCode, SdkError};
use crate::store::{MasterKeySource, Sealer, Secret, SecretStore, StoreError};

pub const ACCESS_TOKEN_KEY: &str = "cardseal/access_token";
pub const REFRESH_TOKEN_KEY: &str = "cardseal/refresh_token";
pub const PUBLIC_KEY_KEY: &str = "cardseal/public_key";

const ALL_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, PUBLIC_KEY_KEY];

/// Whether stored values are encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protection {
    Encrypted,
    Unencrypted,
}

/// What a read returns when the stored bytes fail to decrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecryptFailurePolicy {
    /// Raise `SECURITY_DECRYPTION_FAILED`.
    Fail,
    /// Return the raw stored text as if it were the value.
    PassThrough,
}

pub struct CredentialStore {
    backend: Arc<dyn SecretStore>,
    sealer: Option<Sealer>,
    decrypt_failure: DecryptFailurePolicy,
}

impl CredentialStore {
    /// Open a store over `backend`, sealing values with the key from
    /// `key_source`.
    ///
    /// When no key source is given or it fails, the store only opens if
    /// `config.allow_unencrypted` is set; otherwise the keystore error is
    /// returned as `SECURITY_KEYSTORE_UNAVAILABLE`.
    pub fn open(
        backend: Arc<dyn SecretStore>,
        key_source: Option<&dyn MasterKeySource>,
        config: &StorageConfig,
    ) -> Result<Self, SdkError> {
        let sealer = match key_source.map(Sealer::from_source) {
            Some(Ok(sealer)) => Some(sealer),
            Some(Err(e)) if config.allow_unencrypted => {
                tracing::warn!(
                    "Secure keystore unavailable ({}); credentials will be stored UNENCRYPTED",
                    e
                );
                None
            }
            Some(Err(e)) => {
                return Err(SdkError::new(
                    ErrorCode::KeystoreUnavailable,
                    "secure keystore unavailable and unencrypted storage is not allowed",
                )
                .with_cause(e));
            }
            None if config.allow_unencrypted => {
                tracing::warn!(
                    "No master key source configured; credentials will be stored UNENCRYPTED"
                );
                None
            }
            None => {
                return Err(SdkError::new(
                    ErrorCode::KeystoreUnavailable,
                    "no master key source and unencrypted storage is not allowed",
                ));
            }
        };

        Ok(Self {
            backend,
            sealer,
            decrypt_failure: config.decrypt_failure,
        })
    }

    /// A store that seals values with `key_source`.
    pub fn encrypted(
        backend: Arc<dyn SecretStore>,
        key_source: &dyn MasterKeySource,
    ) -> Result<Self, SdkError> {
        Ok(Self {
            backend,
            sealer: Some(Sealer::from_source(key_source)?),
            decrypt_failure: DecryptFailurePolicy::Fail,
        })
    }

    /// A store that keeps values in plaintext. Tests and degraded hosts only.
    pub fn unencrypted(backend: Arc<dyn SecretStore>) -> Self {
        tracing::warn!("Credential store opened without encryption");
        Self {
            backend,
            sealer: None,
            decrypt_failure: DecryptFailurePolicy::Fail,
        }
    }

    pub fn with_decrypt_failure_policy(mut self, policy: DecryptFailurePolicy) -> Self {
        self.decrypt_failure = policy;
        self
    }

    pub fn protection(&self) -> Protection {
        if self.sealer.is_some() {
            Protection::Encrypted
        } else {
            Protection::Unencrypted
        }
    }

    /// Replace the stored token pair in one write.
    pub async fn save_tokens(&self, access: &str, refresh: &str) -> Result<(), SdkError> {
        let entries = [
            (ACCESS_TOKEN_KEY, self.seal(ACCESS_TOKEN_KEY, access)?),
            (REFRESH_TOKEN_KEY, self.seal(REFRESH_TOKEN_KEY, refresh)?),
        ];
        self.backend.set_many(&entries).await?;
        tracing::debug!("Stored new credential pair");
        Ok(())
    }

    pub async fn access_token(&self) -> Result<Option<Secret>, SdkError> {
        self.read(ACCESS_TOKEN_KEY).await
    }

    pub async fn refresh_token(&self) -> Result<Option<Secret>, SdkError> {
        self.read(REFRESH_TOKEN_KEY).await
    }

    /// True when either token is stored.
    pub async fn has_tokens(&self) -> Result<bool, SdkError> {
        Ok(self.backend.exists(ACCESS_TOKEN_KEY).await?
            || self.backend.exists(REFRESH_TOKEN_KEY).await?)
    }

    /// Cache the server public key (JWK JSON).
    pub async fn save_public_key(&self, jwk_json: &str) -> Result<(), SdkError> {
        let sealed = self.seal(PUBLIC_KEY_KEY, jwk_json)?;
        self.backend.set(PUBLIC_KEY_KEY, &sealed).await?;
        Ok(())
    }

    pub async fn public_key(&self) -> Result<Option<String>, SdkError> {
        Ok(self
            .read(PUBLIC_KEY_KEY)
            .await?
            .map(|secret| secret.expose().to_string()))
    }

    /// Drop only the cached public key, keeping the tokens.
    pub async fn clear_public_key(&self) -> Result<(), SdkError> {
        self.backend.delete(PUBLIC_KEY_KEY).await?;
        Ok(())
    }

    /// Remove the access token, refresh token and public key together.
    pub async fn clear(&self) -> Result<(), SdkError> {
        self.backend.delete_many(&ALL_KEYS).await?;
        tracing::debug!("Cleared stored credentials");
        Ok(())
    }

    fn seal(&self, slot: &str, value: &str) -> Result<Secret, StoreError> {
        match &self.sealer {
            Some(sealer) => Ok(Secret::new(sealer.seal(slot, value)?)),
            None => Ok(Secret::new(value)),
        }
    }

    async fn read(&self, slot: &str) -> Result<Option<Secret>, SdkError> {
        let Some(stored) = self.backend.get(slot).await? else {
            return Ok(None);
        };
        let Some(sealer) = &self.sealer else {
            return Ok(Some(stored));
        };

        match sealer.open(slot, stored.expose()) {
            Ok(plain) => Ok(Some(Secret::new(plain.as_str()))),
            Err(e) => match self.decrypt_failure {
                DecryptFailurePolicy::Fail => Err(e.into()),
                DecryptFailurePolicy::PassThrough => {
                    tracing::warn!("Stored value in {} failed to decrypt; returning raw", slot);
                    Ok(Some(stored))
                }
            },
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("protection", &self.protection())
            .field("decrypt_failure", &self.decrypt_failure)
            .finish()
    }
}
