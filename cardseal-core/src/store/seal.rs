//! At-rest sealing of stored values.
//!
//! A [`MasterKeySource`] yields the 256-bit key; a [`Sealer`] uses it to
//! wrap individual values with AES-256-GCM. The slot name is bound in as
//! additional authenticated data, so a sealed access token cannot be replayed
//! into the refresh-token slot.
//!
//! Sealed format: `v1:` followed by base64url(nonce || ciphertext || tag).

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use super::StoreError;

const SEALED_PREFIX: &str = "v1:";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Supplies the master key used to seal stored credentials.
///
/// The host chooses the source: the OS keyring, a hardware-backed keystore
/// reached through its own bindings, or a fixed key in tests.
pub trait MasterKeySource: Send + Sync {
    /// Return the 256-bit master key, creating it on first use if the source
    /// supports that.
    fn master_key(&self) -> Result<Zeroizing<[u8; 32]>, StoreError>;
}

/// A master key supplied directly by the host.
pub struct StaticMasterKey(Zeroizing<[u8; 32]>);

impl StaticMasterKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self(Zeroizing::new(key))
    }

    /// A fresh random key; useful for tests and ephemeral sessions.
    pub fn random() -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut key[..]);
        Self(key)
    }
}

impl std::fmt::Debug for StaticMasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StaticMasterKey([REDACTED])")
    }
}

impl MasterKeySource for StaticMasterKey {
    fn master_key(&self) -> Result<Zeroizing<[u8; 32]>, StoreError> {
        Ok(self.0.clone())
    }
}

/// Master key kept in the OS keyring.
///
/// The key is generated on first use and stored base64url-encoded under
/// `{service}/master_key`.
#[cfg(feature = "keyring-store")]
pub struct KeyringMasterKey {
    service: String,
}

#[cfg(feature = "keyring-store")]
impl KeyringMasterKey {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&format!("{}/master_key", self.service), "cardseal").map_err(|e| {
            StoreError::KeyringUnavailable {
                message: format!("cannot open master key entry: {}", e),
            }
        })
    }
}

#[cfg(feature = "keyring-store")]
impl std::fmt::Debug for KeyringMasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringMasterKey")
            .field("service", &self.service)
            .finish()
    }
}

#[cfg(feature = "keyring-store")]
impl MasterKeySource for KeyringMasterKey {
    fn master_key(&self) -> Result<Zeroizing<[u8; 32]>, StoreError> {
        load_or_create_key(|| self.entry())
    }
}

/// Read the key behind `open`, generating and storing one if absent.
///
/// A freshly written key must read back through a new entry handle; keyring
/// builds without a platform store hand out empty in-memory entries and are
/// reported as unavailable.
#[cfg(feature = "keyring-store")]
fn load_or_create_key(
    open: impl Fn() -> Result<keyring::Entry, StoreError>,
) -> Result<Zeroizing<[u8; 32]>, StoreError> {
    match open()?.get_password() {
        Ok(encoded) => decode_master_key(Zeroizing::new(encoded)),
        Err(keyring::Error::NoEntry) => {
            let mut key = Zeroizing::new([0u8; 32]);
            OsRng.fill_bytes(&mut key[..]);
            let encoded = Zeroizing::new(URL_SAFE_NO_PAD.encode(&key[..]));
            open()?
                .set_password(&encoded)
                .map_err(|e| StoreError::KeyringUnavailable {
                    message: format!("cannot persist master key: {}", e),
                })?;

            match open()?.get_password() {
                Ok(stored) if stored == *encoded => {
                    tracing::info!("Generated new credential master key in OS keyring");
                    Ok(key)
                }
                // Another process created the key first; theirs wins.
                Ok(stored) => decode_master_key(Zeroizing::new(stored)),
                Err(_) => Err(StoreError::KeyringUnavailable {
                    message: "keyring does not persist entries (no platform credential store)"
                        .to_string(),
                }),
            }
        }
        Err(e) => Err(StoreError::KeyringUnavailable {
            message: format!("cannot read master key: {}", e),
        }),
    }
}

#[cfg(feature = "keyring-store")]
fn decode_master_key(encoded: Zeroizing<String>) -> Result<Zeroizing<[u8; 32]>, StoreError> {
    let bytes = Zeroizing::new(URL_SAFE_NO_PAD.decode(encoded.as_bytes()).map_err(|_| {
        StoreError::KeyringUnavailable {
            message: "stored master key is not valid base64url".to_string(),
        }
    })?);
    let key: [u8; 32] =
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::KeyringUnavailable {
                message: format!("stored master key has {} bytes, expected 32", bytes.len()),
            })?;
    Ok(Zeroizing::new(key))
}

/// Seals and opens individual stored values.
pub struct Sealer {
    cipher: Aes256Gcm,
}

impl Sealer {
    /// Build a sealer from a master key source.
    pub fn from_source(source: &dyn MasterKeySource) -> Result<Self, StoreError> {
        let key = source.master_key()?;
        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|e| StoreError::Encryption {
            message: format!("invalid master key: {}", e),
        })?;
        Ok(Self { cipher })
    }

    /// Encrypt `plaintext` for storage under `slot`.
    pub fn seal(&self, slot: &str, plaintext: &str) -> Result<String, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: slot.as_bytes(),
                },
            )
            .map_err(|_| StoreError::Encryption {
                message: format!("sealing {} failed", slot),
            })?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", SEALED_PREFIX, URL_SAFE_NO_PAD.encode(sealed)))
    }

    /// Decrypt a value previously sealed under `slot`.
    ///
    /// Any mismatch (wrong key, wrong slot, tampering, legacy plaintext)
    /// yields [`StoreError::Decryption`].
    pub fn open(&self, slot: &str, sealed: &str) -> Result<Zeroizing<String>, StoreError> {
        let failed = || StoreError::Decryption {
            key: slot.to_string(),
        };

        let encoded = sealed.strip_prefix(SEALED_PREFIX).ok_or_else(failed)?;
        let payload = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| failed())?;
        if payload.len() < NONCE_LEN + TAG_LEN {
            return Err(failed());
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(
                    Nonce::from_slice(nonce_bytes),
                    Payload {
                        msg: ciphertext,
                        aad: slot.as_bytes(),
                    },
                )
                .map_err(|_| failed())?,
        );

        let text = std::str::from_utf8(&plaintext).map_err(|_| failed())?;
        Ok(Zeroizing::new(text.to_string()))
    }
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sealer(AES-256-GCM)")
    }
}
