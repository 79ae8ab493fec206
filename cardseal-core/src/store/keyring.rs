//! OS keyring-backed secret storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{Secret, SecretStore, StoreError};

/// Account name every Cardseal keyring entry is filed under.
const KEYRING_USER: &str = "cardseal";

/// OS keyring-backed secret store.
///
/// This store uses the platform's native keyring service:
/// - macOS / iOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// # Storage Key Format
///
/// Entries are stored under the service `{service_name}/{key}`.
///
/// Batch operations fall back to sequential writes: platform keyrings have
/// no transaction primitive.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this
    /// platform, or if it accepts writes without persisting them (keyring
    /// builds without a platform credential store).
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let marker = format!("{}/__check__", service_name);
        check_persistence(|| {
            Entry::new(&marker, KEYRING_USER).map_err(|e| StoreError::KeyringUnavailable {
                message: format!("keyring backend not available: {}", e),
            })
        })?;

        Ok(Self {
            service_name: service_name.to_string(),
        })
    }

    fn create_entry(&self, key: &str) -> Result<Entry, StoreError> {
        let service = format!("{}/{}", self.service_name, key);
        Entry::new(&service, KEYRING_USER).map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

/// Write a marker through one entry handle and read it back through another.
fn check_persistence(open: impl Fn() -> Result<Entry, StoreError>) -> Result<(), StoreError> {
    let unavailable = |message: String| StoreError::KeyringUnavailable { message };

    open()?
        .set_password("cardseal-check")
        .map_err(|e| unavailable(format!("keyring rejected test write: {}", e)))?;
    let read_back = open()?.get_password();
    let _ = open()?.delete_credential();

    match read_back {
        Ok(value) if value == "cardseal-check" => Ok(()),
        Ok(_) => Err(unavailable("keyring returned a different test value".to_string())),
        Err(e) => Err(unavailable(format!("keyring does not persist entries: {}", e))),
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl SecretStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let entry = self.create_entry(key)?;

        match entry.get_password() {
            Ok(password) => Ok(Some(Secret::new(password))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::Ambiguous(_)) => Err(StoreError::BackendError {
                message: format!("ambiguous keyring entry for key: {}", key),
            }),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::BackendError {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(keyring::Error::NoStorageAccess(e)) => Err(StoreError::AccessDenied {
                key: format!("{} ({})", key, e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        let entry = self.create_entry(key)?;

        entry
            .set_password(secret.expose())
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring password: {}", e),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let entry = self.create_entry(key)?;

        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // Platform keyrings expose no enumeration API.
        Err(StoreError::BackendError {
            message: format!(
                "list_keys not supported by keyring backend (requested prefix: {})",
                prefix
            ),
        })
    }

    async fn delete_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        // Attempt every key even if one fails, so a clear never stops halfway.
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.delete(key).await {
                tracing::warn!("Failed to delete keyring entry {}: {}", key, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
