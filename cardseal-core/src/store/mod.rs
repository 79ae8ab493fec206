//! Raw secret persistence.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for persistence backends
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`FileStore`] - JSON file in the platform data directory
//! - [`KeyringStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`MasterKeySource`] / [`Sealer`] - At-rest encryption of stored values
//! - [`create_store`] - Helper to select a backend from configuration
//!
//! Backends persist opaque strings. Sealing happens one layer up, in
//! [`CredentialStore`](crate::credentials::CredentialStore), so every backend
//! only ever sees ciphertext when a master key is available.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::config::{StorageBackend, StorageConfig};

mod file;
#[cfg(feature = "keyring-store")]
mod keyring;
mod memory;
mod seal;

pub use file::FileStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;
pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use seal::KeyringMasterKey;
pub use seal::{MasterKeySource, Sealer, StaticMasterKey};

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the buffer is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested secret was not found.
    #[error("secret not found: {key}")]
    NotFound { key: String },

    /// Access to the secret was denied.
    #[error("access denied to secret: {key}")]
    AccessDenied { key: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },

    /// A stored value could not be opened with the current master key.
    #[error("stored value for {key} could not be decrypted")]
    Decryption { key: String },

    /// A value could not be sealed.
    #[error("encryption failed: {message}")]
    Encryption { message: String },
}

/// Abstraction over persistence backends.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage for testing
/// - [`FileStore`] - JSON file, survives restarts
/// - [`KeyringStore`] (with `keyring-store` feature) - OS keyring
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError>;

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// List all keys matching a prefix.
    ///
    /// Returns an empty vec if no keys match.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Check if a key exists without retrieving the value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Store several secrets as one unit.
    ///
    /// The default writes them one by one. Backends that can commit a batch
    /// atomically override this.
    async fn set_many(&self, entries: &[(&str, Secret)]) -> Result<(), StoreError> {
        for (key, secret) in entries {
            self.set(key, secret).await?;
        }
        Ok(())
    }

    /// Delete several secrets as one unit.
    async fn delete_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}

/// Create a persistence backend from storage configuration.
///
/// # Backend Selection Logic
///
/// - `memory`: a [`MemoryStore`]; nothing survives a restart.
/// - `file`: a [`FileStore`] at `{data_dir}/credentials.json`.
/// - `keyring`: a [`KeyringStore`] if the platform keyring is reachable,
///   otherwise falls back to the file backend with a warning. Values are
///   sealed before they reach either backend, so the fallback changes where
///   ciphertext lives, not whether it is encrypted.
pub fn create_store(config: &StorageConfig) -> Result<Arc<dyn SecretStore>, StoreError> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::debug!("Using in-memory credential storage");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::File => open_file_store(config),
        StorageBackend::Keyring => {
            #[cfg(feature = "keyring-store")]
            match KeyringStore::try_new(&config.keyring_service) {
                Ok(store) => {
                    tracing::info!("Using OS keyring for credential storage");
                    return Ok(Arc::new(store));
                }
                Err(e) => {
                    tracing::warn!(
                        "Keyring unavailable ({}), falling back to file storage",
                        e
                    );
                }
            }

            #[cfg(not(feature = "keyring-store"))]
            tracing::warn!(
                "Keyring storage requested but keyring-store feature not enabled. \
                 Using file storage."
            );

            open_file_store(config)
        }
    }
}

fn open_file_store(config: &StorageConfig) -> Result<Arc<dyn SecretStore>, StoreError> {
    let path: PathBuf = config.resolved_data_dir().join("credentials.json");
    tracing::debug!("Using file credential storage at {:?}", path);
    Ok(Arc::new(FileStore::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("super-secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_display_redacted() {
        let secret = Secret::new("super-secret");
        let display = format!("{}", secret);
        assert!(!display.contains("super-secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_secret_into_inner() {
        let secret = Secret::new("value");
        assert_eq!(secret.into_inner(), "value");
    }

    #[tokio::test]
    async fn test_create_store_memory() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            ..StorageConfig::default()
        };
        let store = create_store(&config).unwrap();

        store.set("test-key", &Secret::new("test")).await.unwrap();
        let retrieved = store.get("test-key").await.unwrap();
        assert_eq!(retrieved.unwrap().expose(), "test");
    }

    #[tokio::test]
    async fn test_create_store_file_in_data_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::File,
            data_dir: Some(dir.path().to_path_buf()),
            ..StorageConfig::default()
        };
        let store = create_store(&config).unwrap();

        store.set("k", &Secret::new("v")).await.unwrap();
        assert!(dir.path().join("credentials.json").exists());
    }

    #[tokio::test]
    async fn test_default_batch_operations() {
        let store = MemoryStore::new();
        store
            .set_many(&[("a", Secret::new("1")), ("b", Secret::new("2"))])
            .await
            .unwrap();
        assert!(store.exists("a").await.unwrap());
        assert!(store.exists("b").await.unwrap());

        store.delete_many(&["a", "b"]).await.unwrap();
        assert!(!store.exists("a").await.unwrap());
        assert!(!store.exists("b").await.unwrap());
    }
}
