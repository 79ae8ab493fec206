//! File-backed secret storage.
//!
//! Stores every key in a single JSON document. Each mutation rewrites the
//! whole document through a sibling temp file followed by a rename, so the
//! file on disk is always either the old snapshot or the new one.
//!
//! Reads are served from the in-memory snapshot. Writes run on the blocking
//! pool so a slow disk never stalls the async runtime.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{Secret, SecretStore, StoreError};

/// On-disk format.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileStoreData {
    /// Version of the file format (for future migrations).
    version: u32,

    /// Stored values, already sealed by the caller when encryption is on.
    entries: BTreeMap<String, String>,
}

impl Default for FileStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            entries: BTreeMap::new(),
        }
    }
}

/// Disk-backed secret store.
///
/// Values survive process restarts. The file is created with owner-only
/// permissions on Unix.
pub struct FileStore {
    path: PathBuf,
    data: Mutex<FileStoreData>,
    /// Serializes writers so snapshots reach the disk in order.
    writer: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// A missing file is treated as an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            FileStoreData::default()
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Get the storage path for this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the snapshot, persist it, then publish it.
    ///
    /// The in-memory view only moves forward once the file write succeeded.
    async fn update(&self, change: impl FnOnce(&mut FileStoreData) + Send) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;

        let mut next = self.data.lock().clone();
        change(&mut next);
        let contents = serde_json::to_string_pretty(&next)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || persist(&path, &contents))
            .await
            .map_err(|e| StoreError::BackendError {
                message: format!("credential file write did not complete: {}", e),
            })??;

        *self.data.lock() = next;
        Ok(())
    }
}

fn persist(path: &Path, contents: &str) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    restrict_permissions(&tmp)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("keys_count", &self.data.lock().entries.len())
            .finish()
    }
}

#[async_trait]
impl SecretStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.lock().entries.get(key).map(Secret::new))
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.update(|data| {
            data.entries
                .insert(key.to_string(), secret.expose().to_string());
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        if !self.data.lock().entries.contains_key(key) {
            return Ok(());
        }
        self.update(|data| {
            data.entries.remove(key);
        })
        .await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .lock()
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn set_many(&self, entries: &[(&str, Secret)]) -> Result<(), StoreError> {
        self.update(|data| {
            for (key, secret) in entries {
                data.entries
                    .insert(key.to_string(), secret.expose().to_string());
            }
        })
        .await
    }

    async fn delete_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        self.update(|data| {
            for key in keys {
                data.entries.remove(*key);
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("credentials.json");
        let store = FileStore::open(path).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_file_store_set_get() {
        let (store, _dir) = test_store();
        store.set("k", &Secret::new("v")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().expose(), "v");
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let (store, _dir) = test_store();
        store
            .set_many(&[("a", Secret::new("1")), ("b", Secret::new("2"))])
            .await
            .unwrap();
        let path = store.path().to_path_buf();
        drop(store);

        let reopened = FileStore::open(path).unwrap();
        assert_eq!(reopened.get("a").await.unwrap().unwrap().expose(), "1");
        assert_eq!(reopened.get("b").await.unwrap().unwrap().expose(), "2");
    }

    #[tokio::test]
    async fn test_file_store_delete_many() {
        let (store, _dir) = test_store();
        store
            .set_many(&[
                ("a", Secret::new("1")),
                ("b", Secret::new("2")),
                ("c", Secret::new("3")),
            ])
            .await
            .unwrap();

        store.delete_many(&["a", "b"]).await.unwrap();

        let path = store.path().to_path_buf();
        let reopened = FileStore::open(path).unwrap();
        assert_eq!(reopened.list_keys("").await.unwrap(), vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_delete_missing_is_ok() {
        let (store, _dir) = test_store();
        store.delete("missing").await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_store_concurrent_writes_all_persist() {
        let (store, _dir) = test_store();
        let store = std::sync::Arc::new(store);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.spawn(async move {
                store
                    .set(&format!("key-{}", i), &Secret::new(format!("value-{}", i)))
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let reopened = FileStore::open(store.path().to_path_buf()).unwrap();
        assert_eq!(reopened.list_keys("key-").await.unwrap().len(), 16);
        assert_eq!(
            reopened.get("key-7").await.unwrap().unwrap().expose(),
            "value-7"
        );
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        fs::write(&path, "not json").unwrap();

        let result = FileStore::open(path);
        assert!(matches!(result, Err(StoreError::SerializationError(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (store, _dir) = test_store();
        store.set("k", &Secret::new("v")).await.unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
