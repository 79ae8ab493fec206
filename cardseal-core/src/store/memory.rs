//! In-memory secret storage implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{Secret, SecretStore, StoreError};

/// In-memory secret store for testing and development.
///
/// This store is not persistent; data is lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads. Batch operations take the write lock once,
/// so readers never observe half of a batch.
pub struct MemoryStore {
    data: RwLock<HashMap<String, Secret>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Create a memory store with initial data.
    pub fn with_data(data: HashMap<String, Secret>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Copy out the raw stored value, bypassing the trait.
    ///
    /// Lets tests inspect exactly what a backend received.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.data.read().get(key).map(|s| s.expose().to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys_count", &self.data.read().len())
            .finish()
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.data.write().insert(key.to_string(), secret.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let keys: Vec<String> = self
            .data
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(keys)
    }

    async fn set_many(&self, entries: &[(&str, Secret)]) -> Result<(), StoreError> {
        let mut data = self.data.write();
        for (key, secret) in entries {
            data.insert(key.to_string(), secret.clone());
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut data = self.data.write();
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_set_get() {
        let store = MemoryStore::new();
        let secret = Secret::new("test-value");

        store.set("test-key", &secret).await.unwrap();
        let retrieved = store.get("test-key").await.unwrap();

        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().expose(), "test-value");
    }

    #[tokio::test]
    async fn test_memory_store_get_nonexistent() {
        let store = MemoryStore::new();
        let result = store.get("nonexistent").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_delete() {
        let store = MemoryStore::new();
        let secret = Secret::new("test-value");

        store.set("test-key", &secret).await.unwrap();
        store.delete("test-key").await.unwrap();

        let result = store.get("test-key").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_memory_store_list_keys() {
        let store = MemoryStore::new();

        store
            .set("cardseal/access_token", &Secret::new("t1"))
            .await
            .unwrap();
        store
            .set("cardseal/refresh_token", &Secret::new("t2"))
            .await
            .unwrap();
        store.set("other/key", &Secret::new("t3")).await.unwrap();

        let keys = store.list_keys("cardseal/").await.unwrap();
        assert_eq!(keys.len(), 2);

        let all_keys = store.list_keys("").await.unwrap();
        assert_eq!(all_keys.len(), 3);
    }

    #[tokio::test]
    async fn test_memory_store_delete_many_leaves_others() {
        let store = MemoryStore::new();
        store
            .set_many(&[
                ("a", Secret::new("1")),
                ("b", Secret::new("2")),
                ("c", Secret::new("3")),
            ])
            .await
            .unwrap();

        store.delete_many(&["a", "b"]).await.unwrap();

        assert_eq!(store.list_keys("").await.unwrap(), vec!["c".to_string()]);
        assert_eq!(store.raw("c").as_deref(), Some("3"));
    }
}
