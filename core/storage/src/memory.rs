//! In-memory blob store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::provider::BlobStore;
use salecache_common::{Error, Result, StoreKey};

/// In-memory blob store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    storage: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite raw bytes, bypassing any encryption layer.
    pub fn put_raw(&self, key: &StoreKey, data: Vec<u8>) -> Result<()> {
        self.storage
            .write()
            .map_err(|_| poisoned())?
            .insert(key.as_str().to_string(), data);
        Ok(())
    }

    /// Get raw bytes as stored.
    pub fn get_raw(&self, key: &StoreKey) -> Result<Option<Vec<u8>>> {
        Ok(self
            .storage
            .read()
            .map_err(|_| poisoned())?
            .get(key.as_str())
            .cloned())
    }
}

fn poisoned() -> Error {
    Error::Storage("Memory store lock poisoned".to_string())
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, key: &StoreKey) -> Result<Vec<u8>> {
        self.get_raw(key)?
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", key)))
    }

    async fn write(&self, key: &StoreKey, data: Vec<u8>) -> Result<()> {
        self.put_raw(key, data)
    }

    async fn remove(&self, key: &StoreKey) -> Result<()> {
        self.storage
            .write()
            .map_err(|_| poisoned())?
            .remove(key.as_str());
        Ok(())
    }

    async fn exists(&self, key: &StoreKey) -> Result<bool> {
        Ok(self
            .storage
            .read()
            .map_err(|_| poisoned())?
            .contains_key(key.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StoreKey {
        StoreKey::new("cache:sales").unwrap()
    }

    #[tokio::test]
    async fn test_write_read() {
        let store = MemoryBlobStore::new();
        store.write(&key(), b"Hello".to_vec()).await.unwrap();
        assert_eq!(store.read(&key()).await.unwrap(), b"Hello");
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let store = MemoryBlobStore::new();
        assert!(matches!(store.read(&key()).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_overwrite_and_remove() {
        let store = MemoryBlobStore::new();
        store.write(&key(), vec![1]).await.unwrap();
        store.write(&key(), vec![2]).await.unwrap();
        assert_eq!(store.read(&key()).await.unwrap(), vec![2]);

        store.remove(&key()).await.unwrap();
        assert!(!store.exists(&key()).await.unwrap());

        // Removing twice is fine
        store.remove(&key()).await.unwrap();
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let store = MemoryBlobStore::new();
        let other = store.clone();
        store.write(&key(), vec![7]).await.unwrap();
        assert_eq!(other.get_raw(&key()).unwrap(), Some(vec![7]));
    }
}
