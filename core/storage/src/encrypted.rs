//! Encrypted store wrapping any [`BlobStore`].
//!
//! Payloads are canonicalized to JSON with stable key ordering, sealed with
//! the collection's subkey and written as an [`EncryptedBlob`] envelope under
//! the collection's store key. The store key doubles as associated data.
//!
//! Any failure to open a stored blob (bad envelope, tag mismatch, wrong key,
//! undecodable payload) surfaces as `CacheCorrupted`; a missing blob is
//! `NotFound`. The two are never conflated.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::provider::BlobStore;
use salecache_common::{CollectionName, Error, Result};
use salecache_crypto::{aead, CacheKey, CollectionKey, EncryptedBlob};

/// Transparent encryption layer over a blob store.
pub struct EncryptedStore {
    backend: Arc<dyn BlobStore>,
    key: RwLock<Option<CacheKey>>,
}

impl EncryptedStore {
    /// Create a store with no key installed.
    pub fn new(backend: Arc<dyn BlobStore>) -> Self {
        Self {
            backend,
            key: RwLock::new(None),
        }
    }

    /// Create a store with `key` already installed.
    pub fn with_key(backend: Arc<dyn BlobStore>, key: CacheKey) -> Self {
        Self {
            backend,
            key: RwLock::new(Some(key)),
        }
    }

    /// The underlying medium.
    pub fn backend(&self) -> &Arc<dyn BlobStore> {
        &self.backend
    }

    /// Install the session key, replacing (and zeroizing) any previous one.
    pub fn install_key(&self, key: CacheKey) -> Result<()> {
        *self.key.write().map_err(|_| poisoned())? = Some(key);
        Ok(())
    }

    /// Drop the session key. Subsequent loads and saves fail with
    /// `KeyUnavailable` until a new key is installed.
    pub fn discard_key(&self) -> Result<()> {
        *self.key.write().map_err(|_| poisoned())? = None;
        Ok(())
    }

    /// Whether a session key is installed.
    pub fn has_key(&self) -> bool {
        self.key.read().map(|k| k.is_some()).unwrap_or(false)
    }

    /// Whether the installed key equals `other`.
    pub fn key_matches(&self, other: &CacheKey) -> bool {
        self.key
            .read()
            .map(|k| k.as_ref().is_some_and(|k| k.same_as(other)))
            .unwrap_or(false)
    }

    fn collection_key(&self, collection: CollectionName) -> Result<CollectionKey> {
        let guard = self.key.read().map_err(|_| poisoned())?;
        guard
            .as_ref()
            .map(|k| k.collection_key(collection))
            .ok_or(Error::KeyUnavailable)
    }

    /// Load and decrypt the payload stored for `collection`.
    ///
    /// # Errors
    /// - `NotFound` if nothing is stored
    /// - `KeyUnavailable` if no session key is installed
    /// - `CacheCorrupted` if the blob cannot be opened or decoded
    pub async fn load<T: DeserializeOwned>(&self, collection: CollectionName) -> Result<T> {
        let key = self.collection_key(collection)?;
        let store_key = collection.store_key();

        let bytes = self.backend.read(&store_key).await?;
        let blob = EncryptedBlob::from_bytes(&bytes)?;

        let plaintext = aead::open(&key, &blob, store_key.as_bytes()).map_err(|e| {
            warn!("Integrity check failed for {}", store_key);
            Error::CacheCorrupted(e.to_string())
        })?;

        let payload = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::CacheCorrupted(format!("Undecodable payload: {}", e)))?;

        debug!("Loaded {} ({} bytes)", store_key, bytes.len());
        Ok(payload)
    }

    /// Encrypt and persist `payload` for `collection`, overwriting in place.
    ///
    /// # Errors
    /// - `KeyUnavailable` if no session key is installed
    /// - Serialization or storage errors
    pub async fn save<T: Serialize>(&self, collection: CollectionName, payload: &T) -> Result<()> {
        let key = self.collection_key(collection)?;
        let store_key = collection.store_key();

        let plaintext = canonical_json(payload)?;
        let blob = aead::seal(&key, &plaintext, store_key.as_bytes())?;
        let bytes = blob.to_bytes()?;

        debug!("Saving {} ({} bytes)", store_key, bytes.len());
        self.backend.write(&store_key, bytes).await
    }

    /// Remove the stored blob for `collection`.
    pub async fn clear(&self, collection: CollectionName) -> Result<()> {
        self.backend.remove(&collection.store_key()).await
    }
}

/// Serialize with stable key ordering.
///
/// Going through `serde_json::Value` sorts every object's keys, so logically
/// identical payloads always produce identical plaintext.
pub fn canonical_json<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(payload)?;
    Ok(serde_json::to_vec(&value)?)
}

fn poisoned() -> Error {
    Error::Storage("Key lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobStore;
    use salecache_crypto::KEY_LENGTH;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        items: Vec<u32>,
    }

    fn payload() -> Payload {
        Payload {
            name: "sales".to_string(),
            items: vec![1, 2, 3],
        }
    }

    fn store_with(byte: u8, backend: &MemoryBlobStore) -> EncryptedStore {
        EncryptedStore::with_key(
            Arc::new(backend.clone()),
            CacheKey::from_bytes([byte; KEY_LENGTH]),
        )
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let backend = MemoryBlobStore::new();
        let store = store_with(1, &backend);

        store.save(CollectionName::Sales, &payload()).await.unwrap();
        let loaded: Payload = store.load(CollectionName::Sales).await.unwrap();
        assert_eq!(loaded, payload());
    }

    #[tokio::test]
    async fn test_stored_bytes_are_not_plaintext() {
        let backend = MemoryBlobStore::new();
        let store = store_with(1, &backend);
        store.save(CollectionName::Sales, &payload()).await.unwrap();

        let raw = backend
            .get_raw(&CollectionName::Sales.store_key())
            .unwrap()
            .unwrap();
        let raw = String::from_utf8_lossy(&raw);
        assert!(!raw.contains("sales"));
    }

    #[tokio::test]
    async fn test_missing_is_not_found() {
        let backend = MemoryBlobStore::new();
        let store = store_with(1, &backend);
        let result: Result<Payload> = store.load(CollectionName::Buyers).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_wrong_key_is_corruption() {
        let backend = MemoryBlobStore::new();
        store_with(1, &backend)
            .save(CollectionName::Sales, &payload())
            .await
            .unwrap();

        let result: Result<Payload> = store_with(2, &backend).load(CollectionName::Sales).await;
        assert!(matches!(result, Err(Error::CacheCorrupted(_))));
    }

    #[tokio::test]
    async fn test_blob_moved_between_collections_is_corruption() {
        let backend = MemoryBlobStore::new();
        let store = store_with(1, &backend);
        store.save(CollectionName::Sales, &payload()).await.unwrap();

        let raw = backend
            .get_raw(&CollectionName::Sales.store_key())
            .unwrap()
            .unwrap();
        backend
            .put_raw(&CollectionName::Buyers.store_key(), raw)
            .unwrap();

        let result: Result<Payload> = store.load(CollectionName::Buyers).await;
        assert!(matches!(result, Err(Error::CacheCorrupted(_))));
    }

    #[tokio::test]
    async fn test_garbage_bytes_are_corruption() {
        let backend = MemoryBlobStore::new();
        backend
            .put_raw(&CollectionName::Sales.store_key(), b"garbage".to_vec())
            .unwrap();

        let result: Result<Payload> = store_with(1, &backend).load(CollectionName::Sales).await;
        assert!(matches!(result, Err(Error::CacheCorrupted(_))));
    }

    #[tokio::test]
    async fn test_no_key_is_key_unavailable() {
        let backend = MemoryBlobStore::new();
        let store = EncryptedStore::new(Arc::new(backend));

        assert!(!store.has_key());
        assert!(matches!(
            store.save(CollectionName::Sales, &payload()).await,
            Err(Error::KeyUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_discard_key() {
        let backend = MemoryBlobStore::new();
        let store = store_with(1, &backend);
        store.save(CollectionName::Sales, &payload()).await.unwrap();

        store.discard_key().unwrap();
        let result: Result<Payload> = store.load(CollectionName::Sales).await;
        assert!(matches!(result, Err(Error::KeyUnavailable)));

        store.install_key(CacheKey::from_bytes([1; KEY_LENGTH])).unwrap();
        let loaded: Payload = store.load(CollectionName::Sales).await.unwrap();
        assert_eq!(loaded, payload());
    }

    #[tokio::test]
    async fn test_clear() {
        let backend = MemoryBlobStore::new();
        let store = store_with(1, &backend);
        store.save(CollectionName::Sales, &payload()).await.unwrap();
        store.clear(CollectionName::Sales).await.unwrap();

        let result: Result<Payload> = store.load(CollectionName::Sales).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let mut a = HashMap::new();
        a.insert("zeta", 1);
        a.insert("alpha", 2);
        a.insert("mid", 3);

        let bytes = canonical_json(&a).unwrap();
        assert_eq!(bytes, br#"{"alpha":2,"mid":3,"zeta":1}"#.to_vec());
    }
}
