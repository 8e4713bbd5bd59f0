//! Blob store trait definition.

use async_trait::async_trait;

use salecache_common::{Result, StoreKey};

/// Raw key-value medium holding one opaque blob per key.
///
/// Implementations must make `write` atomic: a concurrent or subsequent
/// `read` sees either the previous bytes or the new bytes, never a mix.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the backend name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Read the blob stored under `key`.
    ///
    /// # Errors
    /// - `NotFound` if nothing is stored under `key`
    /// - I/O errors
    async fn read(&self, key: &StoreKey) -> Result<Vec<u8>>;

    /// Store `data` under `key`, replacing any previous blob.
    async fn write(&self, key: &StoreKey, data: Vec<u8>) -> Result<()>;

    /// Remove the blob under `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &StoreKey) -> Result<()>;

    /// Check if a blob exists under `key`.
    async fn exists(&self, key: &StoreKey) -> Result<bool>;
}
