//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use salecache_common::CollectionName;

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Session-scoped cache key.
///
/// Held only in memory for the lifetime of a session and never persisted.
/// Collection blobs are not encrypted with this key directly; each collection
/// gets its own subkey via [`CacheKey::collection_key`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CacheKey {
    key: [u8; KEY_LENGTH],
}

impl CacheKey {
    /// Create a cache key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derive the subkey used to encrypt one collection's blob.
    ///
    /// Uses blake2b keyed on the session key and the collection name, so a
    /// blob decrypts only under the collection it was written for.
    pub fn collection_key(&self, collection: CollectionName) -> CollectionKey {
        use blake2::digest::consts::U32;
        use blake2::{Blake2b, Digest};

        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.key);
        hasher.update(collection.as_str().as_bytes());
        hasher.update(b"collectionkey");

        let result = hasher.finalize();
        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&result);
        CollectionKey::from_bytes(derived)
    }

    /// Constant-time equality check.
    pub fn same_as(&self, other: &CacheKey) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey([REDACTED])")
    }
}

/// Key for sealing a single collection's blob.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CollectionKey {
    key: [u8; KEY_LENGTH],
}

impl CollectionKey {
    /// Create a collection key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionKey([REDACTED])")
    }
}
