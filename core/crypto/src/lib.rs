//! Cryptographic primitives for the encrypted sync cache.
//!
//! This module provides:
//! - Session key derivation using Argon2id
//! - Per-collection subkeys derived with BLAKE2b
//! - Authenticated encryption using XChaCha20-Poly1305
//! - The `EncryptedBlob` envelope persisted for each collection
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - A fresh random nonce is generated for every seal

pub mod aead;
pub mod blob;
pub mod kdf;
pub mod keys;

pub use aead::{open, seal};
pub use blob::EncryptedBlob;
pub use kdf::{derive_session_key, KdfParams};
pub use keys::{CacheKey, CollectionKey, KEY_LENGTH};
