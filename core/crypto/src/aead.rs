//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::blob::{EncryptedBlob, BLOB_VERSION};
use crate::keys::CollectionKey;
use salecache_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` into a fresh [`EncryptedBlob`].
///
/// # Postconditions
/// - The nonce is randomly generated for every call
/// - `aad` is authenticated but not stored; the same value must be passed
///   to [`open`]
///
/// # Errors
/// - Returns error if encryption fails
pub fn seal(key: &CollectionKey, plaintext: &[u8], aad: &[u8]) -> Result<EncryptedBlob> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut sealed = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    // The cipher appends the tag to the ciphertext
    let auth_tag = sealed.split_off(sealed.len() - TAG_SIZE);

    Ok(EncryptedBlob {
        version: BLOB_VERSION,
        iv: nonce.to_vec(),
        ciphertext: sealed,
        auth_tag,
    })
}

/// Decrypt and verify an [`EncryptedBlob`].
///
/// # Errors
/// - Returns error if the nonce or tag have the wrong length
/// - Returns error if authentication fails (wrong key, wrong `aad`, or
///   tampered data); nothing is returned in that case
pub fn open(key: &CollectionKey, blob: &EncryptedBlob, aad: &[u8]) -> Result<Vec<u8>> {
    if blob.iv.len() != NONCE_SIZE {
        return Err(Error::Crypto(format!(
            "Invalid nonce length: expected {}, got {}",
            NONCE_SIZE,
            blob.iv.len()
        )));
    }

    if blob.auth_tag.len() != TAG_SIZE {
        return Err(Error::Crypto(format!(
            "Invalid tag length: expected {}, got {}",
            TAG_SIZE,
            blob.auth_tag.len()
        )));
    }

    let mut sealed = Vec::with_capacity(blob.ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(&blob.ciphertext);
    sealed.extend_from_slice(&blob.auth_tag);

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = GenericArray::from_slice(&blob.iv);

    cipher
        .decrypt(nonce, Payload { msg: &sealed, aad })
        .map_err(|e| Error::Crypto(format!("Decryption failed: {}", e)))
}
