//! On-disk envelope for an encrypted collection.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use salecache_common::{Error, Result};

/// Envelope format version.
pub const BLOB_VERSION: u32 = 1;

/// Encrypted payload as persisted for one collection.
///
/// The nonce, ciphertext and Poly1305 tag are kept as separate fields and
/// serialized as base64 inside a small JSON envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBlob {
    /// Envelope format version.
    pub version: u32,
    /// Random nonce used for this seal.
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    /// Encrypted payload without the tag.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// Authentication tag.
    #[serde(with = "b64")]
    pub auth_tag: Vec<u8>,
}

impl EncryptedBlob {
    /// Encode the envelope for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode an envelope read back from storage.
    ///
    /// # Errors
    /// - `CacheCorrupted` if the bytes are not a well-formed envelope or the
    ///   version is unknown
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let blob: EncryptedBlob = serde_json::from_slice(bytes)
            .map_err(|e| Error::CacheCorrupted(format!("Malformed blob envelope: {}", e)))?;

        if blob.version != BLOB_VERSION {
            return Err(Error::CacheCorrupted(format!(
                "Unsupported blob version: {}",
                blob.version
            )));
        }

        Ok(blob)
    }
}

mod b64 {
    use super::*;

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
