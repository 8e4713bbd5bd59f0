//! Session key derivation using Argon2id.
//!
//! The cache key is derived from the per-session secret handed over by the
//! authentication layer. Derivation is deterministic for a given secret so a
//! session can reopen the blobs it wrote earlier.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{CacheKey, KEY_LENGTH};
use salecache_common::{Error, Result};

/// Application salt for session key derivation.
///
/// The session secret is already high-entropy and unique per session, so a
/// fixed domain-separation salt is sufficient here.
pub const SESSION_KEY_SALT: &[u8] = b"salecache/session-key/v1";

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for constrained devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Minimal parameters. Only meant for tests.
    pub fn insecure_fast() -> Self {
        Self {
            memory_cost: 64,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::moderate()
    }
}

/// Derive the session cache key from a session secret.
///
/// # Preconditions
/// - `secret` must not be empty
///
/// # Postconditions
/// - Returns a CacheKey that is deterministic for the same secret and params
///
/// # Errors
/// - Returns error if the secret is empty
/// - Returns error if Argon2id parameters are invalid
///
/// # Security
/// - The secret is not stored or logged
pub fn derive_session_key(secret: &[u8], params: &KdfParams) -> Result<CacheKey> {
    if secret.is_empty() {
        return Err(Error::InvalidInput(
            "Session secret cannot be empty".to_string(),
        ));
    }

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(secret, SESSION_KEY_SALT, &mut key_bytes)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(CacheKey::from_bytes(key_bytes))
}
