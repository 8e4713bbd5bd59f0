//! Common types used throughout the cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

/// One of the server-owned collections mirrored by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionName {
    Sales,
    Buyers,
    Producers,
}

impl CollectionName {
    /// Every collection, in a stable order.
    pub const ALL: [CollectionName; 3] = [
        CollectionName::Sales,
        CollectionName::Buyers,
        CollectionName::Producers,
    ];

    /// The identifier used on the wire and in store keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionName::Sales => "sales",
            CollectionName::Buyers => "buyers",
            CollectionName::Producers => "producers",
        }
    }

    /// The key under which this collection's blob is persisted.
    pub fn store_key(&self) -> StoreKey {
        StoreKey(format!("cache:{}", self.as_str()))
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionName {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sales" => Ok(CollectionName::Sales),
            "buyers" => Ok(CollectionName::Buyers),
            "producers" => Ok(CollectionName::Producers),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown collection: {}",
                other
            ))),
        }
    }
}

/// Stable key naming a blob in the persistent medium.
///
/// Keys look like `cache:sales`. They never contain path separators, so any
/// backend can map them onto its own namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey(String);

impl StoreKey {
    /// Create a new StoreKey from a string.
    ///
    /// # Errors
    /// - Returns error if the key is empty or contains a path separator
    pub fn new(key: impl Into<String>) -> crate::Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(crate::Error::InvalidInput(
                "StoreKey cannot be empty".to_string(),
            ));
        }
        if key.contains('/') || key.contains('\\') {
            return Err(crate::Error::InvalidInput(
                "StoreKey cannot contain separators".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as raw bytes, e.g. for use as associated data.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SensitiveBytes {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_store_keys() {
        assert_eq!(CollectionName::Sales.store_key().as_str(), "cache:sales");
        assert_eq!(CollectionName::Buyers.store_key().as_str(), "cache:buyers");
        assert_eq!(
            CollectionName::Producers.store_key().as_str(),
            "cache:producers"
        );
    }

    #[test]
    fn test_collection_parse() {
        assert_eq!("Sales".parse::<CollectionName>().unwrap(), CollectionName::Sales);
        assert_eq!(" buyers ".parse::<CollectionName>().unwrap(), CollectionName::Buyers);
        assert!("invoices".parse::<CollectionName>().is_err());
    }

    #[test]
    fn test_collection_serde_lowercase() {
        let json = serde_json::to_string(&CollectionName::Producers).unwrap();
        assert_eq!(json, "\"producers\"");
    }

    #[test]
    fn test_store_key_validation() {
        assert!(StoreKey::new("").is_err());
        assert!(StoreKey::new("cache/sales").is_err());
        assert_eq!(StoreKey::new("cache:x").unwrap().as_str(), "cache:x");
    }

    #[test]
    fn test_sensitive_bytes_debug_redacted() {
        let secret = SensitiveBytes::from("hunter2".to_string());
        assert_eq!(format!("{:?}", secret), "SensitiveBytes([REDACTED; 7 bytes])");
    }
}
