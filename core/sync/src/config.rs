//! Cache and feed configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryConfig;
use salecache_common::{Error, Result};
use salecache_crypto::KdfParams;

/// Tunables for the sync cache.
///
/// Durations are written as milliseconds in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Upper bound for a single page fetch, including reading the body.
    #[serde(with = "duration_ms", rename = "pageTimeoutMs")]
    pub page_timeout: Duration,
    /// Retries of a failed page fetch before the sync is failed.
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(with = "duration_ms", rename = "retryInitialDelayMs")]
    pub retry_initial_delay: Duration,
    /// Cap for the exponential retry delay.
    #[serde(with = "duration_ms", rename = "retryMaxDelayMs")]
    pub retry_max_delay: Duration,
    /// How long tombstones are kept after their deletion time.
    #[serde(with = "duration_ms", rename = "tombstoneRetentionMs")]
    pub tombstone_retention: Duration,
    /// Period of the background scheduler. `None` disables it.
    #[serde(with = "option_duration_ms", rename = "syncIntervalMs")]
    pub sync_interval: Option<Duration>,
    /// Session key derivation parameters.
    pub kdf: KdfParams,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_initial_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
            tombstone_retention: Duration::from_secs(24 * 60 * 60),
            sync_interval: None,
            kdf: KdfParams::default(),
        }
    }
}

impl CacheConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the cache misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.page_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "pageTimeoutMs must be greater than zero".to_string(),
            ));
        }
        if matches!(self.sync_interval, Some(interval) if interval.is_zero()) {
            return Err(Error::InvalidInput(
                "syncIntervalMs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy applied to page fetches.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .with_initial_delay(self.retry_initial_delay)
            .with_max_delay(self.retry_max_delay)
    }
}

/// Location of the remote sync endpoints.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEndpoint {
    /// Base URL; collection feeds live at `{base_url}/sync/{collection}`.
    pub base_url: String,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl FeedEndpoint {
    /// Endpoint without authentication.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: None,
        }
    }

    /// Attach a bearer token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

impl fmt::Debug for FeedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedEndpoint")
            .field("base_url", &self.base_url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_takes_defaults() {
        let config =
            CacheConfig::from_json(r#"{"maxRetries": 5, "syncIntervalMs": 60000}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.sync_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.page_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_json_roundtrip_uses_millis() {
        let config = CacheConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["pageTimeoutMs"], 30_000);
        assert_eq!(json["syncIntervalMs"], serde_json::Value::Null);

        let back: CacheConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(CacheConfig::from_json(r#"{"pageTimeoutMs": 0}"#).is_err());
        assert!(CacheConfig::from_json(r#"{"syncIntervalMs": 0}"#).is_err());
    }

    #[test]
    fn test_endpoint_debug_redacts_token() {
        let endpoint = FeedEndpoint::new("https://api.example.com").with_bearer_token("s3cr3t");
        let debug = format!("{:?}", endpoint);
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("REDACTED"));
    }
}
