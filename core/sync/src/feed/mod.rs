//! Delta feed client.
//!
//! A feed returns the changes of one collection since a cursor, one page at
//! a time. It is a pure network and parsing boundary: no retries, no state.

mod http;
mod memory;

pub use http::{parse_page, HttpDeltaFeed};
pub use memory::{FeedRequest, MemoryFeed};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use salecache_common::{CollectionName, Result};

/// Kind of change carried by a [`DeltaItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    Upsert,
    Delete,
}

/// A single change of a collection.
///
/// `entity` stays untyped at this layer; the merge engine decodes it into
/// the collection's entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaItem {
    pub id: String,
    pub kind: DeltaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl DeltaItem {
    pub fn upsert(
        id: impl Into<String>,
        entity: serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: DeltaKind::Upsert,
            entity: Some(entity),
            updated_at,
        }
    }

    pub fn delete(id: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            kind: DeltaKind::Delete,
            entity: None,
            updated_at,
        }
    }
}

/// One page of changes, ordered by `updated_at` ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaPage {
    pub changes: Vec<DeltaItem>,
    /// Present when the server truncated the result.
    pub next_token: Option<String>,
    /// Authoritative server clock at the time the page was produced.
    pub server_time: DateTime<Utc>,
    /// Items dropped while parsing because they were structurally invalid.
    pub malformed: usize,
}

impl DeltaPage {
    pub fn new(
        changes: Vec<DeltaItem>,
        next_token: Option<String>,
        server_time: DateTime<Utc>,
    ) -> Self {
        Self {
            changes,
            next_token,
            server_time,
            malformed: 0,
        }
    }

    /// Whether more pages follow.
    pub fn has_more(&self) -> bool {
        self.next_token.is_some()
    }
}

/// Source of delta pages for every collection.
#[async_trait]
pub trait DeltaFeed: Send + Sync {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Fetch one page of changes.
    ///
    /// `since = None` requests a full snapshot: every live record as an
    /// upsert and no deletes.
    ///
    /// # Errors
    /// Every failure (network, timeout, HTTP status, malformed envelope) is
    /// `FeedUnavailable`.
    async fn fetch_page(
        &self,
        collection: CollectionName,
        since: Option<DateTime<Utc>>,
        continuation: Option<&str>,
    ) -> Result<DeltaPage>;
}
