//! Per-collection sync bookkeeping.
//!
//! One [`SyncCursor`] per collection lives in a `watch` channel for the
//! lifetime of the process. Every transition is a single atomic modify on
//! that channel, which also makes the cursor observable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use salecache_common::{CollectionName, Error, Result};

/// Sync status of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// No sync running.
    Idle,
    /// A sync is in flight.
    Syncing,
    /// The last sync failed. Sticky until the next attempt.
    Error,
}

/// How far a collection has been synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub collection: CollectionName,
    /// `None` means never synced; the next sync will be a full one.
    pub last_synced_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub last_error: Option<String>,
}

impl SyncCursor {
    /// Cursor of a collection that has never been synced.
    pub fn never_synced(collection: CollectionName) -> Self {
        Self {
            collection,
            last_synced_at: None,
            status: SyncStatus::Idle,
            last_error: None,
        }
    }

    /// Whether a sync is running.
    pub fn is_syncing(&self) -> bool {
        self.status == SyncStatus::Syncing
    }
}

/// Registry of sync cursors, one per collection.
pub struct CursorRegistry {
    sales: watch::Sender<SyncCursor>,
    buyers: watch::Sender<SyncCursor>,
    producers: watch::Sender<SyncCursor>,
}

impl CursorRegistry {
    /// Create a registry with every collection never synced.
    pub fn new() -> Self {
        let slot = |c| watch::Sender::new(SyncCursor::never_synced(c));
        Self {
            sales: slot(CollectionName::Sales),
            buyers: slot(CollectionName::Buyers),
            producers: slot(CollectionName::Producers),
        }
    }

    fn slot(&self, collection: CollectionName) -> &watch::Sender<SyncCursor> {
        match collection {
            CollectionName::Sales => &self.sales,
            CollectionName::Buyers => &self.buyers,
            CollectionName::Producers => &self.producers,
        }
    }

    /// Current cursor of `collection`.
    pub fn get(&self, collection: CollectionName) -> SyncCursor {
        self.slot(collection).borrow().clone()
    }

    /// Observe cursor changes of `collection`.
    pub fn subscribe(&self, collection: CollectionName) -> watch::Receiver<SyncCursor> {
        self.slot(collection).subscribe()
    }

    /// Atomically move `idle`/`error` to `syncing`.
    ///
    /// Returns `false` if a sync is already running; the caller must not
    /// start another one.
    pub fn begin_sync(&self, collection: CollectionName) -> bool {
        self.slot(collection).send_if_modified(|cursor| {
            if cursor.status == SyncStatus::Syncing {
                false
            } else {
                cursor.status = SyncStatus::Syncing;
                true
            }
        })
    }

    /// Finish a sync successfully.
    ///
    /// The cursor only moves forward: an older `synced_at` leaves
    /// `last_synced_at` unchanged.
    pub fn commit(&self, collection: CollectionName, synced_at: DateTime<Utc>) {
        self.slot(collection).send_modify(|cursor| {
            cursor.status = SyncStatus::Idle;
            cursor.last_error = None;
            cursor.last_synced_at = Some(match cursor.last_synced_at {
                Some(current) if current > synced_at => current,
                _ => synced_at,
            });
        });
        debug!("Cursor for {} committed at {}", collection, synced_at);
    }

    /// Finish a sync with an error. Progress already made is kept.
    pub fn fail(&self, collection: CollectionName, error: impl Into<String>) {
        let error = error.into();
        self.slot(collection).send_modify(|cursor| {
            cursor.status = SyncStatus::Error;
            cursor.last_error = Some(error);
        });
    }

    /// Leave `syncing` without touching progress or error state.
    ///
    /// `previous` is the cursor observed before the matching `begin_sync`.
    pub fn release(&self, collection: CollectionName, previous: &SyncCursor) {
        self.slot(collection).send_modify(|cursor| {
            cursor.status = previous.status;
            cursor.last_error = previous.last_error.clone();
        });
    }

    /// Forget all progress of `collection`, forcing a full sync next time.
    ///
    /// Used when the stored cache is lost or unreadable. A running sync keeps
    /// its `syncing` status.
    pub fn reset(&self, collection: CollectionName) {
        self.slot(collection).send_modify(|cursor| {
            cursor.last_synced_at = None;
            if cursor.status != SyncStatus::Syncing {
                cursor.status = SyncStatus::Idle;
                cursor.last_error = None;
            }
        });
    }

    /// Wait until no sync is running for `collection` and return the cursor.
    pub async fn wait_idle(&self, collection: CollectionName) -> Result<SyncCursor> {
        let mut rx = self.subscribe(collection);
        let cursor = rx
            .wait_for(|cursor| cursor.status != SyncStatus::Syncing)
            .await
            .map(|cursor| cursor.clone())
            .map_err(|_| Error::SyncFailed {
                collection: collection.to_string(),
                message: "cursor registry closed".to_string(),
            })?;
        Ok(cursor)
    }
}

impl Default for CursorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
