//! Sync orchestrator.
//!
//! [`CollectionSync`] owns one collection end to end: it decides between an
//! incremental and a full sync, drives pagination, merges into a private
//! working copy and, only once every page has been merged, persists the
//! result, publishes it and advances the cursor.
//!
//! Readers always see the last published snapshot. Publication replaces an
//! `Arc` in a `watch` channel, so a reader holds either the old or the new
//! snapshot and never anything in between.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::cursor::{CursorRegistry, SyncCursor, SyncStatus};
use crate::feed::DeltaFeed;
use crate::merge::{merge_into, MergeStats};
use crate::retry::RetryExecutor;
use crate::scheduler::SyncTarget;
use crate::snapshot::{CollectionSnapshot, PersistedCollection, PersistedCollectionRef, SyncEntity};
use salecache_common::{CollectionName, Error, Result};
use salecache_storage::EncryptedStore;

/// Which part of the feed a sync asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Changes since the cursor. Falls back to full when never synced.
    Incremental,
    /// Every live record, ignoring the cursor.
    Full,
}

/// Outcome of loading a collection from the encrypted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hydration {
    /// A stored snapshot was restored.
    Loaded { records: usize },
    /// Nothing usable is stored, or no key is installed.
    Empty,
    /// The stored blob was unreadable and has been discarded. A full sync
    /// is needed.
    Reset,
    /// A sync was running; nothing was loaded.
    Skipped,
}

/// Summary of a completed `request_sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub collection: CollectionName,
    pub mode: SyncMode,
    pub pages: usize,
    pub upserts: usize,
    pub deletes: usize,
    pub dropped: usize,
    /// Server clock the cursor was advanced to.
    pub server_time: Option<DateTime<Utc>>,
    /// The call joined a sync that was already running.
    pub coalesced: bool,
}

impl SyncReport {
    fn coalesced(collection: CollectionName, mode: SyncMode, cursor: &SyncCursor) -> Self {
        Self {
            collection,
            mode,
            pages: 0,
            upserts: 0,
            deletes: 0,
            dropped: 0,
            server_time: cursor.last_synced_at,
            coalesced: true,
        }
    }
}

/// Sync orchestrator for one collection of `T`.
pub struct CollectionSync<T> {
    collection: CollectionName,
    feed: Arc<dyn DeltaFeed>,
    store: Arc<EncryptedStore>,
    cursors: Arc<CursorRegistry>,
    published: watch::Sender<Arc<CollectionSnapshot<T>>>,
    /// Held by hydrate, reseal, unload and reset for as long as they own
    /// the syncing flag. With it held, a `syncing` flag belongs to a sync.
    maintenance: Mutex<()>,
    retry: RetryExecutor,
    tombstone_retention: Duration,
}

impl<T: SyncEntity> CollectionSync<T> {
    /// Create an orchestrator publishing an empty snapshot.
    pub fn new(
        collection: CollectionName,
        feed: Arc<dyn DeltaFeed>,
        store: Arc<EncryptedStore>,
        cursors: Arc<CursorRegistry>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            collection,
            feed,
            store,
            cursors,
            published: watch::Sender::new(Arc::new(CollectionSnapshot::empty())),
            maintenance: Mutex::new(()),
            retry: RetryExecutor::new(config.retry_config()),
            tombstone_retention: config.tombstone_retention,
        }
    }

    pub fn collection(&self) -> CollectionName {
        self.collection
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<CollectionSnapshot<T>> {
        self.published.borrow().clone()
    }

    /// Observe published snapshots.
    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<CollectionSnapshot<T>>> {
        self.published.subscribe()
    }

    /// Current sync state.
    pub fn sync_state(&self) -> SyncCursor {
        self.cursors.get(self.collection)
    }

    /// Observe sync state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncCursor> {
        self.cursors.subscribe(self.collection)
    }

    /// Synchronize with the feed.
    ///
    /// # Preconditions
    /// - A session key is installed in the store
    ///
    /// # Postconditions
    /// - On success the new snapshot is persisted, then published, then the
    ///   cursor is committed to the page's server time
    /// - On failure the published snapshot, the stored blob and the cursor
    ///   position are untouched and the status is `error`
    ///
    /// If a sync is already running the call does not start another one; it
    /// waits for the running sync and shares its outcome. A running hydrate,
    /// reseal, unload or reset is waited out first and never joined.
    ///
    /// # Errors
    /// - `FeedUnavailable` once retries are exhausted
    /// - `KeyUnavailable` if the result cannot be persisted for lack of a key
    /// - `SyncFailed` when the joined sync failed
    pub async fn request_sync(&self, mode: SyncMode) -> Result<SyncReport> {
        let c = self.collection;
        let gate = self.maintenance.lock().await;
        let started = self.cursors.begin_sync(c);
        drop(gate);
        if !started {
            debug!("Sync of {} already running, waiting for it", c);
            let cursor = self.cursors.wait_idle(c).await?;
            return match cursor.status {
                SyncStatus::Error => Err(Error::SyncFailed {
                    collection: c.to_string(),
                    message: cursor.last_error.unwrap_or_else(|| "unknown error".to_string()),
                }),
                _ => Ok(SyncReport::coalesced(c, mode, &cursor)),
            };
        }

        let cursor = self.cursors.get(c);
        let since = match mode {
            SyncMode::Full => None,
            SyncMode::Incremental => cursor.last_synced_at,
        };

        match self.run(mode, since, cursor.last_synced_at).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("Sync of {} failed: {}", c, e);
                self.cursors.fail(c, e.to_string());
                Err(e)
            }
        }
    }

    /// Shorthand for a full `request_sync`.
    pub async fn force_full_sync(&self) -> Result<SyncReport> {
        self.request_sync(SyncMode::Full).await
    }

    async fn run(
        &self,
        mode: SyncMode,
        since: Option<DateTime<Utc>>,
        last_synced_at: Option<DateTime<Utc>>,
    ) -> Result<SyncReport> {
        let c = self.collection;
        info!("Syncing {} via {} (since {:?})", c, self.feed.name(), since);

        // A full feed carries no deletes, so it must not start from what we have.
        let mut working = match since {
            None => CollectionSnapshot::empty(),
            Some(_) => (*self.snapshot()).clone(),
        };

        let mut stats = MergeStats::default();
        let mut pages = 0;
        let mut server_time: Option<DateTime<Utc>> = None;
        let mut token: Option<String> = None;

        loop {
            let continuation = token.as_deref();
            let page = self
                .retry
                .execute(|| self.feed.fetch_page(c, since, continuation))
                .await?;

            pages += 1;
            // Every page must be covered by the cursor, so keep the earliest clock
            server_time = Some(match server_time {
                Some(t) => t.min(page.server_time),
                None => page.server_time,
            });
            stats.absorb(merge_into(&mut working, &page));
            debug!("Merged page {} of {} ({} changes)", pages, c, page.changes.len());

            match page.next_token {
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    return Err(Error::FeedUnavailable(format!(
                        "Continuation token '{}' did not advance",
                        next
                    )));
                }
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let server_time =
            server_time.ok_or_else(|| Error::FeedUnavailable("Feed returned no page".to_string()))?;

        if let Some(horizon) = self.tombstone_horizon(server_time) {
            let pruned = working.prune_tombstones(horizon);
            if pruned > 0 {
                debug!("Pruned {} tombstones of {}", pruned, c);
            }
        }

        let committed_at = match last_synced_at {
            Some(current) if current > server_time => current,
            _ => server_time,
        };
        self.persist(&working, Some(committed_at)).await?;

        let records = working.len();
        let tombstones = working.tombstone_count();
        self.published.send_replace(Arc::new(working));
        self.cursors.commit(c, server_time);

        info!(
            "Synced {}: {} pages, {} upserts, {} deletes, {} dropped, {} records, {} tombstones",
            c, pages, stats.upserts, stats.deletes, stats.dropped, records, tombstones
        );

        Ok(SyncReport {
            collection: c,
            mode,
            pages,
            upserts: stats.upserts,
            deletes: stats.deletes,
            dropped: stats.dropped,
            server_time: Some(server_time),
            coalesced: false,
        })
    }

    fn tombstone_horizon(&self, server_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let retention = TimeDelta::from_std(self.tombstone_retention).ok()?;
        server_time.checked_sub_signed(retention)
    }

    async fn persist(
        &self,
        snapshot: &CollectionSnapshot<T>,
        last_synced_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let payload = PersistedCollectionRef {
            collection: self.collection,
            last_synced_at,
            snapshot,
        };
        self.store.save(self.collection, &payload).await
    }

    /// Restore the collection from the encrypted store.
    ///
    /// A missing blob or a missing key leaves the collection empty and never
    /// synced. An unreadable blob is cleared, the cursor is reset and
    /// [`Hydration::Reset`] tells the caller to schedule a full sync.
    ///
    /// # Errors
    /// Storage errors other than a missing or corrupted blob.
    pub async fn hydrate(&self) -> Result<Hydration> {
        let c = self.collection;
        let _gate = self.maintenance.lock().await;
        let previous = self.cursors.get(c);
        if !self.cursors.begin_sync(c) {
            debug!("Skipping hydration of {}: sync running", c);
            return Ok(Hydration::Skipped);
        }

        let loaded = self
            .store
            .load::<PersistedCollection<T>>(c)
            .await
            .and_then(|persisted| {
                if persisted.collection == c {
                    Ok(persisted)
                } else {
                    Err(Error::CacheCorrupted(format!(
                        "Blob of {} holds {}",
                        c, persisted.collection
                    )))
                }
            });

        match loaded {
            Ok(persisted) => {
                let records = persisted.snapshot.len();
                self.published.send_replace(Arc::new(persisted.snapshot));
                match persisted.last_synced_at {
                    Some(at) => self.cursors.commit(c, at),
                    None => self.settle_never_synced(),
                }
                info!("Hydrated {} with {} records", c, records);
                Ok(Hydration::Loaded { records })
            }
            Err(Error::NotFound(_)) => {
                debug!("No stored cache for {}", c);
                self.published.send_replace(Arc::new(CollectionSnapshot::empty()));
                self.settle_never_synced();
                Ok(Hydration::Empty)
            }
            Err(Error::KeyUnavailable) => {
                debug!("No session key, {} starts empty", c);
                self.published.send_replace(Arc::new(CollectionSnapshot::empty()));
                self.settle_never_synced();
                Ok(Hydration::Empty)
            }
            Err(Error::CacheCorrupted(reason)) => {
                warn!("Stored cache for {} is unreadable ({}), resetting", c, reason);
                if let Err(e) = self.store.clear(c).await {
                    warn!("Failed to clear corrupted cache for {}: {}", c, e);
                }
                self.published.send_replace(Arc::new(CollectionSnapshot::empty()));
                self.settle_never_synced();
                Ok(Hydration::Reset)
            }
            Err(e) => {
                self.cursors.release(c, &previous);
                Err(e)
            }
        }
    }

    /// Re-encrypt the published snapshot under the currently installed key.
    ///
    /// Waits for a running sync to finish first.
    pub async fn reseal(&self) -> Result<()> {
        let _gate = self.maintenance.lock().await;
        let previous = self.acquire().await?;
        let snapshot = self.snapshot();
        let result = self.persist(&snapshot, previous.last_synced_at).await;
        self.cursors.release(self.collection, &previous);
        if result.is_ok() {
            debug!("Resealed {}", self.collection);
        }
        result
    }

    /// Drop the in-memory state. The stored blob is kept.
    pub async fn unload(&self) -> Result<()> {
        let _gate = self.maintenance.lock().await;
        self.acquire().await?;
        self.published.send_replace(Arc::new(CollectionSnapshot::empty()));
        self.settle_never_synced();
        Ok(())
    }

    /// Drop both the in-memory state and the stored blob.
    pub async fn reset_local(&self) -> Result<()> {
        let _gate = self.maintenance.lock().await;
        let previous = self.acquire().await?;
        if let Err(e) = self.store.clear(self.collection).await {
            self.cursors.release(self.collection, &previous);
            return Err(e);
        }
        self.published.send_replace(Arc::new(CollectionSnapshot::empty()));
        self.settle_never_synced();
        info!("Cleared local cache of {}", self.collection);
        Ok(())
    }

    /// Take the collection's syncing flag, waiting out a running sync.
    /// Returns the cursor as it was before. Callers hold `maintenance`.
    async fn acquire(&self) -> Result<SyncCursor> {
        loop {
            let previous = self.cursors.wait_idle(self.collection).await?;
            if self.cursors.begin_sync(self.collection) {
                return Ok(previous);
            }
        }
    }

    fn settle_never_synced(&self) {
        self.cursors.reset(self.collection);
        self.cursors
            .release(self.collection, &SyncCursor::never_synced(self.collection));
    }
}

#[async_trait]
impl<T: SyncEntity> SyncTarget for CollectionSync<T> {
    fn collection(&self) -> CollectionName {
        self.collection
    }

    async fn sync(&self, mode: SyncMode) -> Result<SyncReport> {
        self.request_sync(mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{DeltaItem, MemoryFeed};
    use chrono::TimeZone;
    use salecache_crypto::{CacheKey, KEY_LENGTH};
    use salecache_storage::MemoryBlobStore;
    use serde_json::json;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn fixture() -> (Arc<MemoryFeed>, CollectionSync<i64>) {
        let feed = Arc::new(MemoryFeed::new(10));
        let store = Arc::new(EncryptedStore::with_key(
            Arc::new(MemoryBlobStore::new()),
            CacheKey::from_bytes([7; KEY_LENGTH]),
        ));
        let config = CacheConfig {
            max_retries: 0,
            ..CacheConfig::default()
        };
        let sync = CollectionSync::new(
            CollectionName::Sales,
            feed.clone(),
            store,
            Arc::new(CursorRegistry::new()),
            &config,
        );
        (feed, sync)
    }

    #[tokio::test]
    async fn test_never_synced_incremental_is_full() {
        let (feed, sync) = fixture();
        feed.upsert(CollectionName::Sales, "A", json!(1), t(1)).unwrap();

        let report = sync.request_sync(SyncMode::Incremental).await.unwrap();
        assert_eq!(report.upserts, 1);
        assert_eq!(feed.requests().unwrap()[0].since, None);
        assert_eq!(sync.snapshot().get("A"), Some(&1));
    }

    #[tokio::test]
    async fn test_incremental_uses_cursor() {
        let (feed, sync) = fixture();
        feed.set_server_time(t(10)).unwrap();
        sync.request_sync(SyncMode::Incremental).await.unwrap();

        sync.request_sync(SyncMode::Incremental).await.unwrap();
        assert_eq!(feed.requests().unwrap()[1].since, Some(t(10)));
    }

    #[tokio::test]
    async fn test_stuck_continuation_token_fails() {
        let (feed, sync) = fixture();
        // A page whose token points at itself
        struct Stuck;
        #[async_trait]
        impl DeltaFeed for Stuck {
            fn name(&self) -> &str {
                "stuck"
            }
            async fn fetch_page(
                &self,
                _: CollectionName,
                _: Option<DateTime<Utc>>,
                _: Option<&str>,
            ) -> Result<crate::feed::DeltaPage> {
                Ok(crate::feed::DeltaPage::new(
                    vec![DeltaItem::upsert("A", json!(1), t(1))],
                    Some("same".to_string()),
                    t(2),
                ))
            }
        }
        drop(feed);

        let sync = CollectionSync::<i64> {
            feed: Arc::new(Stuck),
            ..sync
        };
        let result = sync.request_sync(SyncMode::Full).await;
        assert!(matches!(result, Err(Error::FeedUnavailable(_))));
        assert_eq!(sync.sync_state().status, SyncStatus::Error);
        assert!(sync.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_sync_without_key_fails_and_keeps_state() {
        let (feed, sync) = fixture();
        feed.upsert(CollectionName::Sales, "A", json!(1), t(1)).unwrap();
        sync.store.discard_key().unwrap();

        let result = sync.request_sync(SyncMode::Full).await;
        assert!(matches!(result, Err(Error::KeyUnavailable)));
        assert!(sync.snapshot().is_empty());
        assert!(sync.sync_state().last_synced_at.is_none());
    }

    #[tokio::test]
    async fn test_hydrate_without_blob_is_empty() {
        let (_feed, sync) = fixture();
        assert_eq!(sync.hydrate().await.unwrap(), Hydration::Empty);
        assert_eq!(sync.sync_state(), SyncCursor::never_synced(CollectionName::Sales));
    }

    #[tokio::test]
    async fn test_hydrate_skipped_while_syncing() {
        let (_feed, sync) = fixture();
        assert!(sync.cursors.begin_sync(CollectionName::Sales));
        assert_eq!(sync.hydrate().await.unwrap(), Hydration::Skipped);
    }

    #[tokio::test]
    async fn test_unload_forgets_memory_only() {
        let (feed, sync) = fixture();
        feed.upsert(CollectionName::Sales, "A", json!(1), t(1)).unwrap();
        sync.request_sync(SyncMode::Full).await.unwrap();

        sync.unload().await.unwrap();
        assert!(sync.snapshot().is_empty());
        assert!(sync.sync_state().last_synced_at.is_none());

        assert_eq!(sync.hydrate().await.unwrap(), Hydration::Loaded { records: 1 });
        assert_eq!(sync.snapshot().get("A"), Some(&1));
        assert_eq!(sync.sync_state().last_synced_at, Some(t(1)));
    }

    #[tokio::test]
    async fn test_tombstones_pruned_past_retention() {
        let (feed, sync) = fixture();
        feed.upsert(CollectionName::Sales, "A", json!(1), t(0)).unwrap();
        feed.set_server_time(t(1)).unwrap();
        sync.request_sync(SyncMode::Full).await.unwrap();

        feed.delete(CollectionName::Sales, "A", t(2)).unwrap();
        feed.set_server_time(t(3)).unwrap();
        sync.request_sync(SyncMode::Incremental).await.unwrap();
        assert_eq!(sync.snapshot().tombstone("A"), Some(t(2)));

        // Two days later the tombstone has aged out
        feed.set_server_time(t(2 * 24 * 3600)).unwrap();
        sync.request_sync(SyncMode::Incremental).await.unwrap();
        assert!(sync.snapshot().tombstone("A").is_none());
    }
}
