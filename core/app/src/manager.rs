//! Cache manager: owns the store, the cursors and the three collections, and
//! drives the session key lifecycle.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::entities::{Buyer, Entity, Producer, Sale};
use crate::facades::{BuyersCache, CollectionCache, ProducersCache, SalesCache};
use crate::session::{SessionHandle, SessionReport};
use salecache_common::{CollectionName, Error, Result, SensitiveBytes};
use salecache_crypto::{derive_session_key, CacheKey, KdfParams};
use salecache_storage::{BlobStore, EncryptedStore};
use salecache_sync::{
    CacheConfig, CollectionSync, CursorRegistry, DeltaFeed, FeedEndpoint, Hydration, HttpDeltaFeed,
    SyncCursor, SyncMode, SyncReport, SyncRequest, SyncScheduler, SyncTarget,
};

/// Snapshot of one collection's state, for status displays.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatus {
    pub collection: CollectionName,
    pub records: usize,
    pub cursor: SyncCursor,
}

/// Type-erased lifecycle operations of a collection.
#[async_trait]
trait ManagedCollection: Send + Sync {
    fn name(&self) -> CollectionName;
    fn records(&self) -> usize;
    fn state(&self) -> SyncCursor;
    async fn run_sync(&self, mode: SyncMode) -> Result<SyncReport>;
    async fn hydrate(&self) -> Result<Hydration>;
    async fn reseal(&self) -> Result<()>;
    async fn unload(&self) -> Result<()>;
    async fn reset_local(&self) -> Result<()>;
}

#[async_trait]
impl<T: Entity> ManagedCollection for CollectionSync<T> {
    fn name(&self) -> CollectionName {
        self.collection()
    }

    fn records(&self) -> usize {
        self.snapshot().len()
    }

    fn state(&self) -> SyncCursor {
        self.sync_state()
    }

    async fn run_sync(&self, mode: SyncMode) -> Result<SyncReport> {
        self.request_sync(mode).await
    }

    async fn hydrate(&self) -> Result<Hydration> {
        CollectionSync::hydrate(self).await
    }

    async fn reseal(&self) -> Result<()> {
        CollectionSync::reseal(self).await
    }

    async fn unload(&self) -> Result<()> {
        CollectionSync::unload(self).await
    }

    async fn reset_local(&self) -> Result<()> {
        CollectionSync::reset_local(self).await
    }
}

/// Entry point of the sync cache.
///
/// Until [`begin_session`](Self::begin_session) installs a key, collections
/// are empty and syncs fail with `KeyUnavailable`.
pub struct CacheManager {
    store: Arc<EncryptedStore>,
    config: CacheConfig,
    sales: SalesCache,
    buyers: BuyersCache,
    producers: ProducersCache,
    /// Serializes session transitions.
    session: tokio::sync::Mutex<Option<SessionHandle>>,
    scheduler: Mutex<Option<SyncScheduler>>,
}

impl CacheManager {
    /// Create a manager over `backend`, fed by `feed`.
    ///
    /// # Errors
    /// `InvalidInput` if `config` is invalid.
    pub fn new(
        backend: Arc<dyn BlobStore>,
        feed: Arc<dyn DeltaFeed>,
        config: CacheConfig,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(EncryptedStore::new(backend));
        let cursors = Arc::new(CursorRegistry::new());

        let sales = Self::collection::<Sale>(&feed, &store, &cursors, &config);
        let buyers = Self::collection::<Buyer>(&feed, &store, &cursors, &config);
        let producers = Self::collection::<Producer>(&feed, &store, &cursors, &config);

        Ok(Self {
            store,
            config,
            sales,
            buyers,
            producers,
            session: tokio::sync::Mutex::new(None),
            scheduler: Mutex::new(None),
        })
    }

    /// Create a manager fed by the HTTP endpoints at `endpoint`.
    pub fn with_http(
        backend: Arc<dyn BlobStore>,
        endpoint: &FeedEndpoint,
        config: CacheConfig,
    ) -> Result<Self> {
        let feed = Arc::new(HttpDeltaFeed::new(endpoint, config.page_timeout)?);
        Self::new(backend, feed, config)
    }

    fn collection<T: Entity>(
        feed: &Arc<dyn DeltaFeed>,
        store: &Arc<EncryptedStore>,
        cursors: &Arc<CursorRegistry>,
        config: &CacheConfig,
    ) -> CollectionCache<T> {
        CollectionCache::new(Arc::new(CollectionSync::new(
            T::COLLECTION,
            feed.clone(),
            store.clone(),
            cursors.clone(),
            config,
        )))
    }

    pub fn sales(&self) -> &SalesCache {
        &self.sales
    }

    pub fn buyers(&self) -> &BuyersCache {
        &self.buyers
    }

    pub fn producers(&self) -> &ProducersCache {
        &self.producers
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn managed(&self, collection: CollectionName) -> Arc<dyn ManagedCollection> {
        match collection {
            CollectionName::Sales => self.sales.orchestrator().clone(),
            CollectionName::Buyers => self.buyers.orchestrator().clone(),
            CollectionName::Producers => self.producers.orchestrator().clone(),
        }
    }

    fn all_managed(&self) -> Vec<Arc<dyn ManagedCollection>> {
        CollectionName::ALL.iter().map(|c| self.managed(*c)).collect()
    }

    /// Handle of the active session, if any.
    pub async fn session(&self) -> Option<SessionHandle> {
        self.session.lock().await.clone()
    }

    /// Start a session: derive the key from `secret`, install it and restore
    /// every collection from the store.
    ///
    /// # Preconditions
    /// - No session is active
    ///
    /// # Postconditions
    /// - The key is installed and readable collections are published
    /// - Collections whose stored cache could not be opened are reset and a
    ///   full sync is started for them in the background
    ///
    /// # Errors
    /// - `InvalidInput` if a session is already active or `secret` is empty
    /// - Storage errors while loading
    pub async fn begin_session(&self, secret: SensitiveBytes) -> Result<SessionReport> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(Error::InvalidInput("A session is already active".to_string()));
        }

        let key = derive_key(secret, self.config.kdf.clone()).await?;
        self.store.install_key(key)?;

        let hydration = match self.hydrate_all().await {
            Ok(hydration) => hydration,
            Err(e) => {
                self.store.discard_key()?;
                if let Err(unload) = self.unload_all().await {
                    warn!("Failed to unload after aborted session start: {}", unload);
                }
                return Err(e);
            }
        };

        let handle = SessionHandle::new();
        info!("Cache session {} started", handle.as_str());
        *session = Some(handle.clone());

        Ok(SessionReport { handle, hydration })
    }

    async fn hydrate_all(&self) -> Result<BTreeMap<CollectionName, Hydration>> {
        let mut hydration = BTreeMap::new();
        for managed in self.all_managed() {
            let outcome = managed.hydrate().await?;
            if outcome == Hydration::Reset {
                spawn_full_sync(managed.clone());
            }
            hydration.insert(managed.name(), outcome);
        }
        Ok(hydration)
    }

    async fn unload_all(&self) -> Result<()> {
        for managed in self.all_managed() {
            managed.unload().await?;
        }
        Ok(())
    }

    /// End the session: stop the scheduler, zeroize the key and drop every
    /// in-memory snapshot and cursor. Stored blobs stay where they are.
    pub async fn end_session(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        self.stop_scheduler();
        self.store.discard_key()?;
        self.unload_all().await?;

        if let Some(handle) = session.take() {
            info!("Cache session {} ended", handle.as_str());
        }
        Ok(())
    }

    /// Replace the session key and re-encrypt every collection under it.
    ///
    /// A collection that cannot be re-encrypted is reset and resynced in
    /// full. Returns the collections that were reset. Rotating to the
    /// current secret leaves the blobs untouched.
    ///
    /// # Errors
    /// `KeyUnavailable` if no session is active.
    pub async fn rotate_key(&self, new_secret: SensitiveBytes) -> Result<Vec<CollectionName>> {
        let session = self.session.lock().await;
        if session.is_none() {
            return Err(Error::KeyUnavailable);
        }

        let key = derive_key(new_secret, self.config.kdf.clone()).await?;
        if self.store.key_matches(&key) {
            debug!("Session key unchanged, nothing to re-encrypt");
            return Ok(Vec::new());
        }
        self.store.install_key(key)?;

        let mut reset = Vec::new();
        for managed in self.all_managed() {
            if let Err(e) = managed.reseal().await {
                warn!("Failed to re-encrypt {} ({}), resetting", managed.name(), e);
                managed.reset_local().await?;
                spawn_full_sync(managed.clone());
                reset.push(managed.name());
            }
        }

        info!("Session key rotated");
        Ok(reset)
    }

    /// Current sync state of `collection`.
    pub fn sync_state(&self, collection: CollectionName) -> SyncCursor {
        self.managed(collection).state()
    }

    /// Record counts and cursors of every collection.
    pub fn status(&self) -> Vec<CollectionStatus> {
        self.all_managed()
            .iter()
            .map(|m| CollectionStatus {
                collection: m.name(),
                records: m.records(),
                cursor: m.state(),
            })
            .collect()
    }

    /// Sync one collection.
    pub async fn request_sync(
        &self,
        collection: CollectionName,
        mode: SyncMode,
    ) -> Result<SyncReport> {
        self.managed(collection).run_sync(mode).await
    }

    /// Full sync of one collection.
    pub async fn force_full_sync(&self, collection: CollectionName) -> Result<SyncReport> {
        self.request_sync(collection, SyncMode::Full).await
    }

    /// Sync every collection concurrently. One failing collection does not
    /// affect the others.
    pub async fn sync_all(&self, mode: SyncMode) -> Vec<(CollectionName, Result<SyncReport>)> {
        let runs = self.all_managed().into_iter().map(|managed| async move {
            let result = managed.run_sync(mode).await;
            (managed.name(), result)
        });
        futures::future::join_all(runs).await
    }

    /// Drop the local cache of `collection`, or of every collection.
    pub async fn clear(&self, collection: Option<CollectionName>) -> Result<()> {
        let targets = match collection {
            Some(c) => vec![self.managed(c)],
            None => self.all_managed(),
        };
        for managed in targets {
            managed.reset_local().await?;
        }
        Ok(())
    }

    /// Start periodic syncing with `period`, or the configured interval.
    ///
    /// Returns `false` when no period is set. Restarts a running scheduler.
    pub fn start_scheduler(&self, period: Option<Duration>) -> Result<bool> {
        let Some(period) = period.or(self.config.sync_interval) else {
            debug!("No sync interval configured");
            return Ok(false);
        };

        let targets: Vec<Arc<dyn SyncTarget>> = vec![
            self.sales.orchestrator().clone(),
            self.buyers.orchestrator().clone(),
            self.producers.orchestrator().clone(),
        ];
        let (scheduler, _task) = SyncScheduler::spawn(targets, Some(period));

        let mut slot = self
            .scheduler
            .lock()
            .map_err(|_| Error::SyncFailed {
                collection: "scheduler".to_string(),
                message: "Scheduler lock poisoned".to_string(),
            })?;
        if let Some(previous) = slot.replace(scheduler) {
            previous.shutdown();
        }
        Ok(true)
    }

    /// Ask the running scheduler to sync `collection`, or every collection,
    /// without waiting for the result.
    ///
    /// Returns `false` when no scheduler is running.
    pub async fn schedule_sync(
        &self,
        collection: Option<CollectionName>,
        mode: SyncMode,
    ) -> Result<bool> {
        let scheduler = match self.scheduler.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        let Some(scheduler) = scheduler else {
            return Ok(false);
        };

        let request = match collection {
            Some(c) => SyncRequest::Collection(c, mode),
            None => SyncRequest::All(mode),
        };
        scheduler.trigger(request).await?;
        Ok(true)
    }

    /// Stop periodic syncing.
    pub fn stop_scheduler(&self) {
        if let Ok(mut slot) = self.scheduler.lock() {
            if let Some(scheduler) = slot.take() {
                scheduler.shutdown();
            }
        }
    }

    /// Whether periodic syncing is running.
    pub fn scheduler_running(&self) -> bool {
        self.scheduler.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.stop_scheduler();
    }
}

/// Derive the session key off the async runtime.
async fn derive_key(secret: SensitiveBytes, params: KdfParams) -> Result<CacheKey> {
    tokio::task::spawn_blocking(move || derive_session_key(secret.as_bytes(), &params))
        .await
        .map_err(|e| Error::Crypto(format!("Key derivation task failed: {}", e)))?
}

fn spawn_full_sync(managed: Arc<dyn ManagedCollection>) {
    tokio::spawn(async move {
        if let Err(e) = managed.run_sync(SyncMode::Full).await {
            warn!("Recovery sync of {} failed: {}", managed.name(), e);
        }
    });
}
