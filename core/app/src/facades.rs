//! Typed read facades over the synced collections.
//!
//! Facades never mutate anything: every query runs against the snapshot
//! published last, and syncs are delegated to the orchestrator.

use std::sync::Arc;
use tokio::sync::watch;

use crate::entities::{Buyer, Entity, Party, PartyStatus, Producer, Sale, SaleStatus};
use salecache_common::Result;
use salecache_sync::{CollectionSnapshot, CollectionSync, SyncCursor, SyncMode, SyncReport};

/// Read access to one collection.
pub struct CollectionCache<T> {
    sync: Arc<CollectionSync<T>>,
}

/// Sales collection.
pub type SalesCache = CollectionCache<Sale>;
/// Buyers collection.
pub type BuyersCache = CollectionCache<Buyer>;
/// Producers collection.
pub type ProducersCache = CollectionCache<Producer>;

impl<T> Clone for CollectionCache<T> {
    fn clone(&self) -> Self {
        Self {
            sync: self.sync.clone(),
        }
    }
}

impl<T: Entity> CollectionCache<T> {
    pub fn new(sync: Arc<CollectionSync<T>>) -> Self {
        Self { sync }
    }

    /// The orchestrator behind this facade.
    pub fn orchestrator(&self) -> &Arc<CollectionSync<T>> {
        &self.sync
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<CollectionSnapshot<T>> {
        self.sync.snapshot()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<CollectionSnapshot<T>>> {
        self.sync.subscribe_snapshot()
    }

    pub fn sync_state(&self) -> SyncCursor {
        self.sync.sync_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncCursor> {
        self.sync.subscribe_state()
    }

    pub async fn request_sync(&self, mode: SyncMode) -> Result<SyncReport> {
        self.sync.request_sync(mode).await
    }

    pub async fn force_full_sync(&self) -> Result<SyncReport> {
        self.sync.force_full_sync().await
    }

    /// Entity with the given id.
    pub fn get(&self, id: &str) -> Option<T> {
        self.snapshot().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// All entities in the collection's list order.
    pub fn list(&self) -> Vec<T> {
        self.filtered(|_| true)
    }

    fn filtered(&self, keep: impl Fn(&T) -> bool) -> Vec<T> {
        let snapshot = self.snapshot();
        let mut items: Vec<T> = snapshot
            .iter()
            .map(|(_, entity)| entity)
            .filter(|entity| keep(entity))
            .cloned()
            .collect();
        items.sort_by(T::list_order);
        items
    }
}

impl CollectionCache<Sale> {
    pub fn by_buyer(&self, buyer_id: &str) -> Vec<Sale> {
        self.filtered(|s| s.buyer_id == buyer_id)
    }

    pub fn by_producer(&self, producer_id: &str) -> Vec<Sale> {
        self.filtered(|s| s.producer_id == producer_id)
    }

    pub fn with_status(&self, status: SaleStatus) -> Vec<Sale> {
        self.filtered(|s| s.status == status)
    }

    pub fn for_year(&self, year: i32) -> Vec<Sale> {
        self.filtered(|s| s.year() == Some(year))
    }

    /// Sum of totals still to be collected, optionally for one buyer.
    pub fn outstanding_total(&self, buyer_id: Option<&str>) -> f64 {
        self.snapshot()
            .iter()
            .map(|(_, sale)| sale)
            .filter(|s| s.status.is_outstanding())
            .filter(|s| buyer_id.is_none_or(|b| s.buyer_id == b))
            .map(|s| s.total)
            .sum()
    }
}

impl<P: Party> CollectionCache<P> {
    /// Party with the given business code (case-insensitive).
    pub fn find_by_code(&self, code: &str) -> Option<P> {
        let code = code.trim();
        self.snapshot()
            .iter()
            .map(|(_, party)| party)
            .find(|p| p.code().eq_ignore_ascii_case(code))
            .cloned()
    }

    /// Parties whose name, code or VAT number contains `query`.
    pub fn search(&self, query: &str) -> Vec<P> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.list();
        }
        self.filtered(|p| {
            [p.company_name(), p.code(), p.vat_number()]
                .iter()
                .any(|field| field.to_lowercase().contains(&query))
        })
    }

    /// Active parties.
    pub fn active(&self) -> Vec<P> {
        self.filtered(|p| p.status() == PartyStatus::Active)
    }
}
