//! Sync scheduling - periodic and on-request.
//!
//! Each trigger fans out into one task per collection, so a slow or failing
//! collection never holds up the others. Overlapping triggers are harmless:
//! a collection already syncing coalesces the extra request.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::orchestrator::{SyncMode, SyncReport};
use salecache_common::{CollectionName, Error, Result};

/// Something the scheduler can sync.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Collection this target keeps in sync.
    fn collection(&self) -> CollectionName;

    /// Run (or join) a sync.
    async fn sync(&self, mode: SyncMode) -> Result<SyncReport>;
}

/// Sync request types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    /// Sync every collection.
    All(SyncMode),
    /// Sync one collection.
    Collection(CollectionName, SyncMode),
}

/// Front end of a running scheduler.
#[derive(Clone)]
pub struct SyncScheduler {
    request_tx: mpsc::Sender<SyncRequest>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl SyncScheduler {
    /// Create a scheduler over `targets`.
    ///
    /// With `period = None` syncs only happen on [`trigger`](Self::trigger).
    /// Otherwise every collection is synced incrementally at start and then
    /// once per period.
    pub fn new(
        targets: Vec<Arc<dyn SyncTarget>>,
        period: Option<Duration>,
    ) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = Self {
            request_tx,
            shutdown_tx: Arc::new(shutdown_tx),
        };
        let handle = SyncSchedulerHandle {
            targets,
            period,
            request_rx,
            shutdown_rx,
        };
        (scheduler, handle)
    }

    /// Create a scheduler and spawn its loop.
    pub fn spawn(
        targets: Vec<Arc<dyn SyncTarget>>,
        period: Option<Duration>,
    ) -> (Self, JoinHandle<()>) {
        let (scheduler, handle) = Self::new(targets, period);
        (scheduler, tokio::spawn(handle.run()))
    }

    /// Ask for a sync outside the periodic schedule.
    ///
    /// Returns once the request is queued, not when the sync finishes.
    pub async fn trigger(&self, request: SyncRequest) -> Result<()> {
        self.request_tx.send(request).await.map_err(|_| Error::SyncFailed {
            collection: "scheduler".to_string(),
            message: "Scheduler not running".to_string(),
        })
    }

    /// Stop the loop. Syncs already started run to completion.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Background half of the scheduler.
pub struct SyncSchedulerHandle {
    targets: Vec<Arc<dyn SyncTarget>>,
    period: Option<Duration>,
    request_rx: mpsc::Receiver<SyncRequest>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SyncSchedulerHandle {
    /// Run the scheduler loop until shutdown.
    pub async fn run(self) {
        let Self {
            targets,
            period,
            mut request_rx,
            mut shutdown_rx,
        } = self;

        let mut ticker = period.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        info!("Sync scheduler started (period {:?})", period);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                request = request_rx.recv() => {
                    match request {
                        Some(SyncRequest::All(mode)) => dispatch(&targets, None, mode),
                        Some(SyncRequest::Collection(c, mode)) => dispatch(&targets, Some(c), mode),
                        None => break,
                    }
                }

                _ = tick(&mut ticker) => {
                    debug!("Periodic sync tick");
                    dispatch(&targets, None, SyncMode::Incremental);
                }
            }
        }

        info!("Sync scheduler stopped");
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn dispatch(targets: &[Arc<dyn SyncTarget>], only: Option<CollectionName>, mode: SyncMode) {
    for target in targets {
        let collection = target.collection();
        if only.is_some_and(|c| c != collection) {
            continue;
        }

        let target = target.clone();
        tokio::spawn(async move {
            match target.sync(mode).await {
                Ok(report) if report.coalesced => {
                    debug!("Scheduled sync of {} joined a running one", collection);
                }
                Ok(report) => {
                    debug!(
                        "Scheduled sync of {} done: {} upserts, {} deletes",
                        collection, report.upserts, report.deletes
                    );
                }
                Err(e) => error!("Scheduled sync of {} failed: {}", collection, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTarget {
        collection: CollectionName,
        calls: AtomicU32,
        delay: Duration,
        fail: bool,
    }

    impl CountingTarget {
        fn new(collection: CollectionName) -> Arc<Self> {
            Self::with(collection, Duration::ZERO, false)
        }

        fn with(collection: CollectionName, delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                collection,
                calls: AtomicU32::new(0),
                delay,
                fail,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SyncTarget for CountingTarget {
        fn collection(&self) -> CollectionName {
            self.collection
        }

        async fn sync(&self, mode: SyncMode) -> Result<SyncReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::FeedUnavailable("down".to_string()));
            }
            Ok(SyncReport {
                collection: self.collection,
                mode,
                pages: 1,
                upserts: 0,
                deletes: 0,
                dropped: 0,
                server_time: None,
                coalesced: false,
            })
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_trigger_single_collection() {
        let sales = CountingTarget::new(CollectionName::Sales);
        let buyers = CountingTarget::new(CollectionName::Buyers);
        let (scheduler, task) = SyncScheduler::spawn(vec![sales.clone(), buyers.clone()], None);

        scheduler
            .trigger(SyncRequest::Collection(CollectionName::Sales, SyncMode::Full))
            .await
            .unwrap();
        settle().await;

        assert_eq!(sales.calls(), 1);
        assert_eq!(buyers.calls(), 0);

        scheduler.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_periodic_ticks() {
        let sales = CountingTarget::new(CollectionName::Sales);
        let (scheduler, task) =
            SyncScheduler::spawn(vec![sales.clone()], Some(Duration::from_millis(20)));

        tokio::time::sleep(Duration::from_millis(110)).await;
        scheduler.shutdown();
        task.await.unwrap();

        // First tick is immediate
        assert!(sales.calls() >= 3);
    }

    #[tokio::test]
    async fn test_slow_or_failing_collection_does_not_block_others() {
        let slow = CountingTarget::with(CollectionName::Sales, Duration::from_secs(10), false);
        let failing = CountingTarget::with(CollectionName::Buyers, Duration::ZERO, true);
        let fine = CountingTarget::new(CollectionName::Producers);
        let (scheduler, task) =
            SyncScheduler::spawn(vec![slow.clone(), failing.clone(), fine.clone()], None);

        for _ in 0..2 {
            scheduler
                .trigger(SyncRequest::All(SyncMode::Incremental))
                .await
                .unwrap();
        }
        settle().await;

        assert_eq!(fine.calls(), 2);
        assert_eq!(failing.calls(), 2);

        scheduler.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_after_shutdown_fails() {
        let (scheduler, task) = SyncScheduler::spawn(vec![], None);
        scheduler.shutdown();
        task.await.unwrap();

        assert!(scheduler
            .trigger(SyncRequest::All(SyncMode::Full))
            .await
            .is_err());
    }
}
