//! SaleCache Sync Engine
//!
//! Keeps client-side mirrors of server-owned collections up to date from
//! paginated delta feeds:
//! - Sync cursors with at-most-one sync per collection
//! - Delta feed client (HTTP) and an in-memory feed
//! - Pure merge engine with a tombstone log
//! - Orchestrator publishing immutable snapshots
//! - Retry strategy with exponential backoff
//! - Periodic scheduling

pub mod config;
pub mod cursor;
pub mod feed;
pub mod merge;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod snapshot;

// Re-export main types
pub use config::{CacheConfig, FeedEndpoint};
pub use cursor::{CursorRegistry, SyncCursor, SyncStatus};
pub use feed::{DeltaFeed, DeltaItem, DeltaKind, DeltaPage, HttpDeltaFeed, MemoryFeed};
pub use merge::{merge, merge_into, MergeOutcome, MergeStats, MergeViolation, ViolationKind};
pub use orchestrator::{CollectionSync, Hydration, SyncMode, SyncReport};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{SyncRequest, SyncScheduler, SyncSchedulerHandle, SyncTarget};
pub use snapshot::{CacheRecord, CollectionSnapshot, SyncEntity};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _config = CacheConfig::default();
        let _retry_config = RetryConfig::default();
        let _cursors = CursorRegistry::new();
        let _snapshot = CollectionSnapshot::<u32>::empty();
    }
}
