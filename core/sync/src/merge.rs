//! Cache merge engine.
//!
//! Applies delta pages to a collection snapshot. Pure and synchronous: no
//! I/O, no suspension, and the input snapshot is never touched.
//!
//! Items are applied in page order, so a later item for the same id wins.
//! Deleting an absent id is not an error. Structurally malformed items are
//! dropped with a warning and reported; they never abort the page.

use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::feed::{DeltaItem, DeltaKind, DeltaPage};
use crate::snapshot::{CacheRecord, CollectionSnapshot, SyncEntity};

/// Why a delta item was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// The item has an empty id.
    MissingId,
    /// An upsert without an entity.
    MissingEntity,
    /// The entity does not decode into the collection's type.
    UndecodableEntity(String),
}

/// A delta item the engine refused to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeViolation {
    pub id: String,
    pub kind: ViolationKind,
}

impl fmt::Display for MergeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::MissingId => write!(f, "item without id"),
            ViolationKind::MissingEntity => write!(f, "upsert of '{}' without entity", self.id),
            ViolationKind::UndecodableEntity(e) => {
                write!(f, "undecodable entity for '{}': {}", self.id, e)
            }
        }
    }
}

/// Counters of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Upserts applied.
    pub upserts: usize,
    /// Deletes applied, including deletes of absent ids.
    pub deletes: usize,
    /// Upserts ignored because a newer tombstone exists.
    pub stale: usize,
    /// Items dropped, either by the feed parser or by the engine.
    pub dropped: usize,
    /// Items dropped by the engine.
    pub violations: Vec<MergeViolation>,
}

impl MergeStats {
    /// Fold the counters of another merge into this one.
    pub fn absorb(&mut self, other: MergeStats) {
        self.upserts += other.upserts;
        self.deletes += other.deletes;
        self.stale += other.stale;
        self.dropped += other.dropped;
        self.violations.extend(other.violations);
    }
}

/// Result of [`merge`].
#[derive(Debug, Clone)]
pub struct MergeOutcome<T> {
    pub snapshot: CollectionSnapshot<T>,
    pub stats: MergeStats,
}

/// Apply `page` to a copy of `current` and return the new snapshot.
pub fn merge<T: SyncEntity>(current: &CollectionSnapshot<T>, page: &DeltaPage) -> MergeOutcome<T> {
    let mut snapshot = current.clone();
    let stats = merge_into(&mut snapshot, page);
    MergeOutcome { snapshot, stats }
}

/// Apply `page` to a privately owned working snapshot.
///
/// The orchestrator accumulates a multi-page sync this way; the working copy
/// is never visible to readers.
pub fn merge_into<T: SyncEntity>(
    snapshot: &mut CollectionSnapshot<T>,
    page: &DeltaPage,
) -> MergeStats {
    let mut stats = MergeStats {
        dropped: page.malformed,
        ..MergeStats::default()
    };

    for item in &page.changes {
        if let Err(kind) = apply(snapshot, item, &mut stats) {
            let violation = MergeViolation {
                id: item.id.clone(),
                kind,
            };
            warn!("Dropping delta item: {}", violation);
            stats.dropped += 1;
            stats.violations.push(violation);
        }
    }

    stats
}

fn apply<T: SyncEntity>(
    snapshot: &mut CollectionSnapshot<T>,
    item: &DeltaItem,
    stats: &mut MergeStats,
) -> Result<(), ViolationKind> {
    if item.id.trim().is_empty() {
        return Err(ViolationKind::MissingId);
    }

    match item.kind {
        DeltaKind::Delete => {
            snapshot.remove(&item.id, item.updated_at);
            stats.deletes += 1;
        }
        DeltaKind::Upsert => {
            let entity = decode::<T>(item.entity.as_ref())?;
            let tombstoned = snapshot.tombstone(&item.id);
            if matches!(tombstoned, Some(deleted_at) if deleted_at > item.updated_at) {
                stats.stale += 1;
                return Ok(());
            }
            snapshot.upsert(CacheRecord {
                id: item.id.clone(),
                entity,
                updated_at: item.updated_at,
            });
            stats.upserts += 1;
        }
    }

    Ok(())
}

fn decode<T: SyncEntity>(entity: Option<&Value>) -> Result<T, ViolationKind> {
    match entity {
        None | Some(Value::Null) => Err(ViolationKind::MissingEntity),
        Some(value) => {
            T::deserialize(value).map_err(|e| ViolationKind::UndecodableEntity(e.to_string()))
        }
    }
}
