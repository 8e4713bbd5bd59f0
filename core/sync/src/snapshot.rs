//! Materialized collection state.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use salecache_common::CollectionName;

/// Anything that can be mirrored by the cache.
pub trait SyncEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> SyncEntity for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// A live entity together with its server-side modification time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord<T> {
    pub id: String,
    pub entity: T,
    pub updated_at: DateTime<Utc>,
}

/// Immutable view of a collection: live records keyed by id, plus the
/// tombstone log of recently deleted ids.
///
/// Published snapshots are shared behind an `Arc` and never modified; the
/// merge engine always works on a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSnapshot<T> {
    records: BTreeMap<String, CacheRecord<T>>,
    #[serde(default)]
    tombstones: BTreeMap<String, DateTime<Utc>>,
}

impl<T> CollectionSnapshot<T> {
    /// An empty collection.
    pub fn empty() -> Self {
        Self {
            records: BTreeMap::new(),
            tombstones: BTreeMap::new(),
        }
    }

    /// Entity stored under `id`.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.records.get(id).map(|r| &r.entity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Live `(id, entity)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.records
            .iter()
            .map(|(id, record)| (id.as_str(), &record.entity))
    }

    /// Deletion time of a tombstoned id, if still in the log.
    pub fn tombstone(&self, id: &str) -> Option<DateTime<Utc>> {
        self.tombstones.get(id).copied()
    }

    /// Ids currently in the tombstone log.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub(crate) fn upsert(&mut self, record: CacheRecord<T>) {
        self.tombstones.remove(&record.id);
        self.records.insert(record.id.clone(), record);
    }

    /// Remove `id` and log the tombstone. Returns whether a record was removed.
    pub(crate) fn remove(&mut self, id: &str, deleted_at: DateTime<Utc>) -> bool {
        let logged = self
            .tombstones
            .entry(id.to_string())
            .or_insert(deleted_at);
        if *logged < deleted_at {
            *logged = deleted_at;
        }
        self.records.remove(id).is_some()
    }

    /// Drop tombstones deleted before `horizon`. Returns how many were dropped.
    pub(crate) fn prune_tombstones(&mut self, horizon: DateTime<Utc>) -> usize {
        let before = self.tombstones.len();
        self.tombstones.retain(|_, deleted_at| *deleted_at >= horizon);
        before - self.tombstones.len()
    }
}

impl<T> Default for CollectionSnapshot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Payload sealed into a collection's blob: the snapshot and its cursor.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedCollection<T> {
    pub collection: CollectionName,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub snapshot: CollectionSnapshot<T>,
}

/// Borrowed form of [`PersistedCollection`] used when saving.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedCollectionRef<'a, T> {
    pub collection: CollectionName,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub snapshot: &'a CollectionSnapshot<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(id: &str, entity: i64, at: i64) -> CacheRecord<i64> {
        CacheRecord {
            id: id.to_string(),
            entity,
            updated_at: t(at),
        }
    }

    #[test]
    fn test_upsert_clears_tombstone() {
        let mut snapshot = CollectionSnapshot::empty();
        assert!(!snapshot.remove("A", t(1)));
        assert_eq!(snapshot.tombstone("A"), Some(t(1)));

        snapshot.upsert(record("A", 1, 2));
        assert_eq!(snapshot.get("A"), Some(&1));
        assert!(snapshot.tombstone("A").is_none());
    }

    #[test]
    fn test_remove_keeps_latest_tombstone() {
        let mut snapshot: CollectionSnapshot<i64> = CollectionSnapshot::empty();
        snapshot.remove("A", t(5));
        snapshot.remove("A", t(3));
        assert_eq!(snapshot.tombstone("A"), Some(t(5)));
    }

    #[test]
    fn test_prune_tombstones() {
        let mut snapshot: CollectionSnapshot<i64> = CollectionSnapshot::empty();
        snapshot.remove("old", t(1));
        snapshot.remove("new", t(10));

        assert_eq!(snapshot.prune_tombstones(t(5)), 1);
        assert!(snapshot.tombstone("old").is_none());
        assert_eq!(snapshot.tombstone("new"), Some(t(10)));
    }

    #[test]
    fn test_iteration_is_ordered() {
        let mut snapshot = CollectionSnapshot::empty();
        snapshot.upsert(record("b", 2, 1));
        snapshot.upsert(record("a", 1, 3));

        let items: Vec<(&str, &i64)> = snapshot.iter().collect();
        assert_eq!(items, vec![("a", &1), ("b", &2)]);
    }

    #[test]
    fn test_persisted_roundtrip_through_ref() {
        let mut snapshot = CollectionSnapshot::empty();
        snapshot.upsert(record("a", 1, 1));
        snapshot.remove("gone", t(2));

        let json = serde_json::to_string(&PersistedCollectionRef {
            collection: CollectionName::Sales,
            last_synced_at: Some(t(3)),
            snapshot: &snapshot,
        })
        .unwrap();

        let back: PersistedCollection<i64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.collection, CollectionName::Sales);
        assert_eq!(back.last_synced_at, Some(t(3)));
        assert_eq!(back.snapshot, snapshot);
    }
}
