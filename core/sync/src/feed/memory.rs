//! In-memory delta feed.
//!
//! Plays the server side of the feed contract over a per-collection change
//! log. Used for development and testing; it can be told to fail or to be
//! slow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{DeltaFeed, DeltaItem, DeltaKind, DeltaPage};
use salecache_common::{CollectionName, Error, Result};

/// A request received by a [`MemoryFeed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub collection: CollectionName,
    pub since: Option<DateTime<Utc>>,
    pub continuation: Option<String>,
}

struct FeedState {
    logs: HashMap<CollectionName, Vec<DeltaItem>>,
    page_size: usize,
    server_time: Option<DateTime<Utc>>,
    /// Fetches allowed to succeed before every fetch fails.
    remaining_successes: Option<usize>,
    delay: Duration,
    requests: Vec<FeedRequest>,
}

/// Scriptable in-memory feed.
pub struct MemoryFeed {
    state: Mutex<FeedState>,
}

impl MemoryFeed {
    /// Feed returning at most `page_size` changes per page.
    pub fn new(page_size: usize) -> Self {
        Self {
            state: Mutex::new(FeedState {
                logs: HashMap::new(),
                page_size: page_size.max(1),
                server_time: None,
                remaining_successes: None,
                delay: Duration::ZERO,
                requests: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, FeedState>> {
        self.state
            .lock()
            .map_err(|_| Error::FeedUnavailable("Feed state poisoned".to_string()))
    }

    /// Append a raw change to the log of `collection`.
    pub fn push(&self, collection: CollectionName, item: DeltaItem) -> Result<()> {
        self.lock()?.logs.entry(collection).or_default().push(item);
        Ok(())
    }

    /// Record a create or update.
    pub fn upsert(
        &self,
        collection: CollectionName,
        id: &str,
        entity: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.push(collection, DeltaItem::upsert(id, entity, at))
    }

    /// Record a deletion.
    pub fn delete(&self, collection: CollectionName, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.push(collection, DeltaItem::delete(id, at))
    }

    /// Pin the server clock reported with every page.
    pub fn set_server_time(&self, at: DateTime<Utc>) -> Result<()> {
        self.lock()?.server_time = Some(at);
        Ok(())
    }

    /// Let `successes` more fetches through, then fail every fetch with
    /// `FeedUnavailable` until [`heal`](Self::heal) is called.
    pub fn fail_after(&self, successes: usize) -> Result<()> {
        self.lock()?.remaining_successes = Some(successes);
        Ok(())
    }

    /// Stop failing.
    pub fn heal(&self) -> Result<()> {
        self.lock()?.remaining_successes = None;
        Ok(())
    }

    /// Delay every fetch by `delay`.
    pub fn set_delay(&self, delay: Duration) -> Result<()> {
        self.lock()?.delay = delay;
        Ok(())
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Result<Vec<FeedRequest>> {
        Ok(self.lock()?.requests.clone())
    }

    fn page(
        state: &mut FeedState,
        collection: CollectionName,
        since: Option<DateTime<Utc>>,
        continuation: Option<&str>,
    ) -> Result<DeltaPage> {
        state.requests.push(FeedRequest {
            collection,
            since,
            continuation: continuation.map(str::to_string),
        });

        if let Some(remaining) = state.remaining_successes.as_mut() {
            if *remaining == 0 {
                return Err(Error::FeedUnavailable(format!(
                    "{} feed unavailable",
                    collection
                )));
            }
            *remaining -= 1;
        }

        let log = state.logs.get(&collection).map(Vec::as_slice).unwrap_or(&[]);
        let mut changes: Vec<DeltaItem> = match since {
            None => live_records(log),
            Some(since) => log.iter().filter(|i| i.updated_at > since).cloned().collect(),
        };
        changes.sort_by_key(|i| i.updated_at);

        let offset = match continuation {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| {
                    Error::FeedUnavailable(format!("Unknown continuation token '{}'", token))
                })?,
        };
        let end = (offset + state.page_size).min(changes.len());
        let next_token = (end < changes.len()).then(|| end.to_string());
        let page: Vec<DeltaItem> = changes
            .get(offset..end)
            .map(<[DeltaItem]>::to_vec)
            .unwrap_or_default();

        let server_time = state
            .server_time
            .or_else(|| state.logs.values().flatten().map(|i| i.updated_at).max())
            .unwrap_or_else(Utc::now);

        Ok(DeltaPage::new(page, next_token, server_time))
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Latest state of every id that is still alive, as upserts.
fn live_records(log: &[DeltaItem]) -> Vec<DeltaItem> {
    let mut latest: BTreeMap<&str, &DeltaItem> = BTreeMap::new();
    for item in log {
        match latest.get(item.id.as_str()) {
            Some(current) if current.updated_at > item.updated_at => {}
            _ => {
                latest.insert(item.id.as_str(), item);
            }
        }
    }
    latest
        .into_values()
        .filter(|i| i.kind == DeltaKind::Upsert)
        .cloned()
        .collect()
}

#[async_trait]
impl DeltaFeed for MemoryFeed {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_page(
        &self,
        collection: CollectionName,
        since: Option<DateTime<Utc>>,
        continuation: Option<&str>,
    ) -> Result<DeltaPage> {
        let delay = self.lock()?.delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock()?;
        Self::page(&mut state, collection, since, continuation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_full_snapshot_has_no_deletes() {
        let feed = MemoryFeed::new(10);
        feed.upsert(CollectionName::Sales, "A", json!(1), t(1)).unwrap();
        feed.upsert(CollectionName::Sales, "B", json!(2), t(1)).unwrap();
        feed.delete(CollectionName::Sales, "A", t(2)).unwrap();
        feed.upsert(CollectionName::Sales, "B", json!(3), t(3)).unwrap();

        let page = feed.fetch_page(CollectionName::Sales, None, None).await.unwrap();
        assert_eq!(page.changes.len(), 1);
        assert_eq!(page.changes[0].id, "B");
        assert_eq!(page.changes[0].entity, Some(json!(3)));
        assert_eq!(page.server_time, t(3));
    }

    #[tokio::test]
    async fn test_incremental_is_strictly_after_cursor() {
        let feed = MemoryFeed::new(10);
        feed.upsert(CollectionName::Buyers, "A", json!(1), t(1)).unwrap();
        feed.upsert(CollectionName::Buyers, "B", json!(2), t(2)).unwrap();
        feed.delete(CollectionName::Buyers, "A", t(3)).unwrap();

        let page = feed
            .fetch_page(CollectionName::Buyers, Some(t(2)), None)
            .await
            .unwrap();
        assert_eq!(page.changes, vec![DeltaItem::delete("A", t(3))]);
    }

    #[tokio::test]
    async fn test_pagination() {
        let feed = MemoryFeed::new(2);
        for i in 0..5 {
            feed.upsert(CollectionName::Producers, &format!("P{}", i), json!(i), t(i)).unwrap();
        }

        let mut token: Option<String> = None;
        let mut seen = Vec::new();
        loop {
            let page = feed
                .fetch_page(CollectionName::Producers, None, token.as_deref())
                .await
                .unwrap();
            seen.extend(page.changes.into_iter().map(|i| i.id));
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }

        assert_eq!(seen, vec!["P0", "P1", "P2", "P3", "P4"]);
        assert_eq!(feed.requests().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fail_after_and_heal() {
        let feed = MemoryFeed::new(10);
        feed.fail_after(1).unwrap();

        assert!(feed.fetch_page(CollectionName::Sales, None, None).await.is_ok());
        assert!(matches!(
            feed.fetch_page(CollectionName::Sales, None, None).await,
            Err(Error::FeedUnavailable(_))
        ));

        feed.heal().unwrap();
        assert!(feed.fetch_page(CollectionName::Sales, None, None).await.is_ok());
    }
}
