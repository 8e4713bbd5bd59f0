//! HTTP client for the remote sync endpoints.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{DeltaFeed, DeltaItem, DeltaPage};
use crate::config::FeedEndpoint;
use salecache_common::{CollectionName, Error, Result};

/// Page envelope as sent by the server. Items are decoded one by one so a
/// single bad item does not poison the page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePage {
    changes: Vec<serde_json::Value>,
    #[serde(default)]
    next_token: Option<String>,
    server_time: DateTime<Utc>,
}

/// Delta feed served at `{base_url}/sync/{collection}`.
pub struct HttpDeltaFeed {
    http: Client,
    base: Url,
    bearer_token: Option<String>,
    timeout: Duration,
}

impl HttpDeltaFeed {
    /// Create a client for `endpoint`, bounding every page fetch by `timeout`.
    ///
    /// # Errors
    /// `InvalidInput` if the base URL does not parse.
    pub fn new(endpoint: &FeedEndpoint, timeout: Duration) -> Result<Self> {
        let mut base = endpoint.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).map_err(|e| {
            Error::InvalidInput(format!("Invalid feed URL '{}': {}", endpoint.base_url, e))
        })?;

        Ok(Self {
            http: Client::new(),
            base,
            bearer_token: endpoint.bearer_token.clone(),
            timeout,
        })
    }

    /// URL of the feed for `collection`.
    pub fn collection_url(&self, collection: CollectionName) -> Result<Url> {
        self.base
            .join(&format!("sync/{}", collection))
            .map_err(|e| Error::InvalidInput(format!("Invalid feed URL: {}", e)))
    }

    async fn fetch(
        &self,
        url: Url,
        since: Option<DateTime<Utc>>,
        continuation: Option<&str>,
    ) -> Result<Vec<u8>> {
        let mut request = self.http.get(url);
        if let Some(since) = since {
            let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
            request = request.query(&[("since", since)]);
        }
        if let Some(token) = continuation {
            request = request.query(&[("continuationToken", token)]);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::FeedUnavailable(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::FeedUnavailable(format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::FeedUnavailable(format!("Failed to read response: {}", e)))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl DeltaFeed for HttpDeltaFeed {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch_page(
        &self,
        collection: CollectionName,
        since: Option<DateTime<Utc>>,
        continuation: Option<&str>,
    ) -> Result<DeltaPage> {
        let url = self.collection_url(collection)?;
        debug!("GET {} since={:?} continuation={:?}", url, since, continuation);

        let body = tokio::time::timeout(self.timeout, self.fetch(url, since, continuation))
            .await
            .map_err(|_| {
                Error::FeedUnavailable(format!(
                    "Timed out after {:?} fetching {}",
                    self.timeout, collection
                ))
            })??;

        parse_page(&body)
    }
}

/// Decode a page body.
///
/// A broken envelope fails the whole page with `FeedUnavailable`. Items that
/// do not decode are dropped with a warning and counted in
/// [`DeltaPage::malformed`].
pub fn parse_page(body: &[u8]) -> Result<DeltaPage> {
    let wire: WirePage = serde_json::from_slice(body)
        .map_err(|e| Error::FeedUnavailable(format!("Malformed page: {}", e)))?;

    let mut changes = Vec::with_capacity(wire.changes.len());
    let mut malformed = 0;
    for (index, raw) in wire.changes.into_iter().enumerate() {
        match serde_json::from_value::<DeltaItem>(raw) {
            Ok(item) => changes.push(item),
            Err(e) => {
                warn!("Dropping malformed delta item #{}: {}", index, e);
                malformed += 1;
            }
        }
    }

    Ok(DeltaPage {
        changes,
        next_token: wire.next_token.filter(|t| !t.is_empty()),
        server_time: wire.server_time,
        malformed,
    })
}
