//! HTTP client for the device's store, addressed through a tunnel's local port.
//!
//! Only the operations the migration needs are implemented:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | [`ConfigTransport::ping`] | `GET /` |
//! | [`ConfigTransport::count`] | `GET /<index>/_count` |
//! | [`ConfigTransport::list`] | `POST /<index>/_search?scroll=..`, then `POST /_search/scroll` |
//! | [`ConfigTransport::get`] | `GET /<index>/_doc/<id>` |
//! | [`ConfigTransport::put`] | `PUT /<index>/_doc/<id>` (upsert) |
//!
//! Non-2xx responses become [`MigrateError::RemoteApi`]; connection-level
//! failures (tunnel gone, reset, timeout) become [`MigrateError::Transport`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use futures::stream::{self, Stream, TryStreamExt};
use reqwest::{Client, Method, Response, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::migrate::artifact::MalformedEntry;
use crate::migrate::config::{
    DEFAULT_PAGE_SIZE, DEFAULT_READY_DELAY, DEFAULT_READY_RETRIES, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SCROLL_KEEPALIVE, MAX_READY_DELAY,
};
use crate::migrate::document::{ConfigDocument, DocumentKind};
use crate::migrate::error::{MigrateError, Result};

/// One listed hit: the document, or the hit that could not be read as one.
pub type ListedHit = std::result::Result<ConfigDocument, MalformedEntry>;

/// Store index for each document kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreIndices {
    pub alerts: String,
    pub reports: String,
}

impl Default for StoreIndices {
    fn default() -> Self {
        Self {
            alerts: DocumentKind::Alert.default_index().to_string(),
            reports: DocumentKind::Report.default_index().to_string(),
        }
    }
}

impl StoreIndices {
    pub fn index_for(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Alert => &self.alerts,
            DocumentKind::Report => &self.reports,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub request_timeout: Duration,
    /// Documents per scroll page
    pub page_size: u32,
    /// Scroll context keepalive, in store time units (`1m`)
    pub scroll_keepalive: String,
    pub indices: StoreIndices,
    /// Readiness probe retries after the tunnel opens
    pub ready_retries: u32,
    pub ready_delay: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            page_size: DEFAULT_PAGE_SIZE,
            scroll_keepalive: DEFAULT_SCROLL_KEEPALIVE.to_string(),
            indices: StoreIndices::default(),
            ready_retries: DEFAULT_READY_RETRIES,
            ready_delay: DEFAULT_READY_DELAY,
        }
    }
}

/// Result reported by the store for an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PutOutcome {
    Created,
    Updated,
    Noop,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    result: PutOutcome,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id")]
    scroll_id: Option<String>,
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<Value>,
}

/// Where a scroll stands between pages.
enum ScrollState {
    Start,
    Continue(String),
    /// Last page delivered; clear the context and stop
    Finish(Option<String>),
}

/// Store client bound to a tunnel's local address.
#[derive(Debug, Clone)]
pub struct ConfigTransport {
    client: Client,
    base: Url,
    options: TransportOptions,
}

impl ConfigTransport {
    /// Create a client for the store reachable at `local_addr`.
    ///
    /// System HTTP proxies are ignored: requests must go to the tunnel.
    pub fn new(local_addr: SocketAddr, options: TransportOptions) -> Result<Self> {
        let base = Url::parse(&format!("http://{}/", local_addr))
            .map_err(|e| MigrateError::Config(format!("Invalid tunnel address {}: {}", local_addr, e)))?;

        let client = Client::builder()
            .no_proxy()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| MigrateError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base,
            options,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| MigrateError::Config(format!("Cannot extend base URL {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Turn non-2xx responses into [`MigrateError::RemoteApi`].
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(MigrateError::RemoteApi {
            status: status.as_u16(),
            body,
        })
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Response> {
        debug!("{} {}", method, url);
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        Self::check(response).await
    }

    /// Check the store answers through the tunnel.
    pub async fn ping(&self) -> Result<()> {
        self.send(Method::GET, self.base.clone(), None).await?;
        Ok(())
    }

    /// Ping until the store answers, with exponential backoff.
    ///
    /// Only transport failures are retried; an HTTP error status means the
    /// store is reachable and is returned immediately.
    pub async fn wait_ready(&self) -> Result<()> {
        let attempts = AtomicU32::new(0);

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.options.ready_delay)
            .with_max_delay(MAX_READY_DELAY)
            .with_max_times(self.options.ready_retries as usize)
            .with_jitter();

        let result = (|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            self.ping().await
        })
        .retry(backoff)
        .when(|e| matches!(e, MigrateError::Transport(_)))
        .notify(|err, dur| {
            warn!(
                "Store at {} not answering yet: {}. Retrying in {:?}",
                self.base, err, dur
            );
        })
        .await;

        match result {
            // Any HTTP answer proves the tunnel carries traffic
            Ok(()) | Err(MigrateError::RemoteApi { .. }) => {
                info!(
                    "Store reachable through {} after {} attempt(s)",
                    self.base,
                    attempts.load(Ordering::SeqCst)
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Number of documents of `kind` the store holds.
    pub async fn count(&self, kind: DocumentKind) -> Result<u64> {
        let url = self.url(&[self.options.indices.index_for(kind), "_count"])?;
        let response = self.send(Method::GET, url, None).await?;
        let body: CountResponse = response.json().await?;
        Ok(body.count)
    }

    /// Stream every document of `kind` in the store's native order.
    ///
    /// Pages are fetched lazily with the scroll API. A failure on any page
    /// ends the stream with that error; consumers must treat the whole
    /// listing as failed. A single hit that is not a document is yielded as
    /// a [`MalformedEntry`] and the listing goes on.
    pub fn list(&self, kind: DocumentKind) -> impl Stream<Item = Result<ListedHit>> + '_ {
        let pages = stream::try_unfold((ScrollState::Start, 0), move |(state, offset)| async move {
            let response = match state {
                ScrollState::Start => self.first_page(kind).await?,
                ScrollState::Continue(scroll_id) => self.next_page(&scroll_id).await?,
                ScrollState::Finish(scroll_id) => {
                    if let Some(scroll_id) = scroll_id {
                        self.clear_scroll(&scroll_id).await;
                    }
                    return Ok(None);
                }
            };

            let page_len = response.hits.hits.len();
            let hits: Vec<ListedHit> = response
                .hits
                .hits
                .into_iter()
                .enumerate()
                .map(|(index, hit)| {
                    let id = ConfigDocument::raw_id(&hit);
                    ConfigDocument::from_hit(kind, hit).map_err(|error| MalformedEntry {
                        position: offset + index + 1,
                        id,
                        error,
                    })
                })
                .collect();

            let next = match response.scroll_id {
                Some(scroll_id) if page_len >= self.options.page_size as usize => {
                    ScrollState::Continue(scroll_id)
                }
                scroll_id => ScrollState::Finish(scroll_id),
            };

            debug!("Fetched page of {} {} from store", page_len, kind.plural());
            Ok::<_, MigrateError>(Some((hits, (next, offset + page_len))))
        });

        pages
            .map_ok(|hits| stream::iter(hits.into_iter().map(Ok)))
            .try_flatten()
    }

    /// Collect [`list`](Self::list) into memory; fails as a whole on any page error.
    pub async fn list_all(&self, kind: DocumentKind) -> Result<Vec<ListedHit>> {
        self.list(kind).try_collect().await
    }

    async fn first_page(&self, kind: DocumentKind) -> Result<SearchResponse> {
        let mut url = self.url(&[self.options.indices.index_for(kind), "_search"])?;
        url.query_pairs_mut()
            .append_pair("scroll", &self.options.scroll_keepalive);
        let body = json!({
            "size": self.options.page_size,
            "query": { "match_all": {} },
            "sort": ["_doc"],
        });
        let response = self.send(Method::POST, url, Some(&body)).await?;
        Ok(response.json().await?)
    }

    async fn next_page(&self, scroll_id: &str) -> Result<SearchResponse> {
        let url = self.url(&["_search", "scroll"])?;
        let body = json!({
            "scroll": self.options.scroll_keepalive,
            "scroll_id": scroll_id,
        });
        let response = self.send(Method::POST, url, Some(&body)).await?;
        Ok(response.json().await?)
    }

    /// Release a scroll context. Failures are ignored; the store expires the
    /// context after the keepalive anyway.
    async fn clear_scroll(&self, scroll_id: &str) {
        let url = match self.url(&["_search", "scroll"]) {
            Ok(url) => url,
            Err(_) => return,
        };
        let body = json!({ "scroll_id": [scroll_id] });
        if let Err(e) = self.send(Method::DELETE, url, Some(&body)).await {
            debug!("Failed to clear scroll context: {}", e);
        }
    }

    /// Fetch one document by id. A missing id is a 404 [`MigrateError::RemoteApi`].
    pub async fn get(&self, kind: DocumentKind, id: &str) -> Result<ConfigDocument> {
        let url = self.url(&[self.options.indices.index_for(kind), "_doc", id])?;
        let response = self.send(Method::GET, url, None).await?;
        let mut hit: Value = response.json().await?;
        if let Value::Object(map) = &mut hit {
            // Fields of the get API that are not part of the stored hit
            map.remove("found");
            map.remove("_type");
        }
        ConfigDocument::from_hit(kind, hit)
    }

    /// Create or overwrite the document `id` with `source`.
    pub async fn put(
        &self,
        kind: DocumentKind,
        id: &str,
        source: &serde_json::Map<String, Value>,
    ) -> Result<PutOutcome> {
        let url = self.url(&[self.options.indices.index_for(kind), "_doc", id])?;
        let body = Value::Object(source.clone());
        let response = self.send(Method::PUT, url, Some(&body)).await?;
        let body: PutResponse = response.json().await?;
        Ok(body.result)
    }
}
