//! Store query client
//!
//! [`CollectionStore`] is the seam the reconciliation engine depends on.
//! [`HttpStore`] implements it over the store's REST interface:
//!
//! - `GET {base}/collections` -> `{ result: { collections: [ {name}, ... ] } }`
//! - `GET {base}/collections/{name}` -> `{ result: { status, points_count, ... } }`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::report::{CollectionStat, ConnectivityReport, Inventory};
use crate::{Error, Result, StoreEndpoint};

/// Per-request bound for every store query
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const API_KEY_HEADER: HeaderName = HeaderName::from_static("api-key");

/// Read-only query interface of one collection store.
///
/// Implementations must not return errors: every failure mode is encoded in
/// the returned report.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Address used in reports and logs
    fn url(&self) -> &str;

    /// Fetch the collection inventory
    async fn probe(&self) -> ConnectivityReport;

    /// Fetch one collection's detail
    async fn stat(&self, name: &str) -> CollectionStat;

    /// Probe, then stat every discovered collection sequentially.
    ///
    /// Returns stats sorted by name. When the probe does not connect the
    /// stat list is empty; the probe report is returned alongside so the
    /// caller can tell "unreachable" from "empty".
    async fn inventory_with_stats(&self) -> Inventory {
        let connectivity = self.probe().await;
        if !connectivity.is_connected() {
            tracing::warn!(
                endpoint = %connectivity.url,
                status = connectivity.status(),
                "Store not connected, treating inventory as empty"
            );
            return Inventory {
                connectivity,
                collections: Vec::new(),
            };
        }

        let mut collections = Vec::with_capacity(connectivity.collections().len());
        for name in connectivity.collections() {
            collections.push(self.stat(name).await);
        }
        collections.sort_by(|a, b| a.name.cmp(&b.name));

        Inventory {
            connectivity,
            collections,
        }
    }
}

/// Wire shape of `GET /collections`
#[derive(Debug, Default, Deserialize)]
struct CollectionsResponse {
    #[serde(default)]
    result: CollectionsResult,
}

#[derive(Debug, Default, Deserialize)]
struct CollectionsResult {
    #[serde(default)]
    collections: Vec<CollectionDescription>,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    name: String,
}

/// Wire shape of `GET /collections/{name}`
#[derive(Debug, Default, Deserialize)]
struct CollectionInfoResponse {
    #[serde(default)]
    result: CollectionInfo,
}

#[derive(Debug, Default, Deserialize)]
struct CollectionInfo {
    status: Option<String>,
    points_count: Option<u64>,
    vectors_count: Option<u64>,
    indexed_vectors_count: Option<u64>,
}

/// Why a single GET did not yield a body
enum Failure {
    Status(u16),
    Transport(String),
}

impl Failure {
    fn describe(&self) -> String {
        match self {
            Failure::Status(code) => format!("HTTP {}", code),
            Failure::Transport(message) => message.clone(),
        }
    }
}

/// [`CollectionStore`] backed by the store's HTTP API
#[derive(Debug, Clone)]
pub struct HttpStore {
    endpoint: StoreEndpoint,
    client: reqwest::Client,
}

impl HttpStore {
    /// Create a client with the default 10 second request timeout
    pub fn new(endpoint: StoreEndpoint) -> Result<Self> {
        Self::with_timeout(endpoint, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom request timeout
    pub fn with_timeout(endpoint: StoreEndpoint, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = endpoint.api_key() {
            let mut value = HeaderValue::from_str(key).map_err(|_| Error::InvalidCredential {
                url: endpoint.base_url().to_string(),
            })?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &StoreEndpoint {
        &self.endpoint
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<T, Failure> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Failure::Transport(error_chain(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::Status(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Failure::Transport(error_chain(&e)))
    }
}

#[async_trait]
impl CollectionStore for HttpStore {
    fn url(&self) -> &str {
        self.endpoint.base_url()
    }

    async fn probe(&self) -> ConnectivityReport {
        let url = self.endpoint.base_url();
        match self
            .get_json::<CollectionsResponse>(&self.endpoint.collections_url())
            .await
        {
            Ok(body) => {
                let names: Vec<String> = body
                    .result
                    .collections
                    .into_iter()
                    .map(|c| c.name)
                    .collect();
                tracing::debug!(endpoint = %url, collections = names.len(), "Store connected");
                ConnectivityReport::connected(url, names)
            }
            Err(Failure::Status(code)) => {
                tracing::warn!(endpoint = %url, status = code, "Store answered with error status");
                ConnectivityReport::http_error(url, code)
            }
            Err(Failure::Transport(message)) => {
                tracing::warn!(endpoint = %url, error = %message, "Store unreachable");
                ConnectivityReport::unreachable(url, message)
            }
        }
    }

    async fn stat(&self, name: &str) -> CollectionStat {
        match self
            .get_json::<CollectionInfoResponse>(&self.endpoint.collection_url(name))
            .await
        {
            Ok(body) => {
                let info = body.result;
                CollectionStat {
                    name: name.to_string(),
                    status: Some(info.status.unwrap_or_else(|| "unknown".to_string())),
                    points_count: info.points_count,
                    vectors_count: info.vectors_count,
                    indexed_vectors_count: info.indexed_vectors_count,
                    missing: false,
                    error: None,
                }
            }
            Err(failure) => {
                let error = failure.describe();
                tracing::warn!(
                    endpoint = %self.endpoint,
                    collection = name,
                    error = %error,
                    "Collection lookup failed"
                );
                CollectionStat::failed(name, error)
            }
        }
    }
}

/// Render an error together with its sources, `outer: inner: root`
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
