//! [`InMemoryStore`]: a [`CollectionStore`] with no network behind it.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use replica_store::{CollectionStat, CollectionStore, ConnectivityReport};

#[derive(Debug, Clone)]
enum Reachability {
    Connected,
    HttpError(u16),
    Unreachable,
}

/// Store double that answers from a fixed list of collections.
///
/// Collections are listed in insertion order, so tests can check that
/// callers sort them.
#[derive(Debug)]
pub struct InMemoryStore {
    url: String,
    reachability: Reachability,
    collections: Vec<(String, u64)>,
    failing: Vec<String>,
    probes: AtomicUsize,
    stats: AtomicUsize,
}

impl InMemoryStore {
    /// A reachable store holding `(name, points)` collections.
    pub fn connected(url: &str, collections: &[(&str, u64)]) -> Self {
        Self {
            url: url.to_string(),
            reachability: Reachability::Connected,
            collections: collections
                .iter()
                .map(|(name, points)| (name.to_string(), *points))
                .collect(),
            failing: Vec::new(),
            probes: AtomicUsize::new(0),
            stats: AtomicUsize::new(0),
        }
    }

    /// A store whose transport always fails.
    pub fn unreachable(url: &str) -> Self {
        Self {
            reachability: Reachability::Unreachable,
            ..Self::connected(url, &[])
        }
    }

    /// A store that answers every request with `code`.
    pub fn http_error(url: &str, code: u16) -> Self {
        Self {
            reachability: Reachability::HttpError(code),
            ..Self::connected(url, &[])
        }
    }

    /// Keep `name` listed but make its stat lookup fail.
    pub fn with_failing_stat(mut self, name: &str) -> Self {
        self.failing.push(name.to_string());
        self
    }

    /// Number of `probe` calls so far
    pub fn probe_calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Number of `stat` calls so far
    pub fn stat_calls(&self) -> usize {
        self.stats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CollectionStore for InMemoryStore {
    fn url(&self) -> &str {
        &self.url
    }

    async fn probe(&self) -> ConnectivityReport {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match self.reachability {
            Reachability::Connected => ConnectivityReport::connected(
                &self.url,
                self.collections.iter().map(|(name, _)| name.clone()).collect(),
            ),
            Reachability::HttpError(code) => ConnectivityReport::http_error(&self.url, code),
            Reachability::Unreachable => {
                ConnectivityReport::unreachable(&self.url, "connection refused")
            }
        }
    }

    async fn stat(&self, name: &str) -> CollectionStat {
        self.stats.fetch_add(1, Ordering::SeqCst);
        match self.reachability {
            Reachability::Connected => {}
            Reachability::HttpError(code) => {
                return CollectionStat::failed(name, format!("HTTP {}", code));
            }
            Reachability::Unreachable => {
                return CollectionStat::failed(name, "connection refused");
            }
        }
        if self.failing.iter().any(|f| f == name) {
            return CollectionStat::failed(name, "HTTP 500");
        }

        match self.collections.iter().find(|(n, _)| n == name) {
            Some((_, points)) => CollectionStat {
                name: name.to_string(),
                status: Some("green".to_string()),
                points_count: Some(*points),
                vectors_count: Some(*points),
                indexed_vectors_count: Some(*points),
                missing: false,
                error: None,
            },
            None => CollectionStat::failed(name, "HTTP 404"),
        }
    }
}
