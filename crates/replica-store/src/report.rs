//! Reports produced by store queries
//!
//! All of these are transient: produced fresh per query and never cached.

use serde::{Serialize, Serializer};

/// Outcome of probing one endpoint's collection inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connectivity {
    /// Inventory request succeeded
    Connected { collections: Vec<String> },
    /// Store answered with a non-success status code
    Error { http_status: u16 },
    /// Transport failure: DNS, refused connection, timeout, bad body
    Unreachable { message: String },
}

/// Result of probing one [`crate::StoreEndpoint`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityReport {
    pub url: String,
    pub connectivity: Connectivity,
}

impl ConnectivityReport {
    pub fn connected(url: impl Into<String>, collections: Vec<String>) -> Self {
        Self {
            url: url.into(),
            connectivity: Connectivity::Connected { collections },
        }
    }

    pub fn http_error(url: impl Into<String>, http_status: u16) -> Self {
        Self {
            url: url.into(),
            connectivity: Connectivity::Error { http_status },
        }
    }

    pub fn unreachable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connectivity: Connectivity::Unreachable {
                message: message.into(),
            },
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connectivity, Connectivity::Connected { .. })
    }

    /// Collection names; empty unless connected
    pub fn collections(&self) -> &[String] {
        match &self.connectivity {
            Connectivity::Connected { collections } => collections,
            _ => &[],
        }
    }

    /// `connected`, `error` or `unreachable`
    pub fn status(&self) -> &'static str {
        match self.connectivity {
            Connectivity::Connected { .. } => "connected",
            Connectivity::Error { .. } => "error",
            Connectivity::Unreachable { .. } => "unreachable",
        }
    }

    /// Human-readable failure description, if not connected
    pub fn error(&self) -> Option<String> {
        match &self.connectivity {
            Connectivity::Connected { .. } => None,
            Connectivity::Error { http_status } => Some(format!("HTTP {}", http_status)),
            Connectivity::Unreachable { message } => Some(message.clone()),
        }
    }
}

#[derive(Serialize)]
struct ConnectivityWire<'a> {
    status: &'static str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    collection_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    collections: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Serialize for ConnectivityReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // collection_count is derived here so it can never disagree with the list
        let (collection_count, collections, http_status) = match &self.connectivity {
            Connectivity::Connected { collections } => {
                (Some(collections.len()), Some(collections.as_slice()), None)
            }
            Connectivity::Error { http_status } => (None, None, Some(*http_status)),
            Connectivity::Unreachable { .. } => (None, None, None),
        };

        ConnectivityWire {
            status: self.status(),
            url: &self.url,
            collection_count,
            collections,
            http_status,
            error: self.error(),
        }
        .serialize(serializer)
    }
}

/// Snapshot of one collection on one store.
///
/// A collection absent from a store's inventory is represented by
/// [`CollectionStat::missing`], never by omission. A failed lookup carries
/// `error` and no numeric fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStat {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectors_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_vectors_count: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub missing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CollectionStat {
    /// Sentinel for a collection the store does not hold
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points_count: Some(0),
            missing: true,
            ..Default::default()
        }
    }

    /// Stat for a lookup that failed
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Point count used for diffing; absent counts as zero
    pub fn points(&self) -> u64 {
        self.points_count.unwrap_or(0)
    }
}

/// Every collection of one store, plus the probe that discovered them.
///
/// `collections` is empty when the probe did not connect, which makes an
/// unreachable store look like an empty one. Check `connectivity` to tell
/// the two apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub connectivity: ConnectivityReport,
    pub collections: Vec<CollectionStat>,
}
