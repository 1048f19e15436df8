//! Collection store client for Replica Sync
//!
//! This crate talks to one collection-oriented store over its REST query
//! interface. It answers three questions about a single endpoint:
//!
//! - Is it reachable, and which collections does it hold? ([`CollectionStore::probe`])
//! - What does one collection look like? ([`CollectionStore::stat`])
//! - What does every collection look like? ([`CollectionStore::inventory_with_stats`])
//!
//! Remote failures never surface as `Err`. An unreachable store or a non-2xx
//! response is folded into the returned report so callers always receive a
//! well-formed value.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod report;

pub use client::{CollectionStore, DEFAULT_REQUEST_TIMEOUT, HttpStore};
pub use endpoint::StoreEndpoint;
pub use error::{Error, Result};
pub use report::{CollectionStat, Connectivity, ConnectivityReport, Inventory};
