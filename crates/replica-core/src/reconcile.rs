//! Dual-store reconciliation
//!
//! [`Reconciler`] reads both stores and diffs them. It holds no state
//! between calls: every report is rebuilt from fresh queries, so repeated
//! calls against unchanged stores give identical results (timestamps aside).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use replica_store::{CollectionStat, CollectionStore, ConnectivityReport};
use serde::Serialize;

/// Which collections a comparison covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    One(String),
}

/// Result of [`Reconciler::status`]
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub timestamp: String,
    pub local: ConnectivityReport,
    pub remote: ConnectivityReport,
    /// Both stores connected
    pub ready: bool,
}

/// One row of a comparison.
///
/// `in_sync` implies `difference == 0` and neither `*_only` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationEntry {
    pub name: String,
    pub local_points: u64,
    pub remote_points: u64,
    /// `local_points - remote_points`
    pub difference: i64,
    pub in_sync: bool,
    pub local_only: bool,
    pub remote_only: bool,
}

impl ReconciliationEntry {
    /// Build a row from one stat per side.
    ///
    /// Failed lookups count as zero points and are not flagged; only the
    /// `missing` sentinel marks a side as absent.
    pub fn from_stats(name: &str, local: &CollectionStat, remote: &CollectionStat) -> Self {
        let local_points = local.points();
        let remote_points = remote.points();
        let local_only = !local.missing && remote.missing;
        let remote_only = local.missing && !remote.missing;

        Self {
            name: name.to_string(),
            local_points,
            remote_points,
            difference: signed_difference(local_points, remote_points),
            in_sync: local_points == remote_points && !local.missing && !remote.missing,
            local_only,
            remote_only,
        }
    }
}

/// Aggregate over every entry of an all-collections comparison
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationSummary {
    /// Distinct names across both stores
    pub total_collections: usize,
    pub local_collections: usize,
    pub remote_collections: usize,
    pub out_of_sync: usize,
    pub total_local_points: u64,
    pub total_remote_points: u64,
    pub total_difference: i64,
}

impl ReconciliationSummary {
    /// Fold entries into a summary.
    ///
    /// A side's collection count excludes the names only the other side has.
    pub fn from_entries(entries: &[ReconciliationEntry]) -> Self {
        let mut summary = Self {
            total_collections: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            if !entry.remote_only {
                summary.local_collections += 1;
            }
            if !entry.local_only {
                summary.remote_collections += 1;
            }
            if !entry.in_sync {
                summary.out_of_sync += 1;
            }
            summary.total_local_points =
                summary.total_local_points.saturating_add(entry.local_points);
            summary.total_remote_points =
                summary.total_remote_points.saturating_add(entry.remote_points);
        }
        summary.total_difference =
            signed_difference(summary.total_local_points, summary.total_remote_points);
        summary
    }
}

/// Comparison of every collection on either store
#[derive(Debug, Clone, Serialize)]
pub struct FullComparison {
    pub timestamp: String,
    pub local: ConnectivityReport,
    pub remote: ConnectivityReport,
    pub collections: Vec<ReconciliationEntry>,
    pub summary: ReconciliationSummary,
}

/// Comparison of a single named collection, with the raw stats behind it
#[derive(Debug, Clone, Serialize)]
pub struct CollectionComparison {
    pub collection: String,
    pub entry: ReconciliationEntry,
    pub local: CollectionStat,
    pub remote: CollectionStat,
}

/// Result of [`Reconciler::compare`]
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Comparison {
    All(FullComparison),
    One(CollectionComparison),
}

/// Reads two stores and reports how they differ
#[derive(Clone)]
pub struct Reconciler {
    local: Arc<dyn CollectionStore>,
    remote: Arc<dyn CollectionStore>,
}

impl Reconciler {
    pub fn new(local: Arc<dyn CollectionStore>, remote: Arc<dyn CollectionStore>) -> Self {
        Self { local, remote }
    }

    /// Probe both stores concurrently
    pub async fn status(&self) -> StatusReport {
        let (local, remote) = tokio::join!(self.local.probe(), self.remote.probe());
        let ready = local.is_connected() && remote.is_connected();
        tracing::debug!(
            local = local.status(),
            remote = remote.status(),
            ready,
            "Status checked"
        );

        StatusReport {
            timestamp: now(),
            local,
            remote,
            ready,
        }
    }

    pub async fn compare(&self, scope: Scope) -> Comparison {
        match scope {
            Scope::All => Comparison::All(self.compare_all().await),
            Scope::One(name) => Comparison::One(self.compare_one(&name).await),
        }
    }

    /// Stat one collection on both stores.
    ///
    /// No `missing` sentinel is applied here: a collection absent from a
    /// store shows up as a failed stat with zero points.
    async fn compare_one(&self, name: &str) -> CollectionComparison {
        let (local, remote) = tokio::join!(self.local.stat(name), self.remote.stat(name));
        let local_points = local.points();
        let remote_points = remote.points();

        let entry = ReconciliationEntry {
            name: name.to_string(),
            local_points,
            remote_points,
            difference: signed_difference(local_points, remote_points),
            in_sync: local_points == remote_points,
            local_only: false,
            remote_only: false,
        };

        CollectionComparison {
            collection: name.to_string(),
            entry,
            local,
            remote,
        }
    }

    async fn compare_all(&self) -> FullComparison {
        let (local, remote) = tokio::join!(
            self.local.inventory_with_stats(),
            self.remote.inventory_with_stats()
        );

        let local_stats: BTreeMap<&str, &CollectionStat> = local
            .collections
            .iter()
            .map(|s| (s.name.as_str(), s))
            .collect();
        let remote_stats: BTreeMap<&str, &CollectionStat> = remote
            .collections
            .iter()
            .map(|s| (s.name.as_str(), s))
            .collect();

        let names: BTreeSet<&str> = local_stats
            .keys()
            .chain(remote_stats.keys())
            .copied()
            .collect();

        let collections: Vec<ReconciliationEntry> = names
            .into_iter()
            .map(|name| {
                let local = stat_or_missing(&local_stats, name);
                let remote = stat_or_missing(&remote_stats, name);
                ReconciliationEntry::from_stats(name, &local, &remote)
            })
            .collect();

        let summary = ReconciliationSummary::from_entries(&collections);
        tracing::info!(
            collections = summary.total_collections,
            out_of_sync = summary.out_of_sync,
            total_difference = summary.total_difference,
            "Compared stores"
        );

        FullComparison {
            timestamp: now(),
            local: local.connectivity,
            remote: remote.connectivity,
            collections,
            summary,
        }
    }
}

fn stat_or_missing(stats: &BTreeMap<&str, &CollectionStat>, name: &str) -> CollectionStat {
    stats
        .get(name)
        .map(|s| (*s).clone())
        .unwrap_or_else(|| CollectionStat::missing(name))
}

fn signed_difference(local: u64, remote: u64) -> i64 {
    (i128::from(local) - i128::from(remote)).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
