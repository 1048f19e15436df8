//! Core of Replica Sync
//!
//! - [`config`]: [`Settings`], loaded once from flags, a `KEY=VALUE` file and defaults
//! - [`reconcile`]: [`Reconciler`], which probes and diffs the local and remote stores
//! - [`driver`]: [`SyncDriver`], which runs the external sync procedures
//! - [`logs`]: [`LogReader`], which returns the newest sync logs
//!
//! Store and subprocess failures are reported as data. [`Error`] only
//! covers faults that stop a component from being built or a directory
//! from being listed.

pub mod config;
pub mod driver;
pub mod error;
pub mod logs;
pub mod reconcile;

pub use config::{Overrides, Settings, parse_env_file};
pub use driver::{
    SyncDirection, SyncDriver, SyncInvocation, SyncMode, SyncOutcome, SyncResult, SyncRunner,
};
pub use error::{Error, FailureKind, Result};
pub use logs::{LogArtifact, LogBody, LogReader};
pub use reconcile::{
    CollectionComparison, Comparison, FullComparison, ReconciliationEntry, ReconciliationSummary,
    Reconciler, Scope, StatusReport,
};
