//! Error types for replica-core

use std::path::PathBuf;

use serde::Serialize;

/// Result type for replica-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Faults that stop a component from being built.
///
/// Failures of the stores, the sync procedure or individual log files are
/// reported as data and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list log directory {path}: {source}")]
    LogDirRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Home directory could not be determined")]
    NoHomeDir,

    #[error(transparent)]
    Store(#[from] replica_store::Error),
}

/// Closed taxonomy of failures surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Store transport failed
    ConnectivityFailure,
    /// Store answered with a non-success status
    RemoteFault,
    /// Full sync requested without `confirm=true`
    ConfirmationRequired,
    /// Required argument absent or empty
    MissingArgument,
    /// Argument present with the wrong type
    InvalidArgument,
    /// Sync procedure ran past its wall-clock budget
    TimeoutExceeded,
    /// Sync procedure could not be started
    LaunchFailure,
    /// Another sync in the same direction is running
    SyncInProgress,
    UnknownOperation,
    /// One log file could not be read
    LogReadFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ConnectivityFailure => "connectivity_failure",
            FailureKind::RemoteFault => "remote_fault",
            FailureKind::ConfirmationRequired => "confirmation_required",
            FailureKind::MissingArgument => "missing_argument",
            FailureKind::InvalidArgument => "invalid_argument",
            FailureKind::TimeoutExceeded => "timeout_exceeded",
            FailureKind::LaunchFailure => "launch_failure",
            FailureKind::SyncInProgress => "sync_in_progress",
            FailureKind::UnknownOperation => "unknown_operation",
            FailureKind::LogReadFailure => "log_read_failure",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
