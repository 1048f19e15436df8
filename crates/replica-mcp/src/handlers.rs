//! Operation dispatcher
//!
//! Maps tool names to the reconciler, the sync driver and the log reader.
//! Every outcome is either a JSON payload or an [`OperationError`]; nothing
//! here fails at the protocol level.

use std::sync::Arc;

use replica_core::{
    FailureKind, LogReader, Reconciler, Scope, Settings, SyncDirection, SyncDriver,
    SyncInvocation, SyncRunner,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::Result;
use crate::error::OperationError;
use crate::tools::Operation;

const DEFAULT_LOG_COUNT: i64 = 3;
const MAX_LOG_COUNT: i64 = 10;

#[derive(Debug, Default, Deserialize)]
struct ConfirmArgs {
    confirm: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct CollectionArgs {
    collection_name: Option<String>,
}

impl CollectionArgs {
    /// The name as given, if present and not blank
    fn name(&self) -> Option<&str> {
        self.collection_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
struct LogsArgs {
    count: Option<i64>,
    latest_only: Option<bool>,
}

impl LogsArgs {
    fn effective_count(&self) -> usize {
        if self.latest_only.unwrap_or(false) {
            return 1;
        }
        self.count
            .unwrap_or(DEFAULT_LOG_COUNT)
            .clamp(1, MAX_LOG_COUNT) as usize
    }
}

/// Parse tool arguments. `null` means "no arguments".
fn parse_args<T: DeserializeOwned>(arguments: Value) -> std::result::Result<T, OperationError> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        Value::Object(_) => arguments,
        other => {
            return Err(OperationError::invalid_argument(format!(
                "arguments must be an object, got {}",
                other
            )));
        }
    };
    serde_json::from_value(arguments).map_err(|e| OperationError::invalid_argument(e.to_string()))
}

/// Executes named operations against the configured stores and procedures
#[derive(Clone)]
pub struct Dispatcher {
    reconciler: Reconciler,
    driver: Arc<dyn SyncRunner>,
    logs: LogReader,
}

impl Dispatcher {
    pub fn new(reconciler: Reconciler, driver: Arc<dyn SyncRunner>, logs: LogReader) -> Self {
        Self {
            reconciler,
            driver,
            logs,
        }
    }

    /// Wire up HTTP stores, the process driver and the log reader
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let (local, remote) = settings.stores()?;
        Ok(Self::new(
            Reconciler::new(Arc::new(local), Arc::new(remote)),
            Arc::new(SyncDriver::from_settings(settings)),
            LogReader::new(&settings.log_dir, &settings.log_prefix),
        ))
    }

    /// Run the operation called `name`
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Value,
    ) -> std::result::Result<Value, OperationError> {
        let Some(operation) = Operation::from_name(name) else {
            tracing::warn!(tool = name, "Unknown tool requested");
            return Err(OperationError::unknown_operation(name));
        };
        tracing::debug!(tool = name, "Dispatching");

        match operation {
            Operation::SyncStatus => Ok(to_payload(&self.reconciler.status().await)),
            Operation::CompareCollections => {
                let args: CollectionArgs = parse_args(arguments)?;
                let scope = match args.name() {
                    Some(name) => Scope::One(name.to_string()),
                    None => Scope::All,
                };
                Ok(to_payload(&self.reconciler.compare(scope).await))
            }
            Operation::SyncLogs => self.sync_logs(parse_args(arguments)?).await,

            Operation::SyncAll => {
                self.full_sync(SyncDirection::Forward, parse_args(arguments)?)
                    .await
            }
            Operation::SyncCollection => {
                self.collection_sync(SyncDirection::Forward, parse_args(arguments)?)
                    .await
            }
            Operation::SyncDryRun => {
                self.run(SyncInvocation::dry_run(SyncDirection::Forward)).await
            }

            Operation::SyncFromRemoteAll => {
                self.full_sync(SyncDirection::Reverse, parse_args(arguments)?)
                    .await
            }
            Operation::SyncFromRemoteCollection => {
                self.collection_sync(SyncDirection::Reverse, parse_args(arguments)?)
                    .await
            }
            Operation::SyncFromRemoteDryRun => {
                self.run(SyncInvocation::dry_run(SyncDirection::Reverse)).await
            }
        }
    }

    async fn full_sync(
        &self,
        direction: SyncDirection,
        args: ConfirmArgs,
    ) -> std::result::Result<Value, OperationError> {
        if !args.confirm.unwrap_or(false) {
            tracing::info!(%direction, "Full sync refused without confirmation");
            return Err(OperationError::new(
                FailureKind::ConfirmationRequired,
                "Confirmation required. Set confirm=true to proceed with full sync.",
            )
            .with_hint(format!(
                "Set confirm=true. This will sync all collections {} and may take 5-10 minutes.",
                from_to(direction)
            )));
        }
        self.run(SyncInvocation::full(direction)).await
    }

    async fn collection_sync(
        &self,
        direction: SyncDirection,
        args: CollectionArgs,
    ) -> std::result::Result<Value, OperationError> {
        let Some(name) = args.name() else {
            return Err(OperationError::missing_argument("collection_name"));
        };
        self.run(SyncInvocation::collection(direction, name)).await
    }

    async fn run(&self, invocation: SyncInvocation) -> std::result::Result<Value, OperationError> {
        let result = self.driver.run(invocation).await;

        match result.failure() {
            None => Ok(to_payload(&result)),
            Some((kind, error)) => {
                let err = OperationError::new(kind, error);
                Err(match kind {
                    FailureKind::SyncInProgress => {
                        err.with_hint("Wait for the running sync to finish, then retry.")
                    }
                    FailureKind::LaunchFailure => {
                        err.with_hint("Check that the sync script exists and is executable.")
                    }
                    _ => err,
                })
            }
        }
    }

    async fn sync_logs(&self, args: LogsArgs) -> std::result::Result<Value, OperationError> {
        let count = args.effective_count();
        let reader = self.logs.clone();

        let logs = tokio::task::spawn_blocking(move || reader.recent(count))
            .await
            .map_err(|e| {
                OperationError::new(
                    FailureKind::LogReadFailure,
                    format!("Log reader failed: {}", e),
                )
            })?
            .map_err(|e| OperationError::new(FailureKind::LogReadFailure, e.to_string()))?;

        Ok(json!({
            "log_dir": self.logs.dir().display().to_string(),
            "requested": count,
            "logs": logs,
        }))
    }
}

fn from_to(direction: SyncDirection) -> &'static str {
    match direction {
        SyncDirection::Forward => "from local to remote",
        SyncDirection::Reverse => "from remote to local",
    }
}

fn to_payload<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}
