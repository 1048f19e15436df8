//! Tool catalogue
//!
//! The closed set of operations the server exposes, with their argument
//! schemas.
//!
//! ## Forward (local to remote)
//! - `sync_all` - Full sync, requires `confirm=true`
//! - `sync_collection` - Sync one collection
//! - `sync_dry_run` - Preview a full sync
//!
//! ## Reverse (remote to local)
//! - `sync_from_remote_all` - Full sync, requires `confirm=true`
//! - `sync_from_remote_collection` - Sync one collection
//! - `sync_from_remote_dry_run` - Preview a full sync
//!
//! ## Read-only
//! - `sync_status` - Connectivity of both stores
//! - `compare_collections` - Diff collections and point counts
//! - `sync_logs` - Recent sync logs

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Tool definition for MCP protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Result from a tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Content types for tool results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: content.into(),
            }],
            is_error: None,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: Some(true),
        }
    }
}

/// Every operation the dispatcher knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SyncStatus,
    SyncAll,
    SyncCollection,
    SyncDryRun,
    SyncLogs,
    CompareCollections,
    SyncFromRemoteAll,
    SyncFromRemoteCollection,
    SyncFromRemoteDryRun,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::SyncStatus,
        Operation::SyncAll,
        Operation::SyncCollection,
        Operation::SyncDryRun,
        Operation::SyncLogs,
        Operation::CompareCollections,
        Operation::SyncFromRemoteAll,
        Operation::SyncFromRemoteCollection,
        Operation::SyncFromRemoteDryRun,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::SyncStatus => "sync_status",
            Operation::SyncAll => "sync_all",
            Operation::SyncCollection => "sync_collection",
            Operation::SyncDryRun => "sync_dry_run",
            Operation::SyncLogs => "sync_logs",
            Operation::CompareCollections => "compare_collections",
            Operation::SyncFromRemoteAll => "sync_from_remote_all",
            Operation::SyncFromRemoteCollection => "sync_from_remote_collection",
            Operation::SyncFromRemoteDryRun => "sync_from_remote_dry_run",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    fn description(&self) -> &'static str {
        match self {
            Operation::SyncStatus => {
                "Check connectivity of both stores (local and remote). Returns connection \
                 status, collection count and collection names for each. Use this to verify \
                 both stores are reachable before syncing."
            }
            Operation::SyncAll => {
                "Run a full sync of ALL collections from the local store to the remote store. \
                 WARNING: this may take 5-10 minutes depending on data volume. Requires \
                 confirm=true. Returns the sync procedure's exit code and output."
            }
            Operation::SyncCollection => {
                "Sync a single collection from the local store to the remote store. Use this \
                 for targeted syncs after updating specific collections."
            }
            Operation::SyncDryRun => {
                "Preview what a local to remote sync would transfer without moving any data."
            }
            Operation::SyncLogs => {
                "View recent sync logs, newest first. Useful for debugging failed syncs or \
                 reviewing sync history."
            }
            Operation::CompareCollections => {
                "Compare collections between the local and remote stores: which exist on each \
                 side, point counts, and discrepancies. Compares all collections unless \
                 collection_name is given."
            }
            Operation::SyncFromRemoteAll => {
                "Run a full sync of ALL collections from the remote store to the local store. \
                 This is the REVERSE direction. WARNING: this may take 5-10 minutes. Requires \
                 confirm=true."
            }
            Operation::SyncFromRemoteCollection => {
                "Sync a single collection from the remote store to the local store. This is \
                 the REVERSE direction; use it to pull remote changes."
            }
            Operation::SyncFromRemoteDryRun => {
                "Preview what a remote to local sync would transfer without moving any data."
            }
        }
    }

    fn input_schema(&self) -> Value {
        match self {
            Operation::SyncStatus
            | Operation::SyncDryRun
            | Operation::SyncFromRemoteDryRun => json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            Operation::SyncAll | Operation::SyncFromRemoteAll => json!({
                "type": "object",
                "properties": {
                    "confirm": {
                        "type": "boolean",
                        "description": "Set to true to confirm you want to sync all collections"
                    }
                },
                "required": ["confirm"]
            }),
            Operation::SyncCollection | Operation::SyncFromRemoteCollection => json!({
                "type": "object",
                "properties": {
                    "collection_name": {
                        "type": "string",
                        "description": "Name of the collection to sync"
                    }
                },
                "required": ["collection_name"]
            }),
            Operation::SyncLogs => json!({
                "type": "object",
                "properties": {
                    "count": {
                        "type": "integer",
                        "description": "Number of recent log files to retrieve (default: 3, max: 10)",
                        "default": 3,
                        "minimum": 1,
                        "maximum": 10
                    },
                    "latest_only": {
                        "type": "boolean",
                        "description": "If true, only return the most recent log file",
                        "default": false
                    }
                },
                "required": []
            }),
            Operation::CompareCollections => json!({
                "type": "object",
                "properties": {
                    "collection_name": {
                        "type": "string",
                        "description": "Optional: compare this collection only. If omitted, compares all collections."
                    }
                },
                "required": []
            }),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Definitions of every tool, in catalogue order
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    Operation::ALL.iter().map(Operation::definition).collect()
}
