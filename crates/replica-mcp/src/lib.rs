//! MCP Server for Replica Sync
//!
//! This crate exposes the Replica Sync operations via the Model Context Protocol (MCP),
//! so an assistant can check both vector stores, compare their collections, run sync
//! procedures in either direction and read the sync logs.
//!
//! # Architecture
//!
//! ```text
//! [ MCP Client ]
//!        | (JSON-RPC over stdio)
//!        v
//! [ replica-mcp (ReplicaMcpServer -> Dispatcher) ]
//!        | (Rust API)
//!        v
//! [ replica-core (Reconciler, SyncDriver, LogReader) ]
//!        |
//!        +--> [ replica-store (local + remote HTTP stores) ]
//!        +--> [ sync scripts (child process groups) ]
//!        +--> [ log directory ]
//! ```
//!
//! # Tools
//!
//! - Read-only: `sync_status`, `compare_collections`, `sync_logs`
//! - Local to remote: `sync_all`, `sync_collection`, `sync_dry_run`
//! - Remote to local: `sync_from_remote_all`, `sync_from_remote_collection`,
//!   `sync_from_remote_dry_run`
//!
//! Full syncs in either direction refuse to start without `confirm=true`.

pub mod error;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod tools;

pub use error::{Error, OperationError, Result};
pub use handlers::Dispatcher;
pub use server::ReplicaMcpServer;
pub use tools::{Operation, ToolContent, ToolDefinition, ToolResult, get_tool_definitions};
