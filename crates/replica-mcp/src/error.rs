//! Error types for the MCP server

use replica_core::FailureKind;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Faults of the server itself, as opposed to failed operations
#[derive(Debug, Error)]
pub enum Error {
    /// Error from settings loading or component construction
    #[error("core error: {0}")]
    Core(#[from] replica_core::Error),

    /// Error during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading stdin or writing stdout failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A named operation that did not produce a result.
///
/// Rendered to the caller as `{"error": message, "kind": kind, "hint": hint}`
/// with `hint` omitted when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct OperationError {
    #[serde(rename = "error")]
    pub message: String,
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl OperationError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn missing_argument(name: &str) -> Self {
        Self::new(FailureKind::MissingArgument, format!("{} is required", name))
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidArgument, message)
    }

    pub fn unknown_operation(name: &str) -> Self {
        Self::new(
            FailureKind::UnknownOperation,
            format!("Unknown tool: {}", name),
        )
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!(self)
    }
}
