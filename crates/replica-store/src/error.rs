//! Error types for replica-store

/// Result type for replica-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Construction-time failures.
///
/// Query failures are reported as data (see [`crate::ConnectivityReport`]),
/// so the only errors left are the ones that stop a client from being built.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid store URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Credential for {url} is not a valid header value")]
    InvalidCredential { url: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
