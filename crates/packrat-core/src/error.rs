//! Error types for packrat-core

use thiserror::Error;

/// Result type alias using packrat-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in packrat-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store HTTP transport error
    #[error("Remote request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote store rejected the request (API error body)
    #[error("Remote API error: {0}")]
    Remote(String),

    /// Remote row-policy / authorization rejection
    #[error("Remote policy rejection: {0}")]
    PolicyRejection(String),

    /// No authenticated session for an operation that requires one
    #[error("Not authenticated: {0}")]
    Auth(String),

    /// A sync cycle is already running
    #[error("Sync already in progress")]
    SyncInProgress,
}

impl Error {
    /// Whether this error came from a remote authorization / row-policy check.
    #[must_use]
    pub const fn is_policy_rejection(&self) -> bool {
        matches!(self, Self::PolicyRejection(_))
    }
}
