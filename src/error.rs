//! Error types for the backups operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist in the store
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Stale write or duplicate create rejected by the store
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration error (malformed durations, cron expressions, env values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Endpoint resolution error (URL parsing, DNS lookup)
    #[error("Endpoint error: {0}")]
    Endpoint(String),

    /// Backup service returned an error or an unexpected response
    #[error("Backup service error: {0}")]
    Adapter(String),

    /// Remote export storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Schedule(String),

    /// Secret not found
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// A phase change outside the transition graph was requested
    #[error("Invalid phase transition: {0}")]
    InvalidTransition(String),

    /// The surrounding reconcile was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create an endpoint resolution error
    pub fn endpoint(msg: impl Into<String>) -> Self {
        Error::Endpoint(msg.into())
    }

    /// Create a backup service error
    pub fn adapter(msg: impl Into<String>) -> Self {
        Error::Adapter(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a scheduler error
    pub fn schedule(msg: impl Into<String>) -> Self {
        Error::Schedule(msg.into())
    }

    /// True when the object store reported the object as missing
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}
