//! Error types for the Volume Backup Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist (or no longer exists)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency conflict on write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Remote target reports an operation still in progress
    #[error("Operation in progress: {0}")]
    InProgress(String),

    /// Remote backup target error
    #[error("Backup target error: {0}")]
    Remote(String),

    /// Storage engine error
    #[error("Engine error: {0}")]
    Engine(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Secret not found
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Create a backup target error
    pub fn remote(msg: impl Into<String>) -> Self {
        Error::Remote(msg.into())
    }

    /// Create an engine error
    pub fn engine(msg: impl Into<String>) -> Self {
        Error::Engine(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// True when the error means the object is already gone.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) | Error::SecretNotFound(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// True when the error is a stale resourceVersion rejection.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }

    /// True when the remote target is still busy with this backup.
    pub fn is_in_progress(&self) -> bool {
        match self {
            Error::InProgress(_) => true,
            Error::Remote(msg) => msg.contains("in progress"),
            _ => false,
        }
    }
}
