// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Error types for the NodeFlow runtime.

use thiserror::Error;

/// Runtime result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The registry could not resolve a service.
    #[error("Registry resolution failed: {0}")]
    RegistryResolutionFailed(String),

    /// Feature reserved for a later version.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// No event bus was injected or resolvable from the container.
    #[error("Event bus not available")]
    EventBusNotAvailable,

    /// An effect or tool operation failed.
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// Input constraints violated.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Deadline exceeded.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A referenced resource does not exist.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Event bus publish failed.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
