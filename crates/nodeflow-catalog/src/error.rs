//! Error types for the command catalog.

use thiserror::Error;

/// Catalog result type.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors that can occur in catalog operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    /// Cache missing or corrupt, or no registry configured for refresh.
    #[error("Catalog load error: {0}")]
    Load(String),

    /// Fingerprint mismatch or invalid ed25519 signature.
    #[error("Catalog signature error: {0}")]
    Signature(String),

    /// Configured CLI version does not match the cache.
    #[error("Catalog version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    /// A contribution or command entry violates the contract.
    #[error("Invalid contribution: {0}")]
    Validation(String),

    /// IO error reading or writing the cache file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CatalogError::Load("cache file missing".to_string());
        assert_eq!(err.to_string(), "Catalog load error: cache file missing");

        let err = CatalogError::VersionMismatch {
            expected: "2.1.0".to_string(),
            found: "2.0.0".to_string(),
        };
        assert!(err.to_string().contains("expected 2.1.0"));
    }
}
