//! Error types for the Provider Registry domain

use thiserror::Error;

/// Result type alias for domain operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Main error type for domain-level validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Version string has no parseable major component
    #[error("Invalid version format: {0}")]
    InvalidVersionFormat(String),

    /// Checksum manifest could not be parsed
    #[error("Malformed checksum manifest: {0}")]
    MalformedManifest(String),

    /// Content hash does not match the manifest entry
    #[error("Checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    /// File is not listed in the checksum manifest
    #[error("No checksum entry for {0}")]
    MissingChecksumEntry(String),

    /// Repository name does not follow the provider naming convention
    #[error("Invalid repository name: {0}")]
    InvalidRepositoryName(String),

    /// Provider tier is not recognised
    #[error("Invalid provider tier: {0}")]
    InvalidProviderTier(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::SerializationError(err.to_string())
    }
}
