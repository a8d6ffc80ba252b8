//! Ingestion error types
//!
//! Errors fall into four classes that decide what a batch refresh does with
//! a failing release: discovery and trust failures skip the release,
//! duplicates are a no-op, anything else aborts the batch.

use provider_registry_core::RegistryError;
use provider_registry_db::DbError;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type IngestionResult<T> = std::result::Result<T, IngestionError>;

/// Ingestion error types
#[derive(Error, Debug)]
pub enum IngestionError {
    /// The version is already in the catalog
    #[error("Provider version already indexed: {provider} {version}")]
    ProviderVersionAlreadyIndexed { provider: String, version: String },

    /// The release host has no such release
    #[error("Unable to obtain release {version} of {provider}: {reason}")]
    UnableToObtainRelease {
        provider: String,
        version: String,
        reason: String,
    },

    /// A required release artifact is absent
    #[error("Missing signature artifact {artifact}: {context}")]
    MissingSignatureArtifact { artifact: String, context: String },

    /// None of the candidate keys can verify the release
    #[error("Could not find GPG key for {release} in namespace {namespace}")]
    CouldNotFindGpgKeyForProviderVersion { release: String, namespace: String },

    /// Detached signature did not verify or could not be read
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Signed manifest could not be parsed
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    /// Downloaded artifact does not match the signed manifest
    #[error("Checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    /// Release version cannot be parsed
    #[error("Invalid version format: {0}")]
    InvalidVersionFormat(String),

    /// Release host refused or failed the request
    #[error("Release host unavailable: {0}")]
    ReleaseHostUnavailable(String),

    /// Release host did not answer in time
    #[error("Release host request timed out: {0}")]
    Timeout(String),

    /// Release host rate limit exhausted after retries
    #[error("Rate limited by release host, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// Provider does not exist
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Indexed version or binary does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Artifact store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal service error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a failure affects the surrounding operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Release could not be fetched; skip it
    Discovery,
    /// Release cannot be trusted; skip it in batch mode
    Trust,
    /// Release is already indexed
    Duplicate,
    /// Anything else; always propagated
    Unexpected,
}

impl IngestionError {
    /// Classify the error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ProviderVersionAlreadyIndexed { .. } => ErrorClass::Duplicate,
            Self::Database(err) if err.is_already_exists() => ErrorClass::Duplicate,
            Self::UnableToObtainRelease { .. }
            | Self::MissingSignatureArtifact { .. }
            | Self::InvalidVersionFormat(_)
            | Self::ReleaseHostUnavailable(_)
            | Self::Timeout(_)
            | Self::RateLimited { .. } => ErrorClass::Discovery,
            Self::CouldNotFindGpgKeyForProviderVersion { .. }
            | Self::InvalidSignature(_)
            | Self::MalformedManifest(_)
            | Self::ChecksumMismatch { .. } => ErrorClass::Trust,
            Self::ProviderNotFound(_)
            | Self::NotFound(_)
            | Self::Database(_)
            | Self::Storage(_)
            | Self::Internal(_) => ErrorClass::Unexpected,
        }
    }

    /// Whether a batch may continue past this error
    pub fn is_recoverable(&self) -> bool {
        self.class() != ErrorClass::Unexpected
    }

    /// Whether this error means the version is already indexed
    pub fn is_duplicate(&self) -> bool {
        self.class() == ErrorClass::Duplicate
    }
}

impl From<RegistryError> for IngestionError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidVersionFormat(msg) => IngestionError::InvalidVersionFormat(msg),
            RegistryError::MalformedManifest(msg) => IngestionError::MalformedManifest(msg),
            RegistryError::ChecksumMismatch {
                filename,
                expected,
                actual,
            } => IngestionError::ChecksumMismatch {
                filename,
                expected,
                actual,
            },
            RegistryError::MissingChecksumEntry(filename) => {
                IngestionError::MissingSignatureArtifact {
                    artifact: filename,
                    context: "not listed in the checksum manifest".to_string(),
                }
            }
            RegistryError::SerializationError(msg) => IngestionError::MalformedManifest(msg),
            _ => IngestionError::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for IngestionError {
    fn from(err: std::io::Error) -> Self {
        IngestionError::Storage(err.to_string())
    }
}
