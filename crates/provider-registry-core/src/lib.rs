//! Core domain models and types for the Provider Registry
//!
//! This crate contains the data structures and pure domain logic behind
//! provider version ingestion: loose version ordering, checksum manifests,
//! release metadata and the provider / version / binary / GPG key records.

pub mod checksum;
pub mod error;
pub mod release;
pub mod types;
pub mod version;

// Re-exports for convenience
pub use checksum::{sha256_hex, Checksum, ChecksumManifest};
pub use error::{RegistryError, Result};
pub use release::{PluginManifest, ReleaseArtifactNames, ReleaseAsset, ReleaseMetadata};
pub use types::{
    normalize_key_id, repository_name_to_provider_name, GpgKey, NewProviderBinary,
    NewProviderVersion, Platform, Provider, ProviderBinary, ProviderId, ProviderTier,
    ProviderVersion, ProviderVersionId, DEFAULT_PROTOCOL_VERSIONS,
};
pub use version::{sort_versions, LooseVersion};
