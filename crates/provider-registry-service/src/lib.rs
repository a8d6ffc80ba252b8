//! Service layer for the Provider Registry
//!
//! This crate ingests provider releases into the catalog. It sits between a
//! release host (through [`ReleaseDiscoverer`]) and the database layer
//! (through `provider_registry_db::ProviderStore`).
//!
//! # Architecture
//!
//! - **GpgKeyResolver**: picks the namespace or default key that signed a release
//! - **ChecksumManifestVerifier**: checks the signed `SHA256SUMS` and each binary
//! - **ReleaseDiscoverer**: lists and downloads releases; [`GithubReleaseDiscoverer`] talks to GitHub
//! - **ProviderVersionExtractor**: runs the per-release verification steps
//! - **IngestionTransactionController**: persists a verified release inside a transaction scope
//! - **ProviderIngestionService**: `index_version`, `refresh_versions`, `calculate_latest_version`
//!
//! # Example
//!
//! ```rust,no_run
//! use provider_registry_db::InMemoryProviderStore;
//! use provider_registry_service::{
//!     DefaultProviderIngestionService, GithubConfig, GithubReleaseDiscoverer, GpgKeyResolver,
//!     IngestionTransactionController, PgpSignatureVerifier, ProviderIngestionService,
//!     ProviderVersionExtractor, DEFAULT_API_URL,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryProviderStore::new());
//! let discoverer = Arc::new(GithubReleaseDiscoverer::new(GithubConfig::new(
//!     DEFAULT_API_URL.parse()?,
//! ))?);
//! let resolver = Arc::new(GpgKeyResolver::new(Arc::new(PgpSignatureVerifier::new()), Vec::new()));
//! let extractor = ProviderVersionExtractor::new(discoverer.clone(), resolver);
//! let controller = Arc::new(IngestionTransactionController::new(extractor));
//!
//! let service = DefaultProviderIngestionService::new(store, discoverer, controller);
//! let indexed = service.refresh_versions("acme", "widgets", Some(5)).await?;
//! println!("indexed {} versions", indexed.len());
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod controller;
pub mod discovery;
pub mod dto;
pub mod error;
pub mod extractor;
pub mod github;
pub mod gpg;
pub mod latest;
pub mod service;
pub mod snapshot;
pub mod storage;

// Re-export main types for convenience
pub use checksum::ChecksumManifestVerifier;
pub use controller::{IngestionMode, IngestionTransactionController, ReleaseOutcome, SkipReason};
pub use discovery::{order_new_releases, ReleaseDiscoverer, ReleaseLookup};
pub use dto::*;
pub use error::{ErrorClass, IngestionError, IngestionResult};
pub use extractor::{
    ExtractionFailure, ExtractionStep, PreparedRelease, ProviderVersionExtractor, VerifiedArtifact,
    VerifiedBinary, VerifiedRelease,
};
pub use github::{GithubConfig, GithubReleaseDiscoverer, DEFAULT_API_URL};
pub use gpg::{GpgKeyResolver, PgpSignatureVerifier, SignatureVerifier};
pub use latest::latest_version;
pub use service::{DefaultProviderIngestionService, ProviderIngestionService};
pub use snapshot::ProviderSnapshot;
pub use storage::{ArtifactStore, LocalArtifactStore};
