//! Storage abstractions for provider version ingestion
//!
//! A [`ProviderStore`] hands out [`StoreSession`]s. A session owns one
//! connection and its nested transaction scopes, so every read and write made
//! through it observes the session's uncommitted state. Implementations must
//! be thread-safe (Send + Sync) for use in async contexts.

use async_trait::async_trait;
use provider_registry_core::{
    GpgKey, NewProviderBinary, NewProviderVersion, Provider, ProviderBinary, ProviderId,
    ProviderVersion, ProviderVersionId,
};

use crate::error::DbResult;

/// Factory for database sessions
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Acquire a session with no open transaction
    async fn session(&self) -> DbResult<Box<dyn StoreSession>>;

    /// Check database connectivity
    async fn health_check(&self) -> DbResult<()>;
}

/// A connection with nested transaction scopes
///
/// The first [`begin`](StoreSession::begin) opens a transaction; later calls
/// open savepoints. Writes made outside any scope are committed immediately.
/// Dropping a session with open scopes discards their writes.
#[async_trait]
pub trait StoreSession: Send {
    /// Open a (possibly nested) transaction scope
    async fn begin(&mut self) -> DbResult<()>;

    /// Close the innermost scope, keeping its writes
    ///
    /// # Returns
    /// * `Err(DbError::UniqueViolation)` - If closing the outermost scope
    ///   conflicts with rows committed concurrently
    async fn commit(&mut self) -> DbResult<()>;

    /// Close the innermost scope, discarding its writes
    async fn rollback(&mut self) -> DbResult<()>;

    /// Number of open scopes
    fn transaction_depth(&self) -> usize;

    /// Find a provider by namespace and name
    async fn find_provider(&mut self, namespace: &str, name: &str) -> DbResult<Option<Provider>>;

    /// Load a provider by id
    async fn get_provider(&mut self, id: ProviderId) -> DbResult<Option<Provider>>;

    /// All indexed versions of a provider, in insertion order
    async fn list_versions(&mut self, provider_id: ProviderId) -> DbResult<Vec<ProviderVersion>>;

    /// Find an indexed version by its version string
    async fn find_version(
        &mut self,
        provider_id: ProviderId,
        version: &str,
    ) -> DbResult<Option<ProviderVersion>>;

    /// Load an indexed version by id
    async fn get_version(&mut self, id: ProviderVersionId) -> DbResult<Option<ProviderVersion>>;

    /// Binaries of an indexed version, ordered by platform
    async fn list_binaries(&mut self, version_id: ProviderVersionId) -> DbResult<Vec<ProviderBinary>>;

    /// GPG keys registered for a namespace (case-insensitive)
    async fn list_gpg_keys(&mut self, namespace: &str) -> DbResult<Vec<GpgKey>>;

    /// Insert a version row
    ///
    /// # Returns
    /// * `Err(DbError::UniqueViolation)` - If the provider already has the version
    async fn insert_version(&mut self, version: NewProviderVersion) -> DbResult<ProviderVersion>;

    /// Insert a binary row for a version
    ///
    /// # Returns
    /// * `Err(DbError::UniqueViolation)` - If the version already has a binary
    ///   for the platform
    async fn insert_binary(
        &mut self,
        version_id: ProviderVersionId,
        binary: NewProviderBinary,
    ) -> DbResult<ProviderBinary>;

    /// Point the provider at its latest version
    async fn set_latest_version(
        &mut self,
        provider_id: ProviderId,
        version_id: Option<ProviderVersionId>,
    ) -> DbResult<()>;
}
