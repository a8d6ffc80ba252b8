//! Provider ingestion service
//!
//! Entry points the surrounding application calls: index one version,
//! refresh a provider from its release host, compute the latest version and
//! render the Terraform protocol documents.

use async_trait::async_trait;
use provider_registry_core::{LooseVersion, Platform, ProviderVersion};
use provider_registry_db::ProviderStore;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::controller::{IngestionMode, IngestionTransactionController, ReleaseOutcome};
use crate::discovery::{ReleaseDiscoverer, ReleaseLookup};
use crate::dto::{
    provider_integrations, PackageDownloadResponse, ProviderIntegrations, ProviderVersionsResponse,
};
use crate::error::{IngestionError, IngestionResult};
use crate::latest::latest_version;
use crate::snapshot::ProviderSnapshot;

/// Provider version ingestion
#[async_trait]
pub trait ProviderIngestionService: Send + Sync {
    /// Index one version of a provider
    ///
    /// Every failure propagates, including untrusted releases.
    async fn index_version(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> IngestionResult<ProviderVersion>;

    /// Index new releases, newest first, skipping the ones that fail
    ///
    /// `limit` caps the number of newly indexed versions. `Some(0)` means
    /// no limit.
    async fn refresh_versions(
        &self,
        namespace: &str,
        name: &str,
        limit: Option<usize>,
    ) -> IngestionResult<Vec<ProviderVersion>>;

    /// Highest indexed non-beta version
    async fn calculate_latest_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> IngestionResult<Option<ProviderVersion>>;

    /// Terraform versions listing
    async fn versions_document(
        &self,
        namespace: &str,
        name: &str,
    ) -> IngestionResult<ProviderVersionsResponse>;

    /// Terraform download details for one platform binary
    async fn download_details(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
        platform: &Platform,
    ) -> IngestionResult<PackageDownloadResponse>;

    /// Integration endpoints of a provider
    async fn integrations(&self, namespace: &str, name: &str) -> IngestionResult<ProviderIntegrations>;
}

/// Default implementation of ProviderIngestionService
pub struct DefaultProviderIngestionService {
    store: Arc<dyn ProviderStore>,
    discoverer: Arc<dyn ReleaseDiscoverer>,
    controller: Arc<IngestionTransactionController>,
}

impl DefaultProviderIngestionService {
    /// Create a new ingestion service
    pub fn new(
        store: Arc<dyn ProviderStore>,
        discoverer: Arc<dyn ReleaseDiscoverer>,
        controller: Arc<IngestionTransactionController>,
    ) -> Self {
        Self {
            store,
            discoverer,
            controller,
        }
    }
}

#[async_trait]
impl ProviderIngestionService for DefaultProviderIngestionService {
    #[instrument(skip(self), fields(provider = %format!("{}/{}", namespace, name)))]
    async fn index_version(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> IngestionResult<ProviderVersion> {
        let version = normalize_version(version);
        LooseVersion::parse(version)?;

        let mut session = self.store.session().await?;
        let snapshot = ProviderSnapshot::load(session.as_mut(), namespace, name).await?;

        if snapshot.is_indexed(version) {
            return Err(IngestionError::ProviderVersionAlreadyIndexed {
                provider: snapshot.provider.full_id(),
                version: version.to_string(),
            });
        }

        let release = match self.discoverer.get_release(&snapshot, version).await? {
            ReleaseLookup::Found(release) => release,
            ReleaseLookup::AlreadyIndexed => {
                return Err(IngestionError::ProviderVersionAlreadyIndexed {
                    provider: snapshot.provider.full_id(),
                    version: version.to_string(),
                })
            }
            ReleaseLookup::NotFound => {
                return Err(IngestionError::UnableToObtainRelease {
                    provider: snapshot.provider.full_id(),
                    version: version.to_string(),
                    reason: "no matching release on the release host".to_string(),
                })
            }
        };

        let keys = session.list_gpg_keys(&snapshot.provider.namespace).await?;
        self.controller
            .ingest(session.as_mut(), &snapshot, &release, &keys, IngestionMode::Single)
            .await
            .into_result()
    }

    #[instrument(skip(self), fields(provider = %format!("{}/{}", namespace, name)))]
    async fn refresh_versions(
        &self,
        namespace: &str,
        name: &str,
        limit: Option<usize>,
    ) -> IngestionResult<Vec<ProviderVersion>> {
        let mut session = self.store.session().await?;
        let mut snapshot = ProviderSnapshot::load(session.as_mut(), namespace, name).await?;
        let keys = session.list_gpg_keys(&snapshot.provider.namespace).await?;

        let releases = self.discoverer.list_new_releases(&snapshot).await?;
        debug!(candidates = releases.len(), "Discovered new releases");

        let limit = effective_limit(limit);
        let mut indexed = Vec::new();
        let mut skipped = 0usize;
        for release in releases {
            if limit.is_some_and(|limit| indexed.len() >= limit) {
                debug!(limit = ?limit, "Refresh limit reached");
                break;
            }

            match self
                .controller
                .ingest(session.as_mut(), &snapshot, &release, &keys, IngestionMode::Batch)
                .await
            {
                ReleaseOutcome::Committed(version) => {
                    indexed.push(version);
                    snapshot.refresh(session.as_mut()).await?;
                }
                ReleaseOutcome::Skipped(_) => skipped += 1,
                ReleaseOutcome::Fatal(error) => return Err(error),
            }
        }

        info!(indexed = indexed.len(), skipped, "Refresh complete");
        Ok(indexed)
    }

    #[instrument(skip(self), fields(provider = %format!("{}/{}", namespace, name)))]
    async fn calculate_latest_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> IngestionResult<Option<ProviderVersion>> {
        let mut session = self.store.session().await?;
        let snapshot = ProviderSnapshot::load(session.as_mut(), namespace, name).await?;
        Ok(latest_version(&snapshot.versions).cloned())
    }

    #[instrument(skip(self), fields(provider = %format!("{}/{}", namespace, name)))]
    async fn versions_document(
        &self,
        namespace: &str,
        name: &str,
    ) -> IngestionResult<ProviderVersionsResponse> {
        let mut session = self.store.session().await?;
        let snapshot = ProviderSnapshot::load(session.as_mut(), namespace, name).await?;

        let mut versions = Vec::with_capacity(snapshot.versions.len());
        for version in &snapshot.versions {
            let binaries = session.list_binaries(version.id).await?;
            versions.push((version.clone(), binaries));
        }
        Ok(ProviderVersionsResponse::new(&snapshot.provider, versions))
    }

    #[instrument(skip(self), fields(provider = %format!("{}/{}", namespace, name), platform = %platform))]
    async fn download_details(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
        platform: &Platform,
    ) -> IngestionResult<PackageDownloadResponse> {
        let mut session = self.store.session().await?;
        let snapshot = ProviderSnapshot::load(session.as_mut(), namespace, name).await?;
        let version = normalize_version(version);

        let provider_version = session
            .find_version(snapshot.provider.id, version)
            .await?
            .ok_or_else(|| {
                IngestionError::NotFound(format!("{} version {}", snapshot.provider.full_id(), version))
            })?;
        let binary = session
            .list_binaries(provider_version.id)
            .await?
            .into_iter()
            .find(|binary| &binary.platform == platform)
            .ok_or_else(|| {
                IngestionError::NotFound(format!(
                    "{} {} binary for {}",
                    snapshot.provider.full_id(),
                    version,
                    platform
                ))
            })?;
        let keys = session.list_gpg_keys(&snapshot.provider.namespace).await?;

        Ok(PackageDownloadResponse::new(&provider_version, &binary, &keys))
    }

    #[instrument(skip(self), fields(provider = %format!("{}/{}", namespace, name)))]
    async fn integrations(&self, namespace: &str, name: &str) -> IngestionResult<ProviderIntegrations> {
        let mut session = self.store.session().await?;
        let snapshot = ProviderSnapshot::load(session.as_mut(), namespace, name).await?;
        Ok(provider_integrations(&snapshot.provider))
    }
}

/// Versions are stored without the tag's `v` prefix
fn normalize_version(version: &str) -> &str {
    let version = version.trim();
    version.strip_prefix('v').unwrap_or(version)
}

/// A zero limit is no limit
fn effective_limit(limit: Option<usize>) -> Option<usize> {
    limit.filter(|limit| *limit > 0)
}
