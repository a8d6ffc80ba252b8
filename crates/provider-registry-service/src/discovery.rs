//! Release discovery contract

use async_trait::async_trait;
use provider_registry_core::{LooseVersion, ReleaseAsset, ReleaseMetadata};
use tracing::warn;

use crate::error::IngestionResult;
use crate::snapshot::ProviderSnapshot;

/// Result of looking up a single release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseLookup {
    Found(ReleaseMetadata),
    AlreadyIndexed,
    NotFound,
}

/// Source of provider releases
#[async_trait]
pub trait ReleaseDiscoverer: Send + Sync {
    /// Releases not yet indexed, newest first
    async fn list_new_releases(&self, snapshot: &ProviderSnapshot) -> IngestionResult<Vec<ReleaseMetadata>>;

    /// Look up one release by version
    async fn get_release(&self, snapshot: &ProviderSnapshot, version: &str) -> IngestionResult<ReleaseLookup>;

    /// Download the content of a release asset
    async fn download_asset(&self, asset: &ReleaseAsset) -> IngestionResult<Vec<u8>>;
}

/// Order raw releases the way [`ReleaseDiscoverer::list_new_releases`] must
///
/// Drops releases whose version does not parse and releases already indexed,
/// sorts newest first and keeps the first of several releases with equal
/// version precedence.
pub fn order_new_releases(
    releases: Vec<ReleaseMetadata>,
    snapshot: &ProviderSnapshot,
) -> Vec<ReleaseMetadata> {
    let mut candidates: Vec<(LooseVersion, ReleaseMetadata)> = releases
        .into_iter()
        .filter(|release| !snapshot.is_indexed(&release.version))
        .filter_map(|release| match release.loose_version() {
            Ok(version) => Some((version, release)),
            Err(e) => {
                warn!(release = %release.label(), error = %e, "Ignoring release with unparseable version");
                None
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates.dedup_by(|later, earlier| later.0 == earlier.0);
    candidates.into_iter().map(|(_, release)| release).collect()
}
