//! Point-in-time view of a provider and its indexed versions

use provider_registry_core::{Provider, ProviderVersion};
use provider_registry_db::StoreSession;

use crate::error::{IngestionError, IngestionResult};

/// Provider row plus its indexed versions, as read through one session
///
/// The view goes stale as soon as the session writes; call
/// [`refresh`](ProviderSnapshot::refresh) to re-read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSnapshot {
    pub provider: Provider,
    pub versions: Vec<ProviderVersion>,
}

impl ProviderSnapshot {
    /// Load a provider by namespace and name
    pub async fn load(
        session: &mut dyn StoreSession,
        namespace: &str,
        name: &str,
    ) -> IngestionResult<Self> {
        let provider = session
            .find_provider(namespace, name)
            .await?
            .ok_or_else(|| IngestionError::ProviderNotFound(format!("{}/{}", namespace, name)))?;
        let versions = session.list_versions(provider.id).await?;
        Ok(Self { provider, versions })
    }

    /// Re-read the provider row and its versions
    pub async fn refresh(&mut self, session: &mut dyn StoreSession) -> IngestionResult<()> {
        let provider = session
            .get_provider(self.provider.id)
            .await?
            .ok_or_else(|| IngestionError::ProviderNotFound(self.provider.full_id()))?;
        self.versions = session.list_versions(provider.id).await?;
        self.provider = provider;
        Ok(())
    }

    /// Whether a version string is already indexed
    pub fn is_indexed(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v.version == version)
    }

    /// Current latest version, if the pointer is set
    pub fn latest(&self) -> Option<&ProviderVersion> {
        let latest_id = self.provider.latest_version_id?;
        self.versions.iter().find(|v| v.id == latest_id)
    }
}
