//! Storage for verified release artifacts

use async_trait::async_trait;
use provider_registry_core::Provider;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{IngestionError, IngestionResult};

/// Destination for verified artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store an artifact and return its location
    async fn store(
        &self,
        provider: &Provider,
        version: &str,
        filename: &str,
        content: &[u8],
    ) -> IngestionResult<String>;
}

/// Stores artifacts under `<root>/<namespace>/<name>/<version>/`
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn directory_for(&self, provider: &Provider, version: &str) -> IngestionResult<PathBuf> {
        for component in [provider.namespace.as_str(), provider.name.as_str(), version] {
            ensure_plain_name(component)?;
        }
        Ok(self
            .root
            .join(&provider.namespace)
            .join(&provider.name)
            .join(version))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn store(
        &self,
        provider: &Provider,
        version: &str,
        filename: &str,
        content: &[u8],
    ) -> IngestionResult<String> {
        ensure_plain_name(filename)?;
        let directory = self.directory_for(provider, version)?;
        tokio::fs::create_dir_all(&directory).await?;

        // Write then rename so readers never see a partial file
        let target = directory.join(filename);
        let partial = directory.join(format!(".{}.partial", filename));
        tokio::fs::write(&partial, content).await?;
        tokio::fs::rename(&partial, &target).await?;

        debug!(path = %target.display(), size = content.len(), "Stored artifact");
        Ok(target.to_string_lossy().into_owned())
    }
}

fn ensure_plain_name(name: &str) -> IngestionResult<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\');
    if valid {
        Ok(())
    } else {
        Err(IngestionError::Storage(format!(
            "refusing to store artifact under path component {:?}",
            name
        )))
    }
}
