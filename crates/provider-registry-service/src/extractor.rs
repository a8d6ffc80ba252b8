//! Per-release extraction: fetch, verify, prepare, persist
//!
//! A release goes through the steps of [`ExtractionStep`] strictly in order.
//! Everything up to [`ExtractionStep::StoreArtifacts`] runs outside any
//! database transaction; only [`ProviderVersionExtractor::persist`] writes
//! to the session, and the caller owns the surrounding scope.

use provider_registry_core::{
    ChecksumManifest, GpgKey, LooseVersion, NewProviderBinary, NewProviderVersion, Platform,
    PluginManifest, ProviderVersion, ReleaseArtifactNames, ReleaseAsset, ReleaseMetadata,
    Checksum, DEFAULT_PROTOCOL_VERSIONS,
};
use provider_registry_db::StoreSession;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::checksum::ChecksumManifestVerifier;
use crate::discovery::ReleaseDiscoverer;
use crate::error::{IngestionError, IngestionResult};
use crate::gpg::GpgKeyResolver;
use crate::snapshot::ProviderSnapshot;
use crate::storage::ArtifactStore;

/// Stage of release ingestion, reported with every failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStep {
    CheckIndexed,
    ParseVersion,
    ObtainManifest,
    ResolveKey,
    VerifyManifest,
    VerifyBinaries,
    StoreArtifacts,
    Persist,
}

impl fmt::Display for ExtractionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CheckIndexed => "check_indexed",
            Self::ParseVersion => "parse_version",
            Self::ObtainManifest => "obtain_manifest",
            Self::ResolveKey => "resolve_key",
            Self::VerifyManifest => "verify_manifest",
            Self::VerifyBinaries => "verify_binaries",
            Self::StoreArtifacts => "store_artifacts",
            Self::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Failure of one extraction step
#[derive(Error, Debug)]
#[error("{step} failed: {error}")]
pub struct ExtractionFailure {
    pub step: ExtractionStep,
    #[source]
    pub error: IngestionError,
}

impl ExtractionFailure {
    pub fn new(step: ExtractionStep, error: impl Into<IngestionError>) -> Self {
        Self {
            step,
            error: error.into(),
        }
    }
}

/// Attach a step to a fallible result
trait AtStep<T> {
    fn at(self, step: ExtractionStep) -> Result<T, ExtractionFailure>;
}

impl<T, E: Into<IngestionError>> AtStep<T> for Result<T, E> {
    fn at(self, step: ExtractionStep) -> Result<T, ExtractionFailure> {
        self.map_err(|e| ExtractionFailure::new(step, e))
    }
}

/// A downloaded artifact whose content has been checked
#[derive(Debug, Clone)]
pub struct VerifiedArtifact {
    pub asset: ReleaseAsset,
    pub content: Vec<u8>,
}

/// A platform binary whose hash matches the signed manifest
#[derive(Debug, Clone)]
pub struct VerifiedBinary {
    pub platform: Platform,
    /// Manifest value, never the locally computed hash
    pub checksum: Checksum,
    pub artifact: VerifiedArtifact,
}

/// Release whose signature and every binary verified
#[derive(Debug, Clone)]
pub struct VerifiedRelease {
    pub release: ReleaseMetadata,
    pub version: LooseVersion,
    pub key: GpgKey,
    pub manifest: ChecksumManifest,
    pub shasums: VerifiedArtifact,
    pub shasums_signature: VerifiedArtifact,
    pub protocol_versions: Vec<String>,
    pub binaries: Vec<VerifiedBinary>,
}

/// Rows ready to be inserted for a verified release
#[derive(Debug, Clone)]
pub struct PreparedRelease {
    pub release: ReleaseMetadata,
    pub version: NewProviderVersion,
    pub binaries: Vec<NewProviderBinary>,
}

/// Turns a release into verified, persistable rows
pub struct ProviderVersionExtractor {
    discoverer: Arc<dyn ReleaseDiscoverer>,
    resolver: Arc<GpgKeyResolver>,
    checksums: ChecksumManifestVerifier,
    artifact_store: Option<Arc<dyn ArtifactStore>>,
}

impl ProviderVersionExtractor {
    pub fn new(discoverer: Arc<dyn ReleaseDiscoverer>, resolver: Arc<GpgKeyResolver>) -> Self {
        let checksums = ChecksumManifestVerifier::new(resolver.verifier().clone());
        Self {
            discoverer,
            resolver,
            checksums,
            artifact_store: None,
        }
    }

    /// Copy verified artifacts into a store instead of recording release URLs
    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifact_store = Some(store);
        self
    }

    /// Download and verify a release
    #[instrument(skip_all, fields(provider = %snapshot.provider.full_id(), release = %release.label()))]
    pub async fn extract(
        &self,
        snapshot: &ProviderSnapshot,
        release: &ReleaseMetadata,
        namespace_keys: &[GpgKey],
    ) -> Result<VerifiedRelease, ExtractionFailure> {
        let provider = &snapshot.provider;
        let version = release.loose_version().at(ExtractionStep::ParseVersion)?;
        let names =
            ReleaseArtifactNames::new(&provider.name, &release.version).at(ExtractionStep::ParseVersion)?;

        let shasums = self
            .download_required(release, &names.shasums())
            .await
            .at(ExtractionStep::ObtainManifest)?;
        let shasums_signature = self
            .download_required(release, &names.shasums_signature())
            .await
            .at(ExtractionStep::ObtainManifest)?;

        let key = self
            .resolver
            .resolve(
                &provider.namespace,
                namespace_keys.to_vec(),
                &release.label(),
                &shasums.content,
                &shasums_signature.content,
            )
            .at(ExtractionStep::ResolveKey)?;
        debug!(key = %key.identity(), "Resolved signing key");

        let manifest = self
            .checksums
            .verify(&shasums.content, &shasums_signature.content, &key)
            .at(ExtractionStep::VerifyManifest)?;

        let binaries = self
            .verify_binaries(release, &names, &manifest)
            .await
            .at(ExtractionStep::VerifyBinaries)?;
        let protocol_versions = self
            .protocol_versions(release, &names, &manifest)
            .await
            .at(ExtractionStep::VerifyBinaries)?;

        debug!(binaries = binaries.len(), protocols = ?protocol_versions, "Release verified");
        Ok(VerifiedRelease {
            release: release.clone(),
            version,
            key,
            manifest,
            shasums,
            shasums_signature,
            protocol_versions,
            binaries,
        })
    }

    /// Store artifacts and build the rows to insert
    pub async fn prepare(
        &self,
        snapshot: &ProviderSnapshot,
        verified: VerifiedRelease,
    ) -> Result<PreparedRelease, ExtractionFailure> {
        let VerifiedRelease {
            release,
            version,
            key,
            shasums,
            shasums_signature,
            protocol_versions,
            binaries,
            ..
        } = verified;

        let shasums_url = self
            .locate(snapshot, &release, &shasums)
            .await
            .at(ExtractionStep::StoreArtifacts)?;
        let shasums_signature_url = self
            .locate(snapshot, &release, &shasums_signature)
            .await
            .at(ExtractionStep::StoreArtifacts)?;

        let mut rows = Vec::with_capacity(binaries.len());
        for binary in binaries {
            let location = self
                .locate(snapshot, &release, &binary.artifact)
                .await
                .at(ExtractionStep::StoreArtifacts)?;
            rows.push(NewProviderBinary {
                platform: binary.platform,
                filename: binary.artifact.asset.name,
                checksum: binary.checksum,
                location,
            });
        }

        let new_version = NewProviderVersion {
            provider_id: snapshot.provider.id,
            version: release.version.clone(),
            git_tag: release.tag.clone(),
            beta: version.is_prerelease(),
            gpg_key_fingerprint: key.identity().to_string(),
            published_at: release.published_at,
            protocol_versions,
            shasums_url,
            shasums_signature_url,
        };

        Ok(PreparedRelease {
            release,
            version: new_version,
            binaries: rows,
        })
    }

    /// Insert the version and its binaries through the session
    ///
    /// The caller must hold an open transaction scope.
    pub async fn persist(
        &self,
        session: &mut dyn StoreSession,
        prepared: PreparedRelease,
    ) -> IngestionResult<ProviderVersion> {
        let version = session.insert_version(prepared.version).await?;
        for binary in prepared.binaries {
            session.insert_binary(version.id, binary).await?;
        }
        Ok(version)
    }

    async fn download_required(
        &self,
        release: &ReleaseMetadata,
        filename: &str,
    ) -> IngestionResult<VerifiedArtifact> {
        let asset = release
            .find_asset(filename)
            .ok_or_else(|| IngestionError::MissingSignatureArtifact {
                artifact: filename.to_string(),
                context: format!("release {} has no such asset", release.label()),
            })?
            .clone();
        let content = self.discoverer.download_asset(&asset).await?;
        Ok(VerifiedArtifact { asset, content })
    }

    async fn verify_binaries(
        &self,
        release: &ReleaseMetadata,
        names: &ReleaseArtifactNames,
        manifest: &ChecksumManifest,
    ) -> IngestionResult<Vec<VerifiedBinary>> {
        let mut binaries = Vec::new();
        for asset in &release.assets {
            let Some(platform) = names.platform_of(&asset.name) else {
                continue;
            };
            // Unlisted binaries fail before anything is downloaded
            if !manifest.contains(&asset.name) {
                return Err(IngestionError::MissingSignatureArtifact {
                    artifact: asset.name.clone(),
                    context: "not listed in the signed checksum manifest".to_string(),
                });
            }
            let content = self.discoverer.download_asset(asset).await?;
            let checksum = self.checksums.verify_content(manifest, &asset.name, &content)?;
            debug!(platform = %platform, "Binary verified");
            binaries.push(VerifiedBinary {
                platform,
                checksum,
                artifact: VerifiedArtifact {
                    asset: asset.clone(),
                    content,
                },
            });
        }

        if binaries.is_empty() {
            return Err(IngestionError::MissingSignatureArtifact {
                artifact: names.binary(&Platform::new("<os>", "<arch>")),
                context: format!("release {} has no platform binaries", release.label()),
            });
        }
        Ok(binaries)
    }

    async fn protocol_versions(
        &self,
        release: &ReleaseMetadata,
        names: &ReleaseArtifactNames,
        manifest: &ChecksumManifest,
    ) -> IngestionResult<Vec<String>> {
        let filename = names.manifest_json();
        let Some(asset) = release.find_asset(&filename) else {
            return Ok(DEFAULT_PROTOCOL_VERSIONS.iter().map(|p| p.to_string()).collect());
        };
        if !manifest.contains(&filename) {
            return Err(IngestionError::MissingSignatureArtifact {
                artifact: filename,
                context: "not listed in the signed checksum manifest".to_string(),
            });
        }

        let content = self.discoverer.download_asset(asset).await?;
        self.checksums.verify_content(manifest, &filename, &content)?;
        let plugin = PluginManifest::parse(&content)?;
        Ok(plugin.metadata.protocol_versions)
    }

    async fn locate(
        &self,
        snapshot: &ProviderSnapshot,
        release: &ReleaseMetadata,
        artifact: &VerifiedArtifact,
    ) -> IngestionResult<String> {
        match &self.artifact_store {
            Some(store) => {
                store
                    .store(
                        &snapshot.provider,
                        &release.version,
                        &artifact.asset.name,
                        &artifact.content,
                    )
                    .await
            }
            None => Ok(artifact.asset.url.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ReleaseLookup;
    use crate::gpg::PgpSignatureVerifier;
    use async_trait::async_trait;
    use provider_registry_core::{Provider, ProviderId, ProviderTier};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use url::Url;

    const ACME_KEY: &str = include_str!("../../../testdata/acme-signing-key.asc");
    const ACME_FINGERPRINT: &str = "4480682CDC749AC85B84920B30EAFE4B154945D1";
    const OTHER_KEY: &str = include_str!("../../../testdata/other-signing-key.asc");
    const SHASUMS: &[u8] =
        include_bytes!("../../../testdata/artifacts/terraform-provider-widgets_1.0.0_SHA256SUMS");
    const SIGNATURE: &[u8] =
        include_bytes!("../../../testdata/artifacts/terraform-provider-widgets_1.0.0_SHA256SUMS.sig");
    const LINUX_ZIP: &[u8] =
        include_bytes!("../../../testdata/artifacts/terraform-provider-widgets_1.0.0_linux_amd64.zip");
    const DARWIN_ZIP: &[u8] =
        include_bytes!("../../../testdata/artifacts/terraform-provider-widgets_1.0.0_darwin_arm64.zip");
    const MANIFEST_JSON: &[u8] =
        include_bytes!("../../../testdata/artifacts/terraform-provider-widgets_1.0.0_manifest.json");

    /// Serves fixed asset content and records downloads
    #[derive(Default)]
    struct FixtureDiscoverer {
        content: HashMap<String, Vec<u8>>,
        downloads: Mutex<Vec<String>>,
    }

    impl FixtureDiscoverer {
        fn with(mut self, name: &str, content: &[u8]) -> Self {
            self.content.insert(name.to_string(), content.to_vec());
            self
        }

        fn downloads(&self) -> Vec<String> {
            self.downloads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReleaseDiscoverer for FixtureDiscoverer {
        async fn list_new_releases(
            &self,
            _snapshot: &ProviderSnapshot,
        ) -> IngestionResult<Vec<ReleaseMetadata>> {
            Ok(Vec::new())
        }

        async fn get_release(
            &self,
            _snapshot: &ProviderSnapshot,
            _version: &str,
        ) -> IngestionResult<ReleaseLookup> {
            Ok(ReleaseLookup::NotFound)
        }

        async fn download_asset(&self, asset: &ReleaseAsset) -> IngestionResult<Vec<u8>> {
            self.downloads.lock().unwrap().push(asset.name.clone());
            self.content
                .get(&asset.name)
                .cloned()
                .ok_or_else(|| IngestionError::ReleaseHostUnavailable(asset.name.clone()))
        }
    }

    fn snapshot() -> ProviderSnapshot {
        ProviderSnapshot {
            provider: Provider {
                id: ProviderId(7),
                namespace: "acme".to_string(),
                name: "widgets".to_string(),
                description: None,
                tier: ProviderTier::Community,
                category: None,
                repository_owner: "acme".to_string(),
                repository_name: "terraform-provider-widgets".to_string(),
                latest_version_id: None,
            },
            versions: Vec::new(),
        }
    }

    fn asset(name: &str) -> ReleaseAsset {
        let url = Url::parse("https://releases.example.com/acme/widgets/")
            .unwrap()
            .join(name)
            .unwrap();
        ReleaseAsset::new(name, url)
    }

    fn release(names: &[&str]) -> ReleaseMetadata {
        ReleaseMetadata {
            name: "v1.0.0".to_string(),
            tag: "v1.0.0".to_string(),
            version: "1.0.0".to_string(),
            published_at: None,
            assets: names.iter().map(|name| asset(name)).collect(),
        }
    }

    const ALL_ASSETS: &[&str] = &[
        "terraform-provider-widgets_1.0.0_SHA256SUMS",
        "terraform-provider-widgets_1.0.0_SHA256SUMS.sig",
        "terraform-provider-widgets_1.0.0_linux_amd64.zip",
        "terraform-provider-widgets_1.0.0_darwin_arm64.zip",
        "terraform-provider-widgets_1.0.0_manifest.json",
    ];

    fn fixtures() -> FixtureDiscoverer {
        FixtureDiscoverer::default()
            .with(ALL_ASSETS[0], SHASUMS)
            .with(ALL_ASSETS[1], SIGNATURE)
            .with(ALL_ASSETS[2], LINUX_ZIP)
            .with(ALL_ASSETS[3], DARWIN_ZIP)
            .with(ALL_ASSETS[4], MANIFEST_JSON)
    }

    fn extractor(discoverer: Arc<FixtureDiscoverer>) -> ProviderVersionExtractor {
        let resolver = GpgKeyResolver::new(Arc::new(PgpSignatureVerifier::new()), Vec::new());
        ProviderVersionExtractor::new(discoverer, Arc::new(resolver))
    }

    fn acme_keys() -> Vec<GpgKey> {
        vec![GpgKey::new(Some("acme".to_string()), "30EAFE4B154945D1", ACME_KEY)
            .with_fingerprint(ACME_FINGERPRINT)]
    }

    #[tokio::test]
    async fn test_extract_and_prepare() {
        let discoverer = Arc::new(fixtures());
        let extractor = extractor(discoverer.clone());
        let snapshot = snapshot();

        let verified = extractor
            .extract(&snapshot, &release(ALL_ASSETS), &acme_keys())
            .await
            .unwrap();
        assert_eq!(verified.binaries.len(), 2);
        assert_eq!(verified.protocol_versions, vec!["6.0".to_string()]);

        let prepared = extractor.prepare(&snapshot, verified).await.unwrap();
        assert_eq!(prepared.version.provider_id, ProviderId(7));
        assert_eq!(prepared.version.gpg_key_fingerprint, ACME_FINGERPRINT);
        assert!(!prepared.version.beta);
        assert!(prepared.version.shasums_url.ends_with("terraform-provider-widgets_1.0.0_SHA256SUMS"));

        let linux = prepared
            .binaries
            .iter()
            .find(|b| b.platform == Platform::new("linux", "amd64"))
            .unwrap();
        assert_eq!(
            linux.checksum.value(),
            "54d7955b5ce57a57ff95e90d7441a8f1fa42f463ddd85d5cf0c6f74d3280f85e"
        );
        assert!(linux.location.starts_with("https://releases.example.com/"));
    }

    #[tokio::test]
    async fn test_missing_signature_stops_before_key_resolution() {
        let discoverer = Arc::new(fixtures());
        let extractor = extractor(discoverer.clone());
        let assets: Vec<&str> = ALL_ASSETS.iter().copied().filter(|n| !n.ends_with(".sig")).collect();

        let failure = extractor
            .extract(&snapshot(), &release(&assets), &acme_keys())
            .await
            .unwrap_err();
        assert_eq!(failure.step, ExtractionStep::ObtainManifest);
        assert!(matches!(failure.error, IngestionError::MissingSignatureArtifact { .. }));
        assert!(discoverer.downloads().iter().all(|name| !name.ends_with(".zip")));
    }

    #[tokio::test]
    async fn test_unknown_key_fails_resolution() {
        let discoverer = Arc::new(fixtures());
        let extractor = extractor(discoverer);
        let keys = vec![GpgKey::new(Some("acme".to_string()), "4AE18CB2EE4EC3DA", OTHER_KEY)];

        let failure = extractor
            .extract(&snapshot(), &release(ALL_ASSETS), &keys)
            .await
            .unwrap_err();
        assert_eq!(failure.step, ExtractionStep::ResolveKey);
        assert!(matches!(
            failure.error,
            IngestionError::CouldNotFindGpgKeyForProviderVersion { .. }
        ));
    }

    #[tokio::test]
    async fn test_tampered_binary_fails_verification() {
        let discoverer = Arc::new(fixtures().with(ALL_ASSETS[3], b"tampered"));
        let extractor = extractor(discoverer);

        let failure = extractor
            .extract(&snapshot(), &release(ALL_ASSETS), &acme_keys())
            .await
            .unwrap_err();
        assert_eq!(failure.step, ExtractionStep::VerifyBinaries);
        assert!(matches!(failure.error, IngestionError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_release_without_binaries_is_rejected() {
        let discoverer = Arc::new(fixtures());
        let extractor = extractor(discoverer);

        let failure = extractor
            .extract(&snapshot(), &release(&ALL_ASSETS[..2]), &acme_keys())
            .await
            .unwrap_err();
        assert_eq!(failure.step, ExtractionStep::VerifyBinaries);
        assert!(matches!(failure.error, IngestionError::MissingSignatureArtifact { .. }));
    }

    #[tokio::test]
    async fn test_default_protocols_without_manifest_json() {
        let discoverer = Arc::new(fixtures());
        let extractor = extractor(discoverer);

        let verified = extractor
            .extract(&snapshot(), &release(&ALL_ASSETS[..4]), &acme_keys())
            .await
            .unwrap();
        assert_eq!(verified.protocol_versions, vec!["5.0".to_string()]);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(ExtractionStep::VerifyManifest.to_string(), "verify_manifest");
        let failure = ExtractionFailure::new(
            ExtractionStep::ResolveKey,
            IngestionError::InvalidSignature("bad".to_string()),
        );
        assert_eq!(failure.to_string(), "resolve_key failed: Invalid signature: bad");
    }
}
