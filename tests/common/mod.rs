//! Common test utilities and helpers
//!
//! Integration tests run the real ingestion service against the in-memory
//! store, a scripted release host and (unless a test opts into real OpenPGP)
//! a fake signature verifier.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use provider_registry_core::{GpgKey, Provider, ProviderId, ProviderTier, ReleaseAsset, ReleaseMetadata};
use provider_registry_db::InMemoryProviderStore;
use provider_registry_service::{
    order_new_releases, ArtifactStore, DefaultProviderIngestionService, GpgKeyResolver,
    IngestionError, IngestionResult, IngestionTransactionController, ProviderSnapshot,
    ProviderVersionExtractor, ReleaseDiscoverer, ReleaseLookup, SignatureVerifier,
};
use std::collections::HashMap;
use std::sync::Arc;

pub mod fixtures;

pub const NAMESPACE: &str = "acme";
pub const NAME: &str = "widgets";
pub const ACME_KEY_ID: &str = "30EAFE4B154945D1";
pub const ACME_FINGERPRINT: &str = "4480682CDC749AC85B84920B30EAFE4B154945D1";

/// Release host serving whatever a test published
#[derive(Default)]
pub struct ScriptedDiscoverer {
    releases: Mutex<Vec<ReleaseMetadata>>,
    content: Mutex<HashMap<String, Vec<u8>>>,
    timeouts: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDiscoverer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a release and its asset content available
    pub fn publish(&self, release: ReleaseMetadata, content: HashMap<String, Vec<u8>>) {
        self.content.lock().extend(content);
        self.releases.lock().push(release);
    }

    /// Downloads of this asset time out
    pub fn time_out(&self, asset_name: &str) {
        self.timeouts.lock().push(asset_name.to_string());
    }

    /// Every call made, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix("download ").map(str::to_string))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ReleaseDiscoverer for ScriptedDiscoverer {
    async fn list_new_releases(&self, snapshot: &ProviderSnapshot) -> IngestionResult<Vec<ReleaseMetadata>> {
        self.record("list".to_string());
        let releases = self.releases.lock().clone();
        Ok(order_new_releases(releases, snapshot))
    }

    async fn get_release(&self, snapshot: &ProviderSnapshot, version: &str) -> IngestionResult<ReleaseLookup> {
        self.record(format!("get {}", version));
        if snapshot.is_indexed(version) {
            return Ok(ReleaseLookup::AlreadyIndexed);
        }
        let found = self
            .releases
            .lock()
            .iter()
            .find(|release| release.version == version)
            .cloned();
        Ok(found.map(ReleaseLookup::Found).unwrap_or(ReleaseLookup::NotFound))
    }

    async fn download_asset(&self, asset: &ReleaseAsset) -> IngestionResult<Vec<u8>> {
        self.record(format!("download {}", asset.name));
        if self.timeouts.lock().contains(&asset.name) {
            return Err(IngestionError::Timeout(asset.url.to_string()));
        }
        self.content
            .lock()
            .get(asset.url.as_str())
            .cloned()
            .ok_or_else(|| IngestionError::ReleaseHostUnavailable(format!("404 for {}", asset.url)))
    }
}

/// Signatures are `<key id>:<sha256 of the signed data>`
pub struct FakeVerifier;

impl FakeVerifier {
    pub fn sign(key_id: &str, data: &[u8]) -> Vec<u8> {
        format!("{}:{}", key_id, fixtures::sha256(data)).into_bytes()
    }

    fn split(signature: &[u8]) -> IngestionResult<(String, String)> {
        let text = String::from_utf8_lossy(signature);
        text.split_once(':')
            .map(|(key, digest)| (key.to_string(), digest.to_string()))
            .ok_or_else(|| IngestionError::InvalidSignature("unreadable signature".to_string()))
    }
}

impl SignatureVerifier for FakeVerifier {
    fn issuer_key_ids(&self, signature: &[u8]) -> IngestionResult<Vec<String>> {
        let (key_id, _) = Self::split(signature)?;
        Ok(vec![key_id])
    }

    fn key_ids(&self, key: &GpgKey) -> IngestionResult<Vec<String>> {
        Ok(vec![key.key_id.clone()])
    }

    fn verify(&self, key: &GpgKey, data: &[u8], signature: &[u8]) -> IngestionResult<()> {
        let (key_id, digest) = Self::split(signature)?;
        if key.matches_key_id(&key_id) && digest == fixtures::sha256(data) {
            Ok(())
        } else {
            Err(IngestionError::InvalidSignature(format!(
                "signature does not verify with key {}",
                key.key_id
            )))
        }
    }
}

/// A registry with one provider, `acme/widgets`, and its namespace key
pub struct TestRegistry {
    pub store: InMemoryProviderStore,
    pub discoverer: Arc<ScriptedDiscoverer>,
    pub service: DefaultProviderIngestionService,
    pub provider: Provider,
}

impl TestRegistry {
    /// Fake signatures, no artifact store
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestRegistryBuilder {
        TestRegistryBuilder::default()
    }

    pub fn committed_versions(&self) -> Vec<String> {
        self.store
            .committed_versions(self.provider.id)
            .into_iter()
            .map(|version| version.version)
            .collect()
    }

    pub fn latest_version_id(&self) -> Option<provider_registry_core::ProviderVersionId> {
        self.store
            .provider(self.provider.id)
            .and_then(|provider| provider.latest_version_id)
    }
}

#[derive(Default)]
pub struct TestRegistryBuilder {
    verifier: Option<Arc<dyn SignatureVerifier>>,
    namespace_keys: Option<Vec<GpgKey>>,
    default_keys: Vec<GpgKey>,
    artifact_store: Option<Arc<dyn ArtifactStore>>,
}

impl TestRegistryBuilder {
    pub fn verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn namespace_keys(mut self, keys: Vec<GpgKey>) -> Self {
        self.namespace_keys = Some(keys);
        self
    }

    pub fn default_keys(mut self, keys: Vec<GpgKey>) -> Self {
        self.default_keys = keys;
        self
    }

    pub fn artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifact_store = Some(store);
        self
    }

    pub fn build(self) -> TestRegistry {
        let store = InMemoryProviderStore::new();
        let provider = store.add_provider(Provider {
            id: ProviderId(0),
            namespace: NAMESPACE.to_string(),
            name: NAME.to_string(),
            description: Some("Widgets for Terraform".to_string()),
            tier: ProviderTier::Community,
            category: None,
            repository_owner: NAMESPACE.to_string(),
            repository_name: format!("terraform-provider-{}", NAME),
            latest_version_id: None,
        });

        let namespace_keys = self.namespace_keys.unwrap_or_else(|| {
            vec![GpgKey::new(Some(NAMESPACE.to_string()), ACME_KEY_ID, "fake armor")
                .with_fingerprint(ACME_FINGERPRINT)]
        });
        for key in namespace_keys {
            store.add_gpg_key(key);
        }

        let verifier = self.verifier.unwrap_or_else(|| Arc::new(FakeVerifier));
        let discoverer = Arc::new(ScriptedDiscoverer::new());
        let resolver = Arc::new(GpgKeyResolver::new(verifier, self.default_keys));
        let mut extractor = ProviderVersionExtractor::new(discoverer.clone(), resolver);
        if let Some(artifact_store) = self.artifact_store {
            extractor = extractor.with_artifact_store(artifact_store);
        }
        let controller = Arc::new(IngestionTransactionController::new(extractor));
        let service = DefaultProviderIngestionService::new(
            Arc::new(store.clone()),
            discoverer.clone(),
            controller,
        );

        TestRegistry {
            store,
            discoverer,
            service,
            provider,
        }
    }
}
