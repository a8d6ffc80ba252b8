//! Data Transfer Objects (DTOs) for the Terraform provider registry protocol
//!
//! These are the documents the surrounding application serves to Terraform:
//! the versions listing, per-platform download details and the provider's
//! integration endpoints.

use provider_registry_core::{GpgKey, LooseVersion, Platform, Provider, ProviderBinary, ProviderVersion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Versions listing
// ============================================================================

/// `GET /v1/providers/{namespace}/{name}/versions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderVersionsResponse {
    /// `namespace/name`
    pub id: String,

    /// Indexed versions, newest first
    pub versions: Vec<VersionSummary>,

    /// Always present, `null` when there is nothing to report
    pub warnings: Option<Vec<String>>,
}

/// One version in the listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub version: String,
    pub protocols: Vec<String>,
    pub platforms: Vec<PlatformSummary>,
}

/// Operating system and architecture of one binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSummary {
    pub os: String,
    pub arch: String,
}

impl From<&Platform> for PlatformSummary {
    fn from(platform: &Platform) -> Self {
        Self {
            os: platform.os.clone(),
            arch: platform.arch.clone(),
        }
    }
}

impl ProviderVersionsResponse {
    /// Build the listing from versions paired with their binaries
    pub fn new(provider: &Provider, mut versions: Vec<(ProviderVersion, Vec<ProviderBinary>)>) -> Self {
        // Unparseable versions sort last
        versions.sort_by_cached_key(|(version, _)| {
            std::cmp::Reverse(LooseVersion::parse(&version.version).ok())
        });

        let versions = versions
            .into_iter()
            .map(|(version, binaries)| {
                let mut platforms: Vec<&Platform> = binaries.iter().map(|b| &b.platform).collect();
                platforms.sort();
                VersionSummary {
                    version: version.version,
                    protocols: version.protocol_versions,
                    platforms: platforms.into_iter().map(PlatformSummary::from).collect(),
                }
            })
            .collect();

        Self {
            id: provider.full_id(),
            versions,
            warnings: None,
        }
    }
}

// ============================================================================
// Download details
// ============================================================================

/// `GET /v1/providers/{namespace}/{name}/{version}/download/{os}/{arch}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDownloadResponse {
    pub protocols: Vec<String>,
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub download_url: String,
    pub shasums_url: String,
    pub shasums_signature_url: String,
    /// SHA-256 from the signed manifest
    pub shasum: String,
    pub signing_keys: SigningKeys,
}

/// Keys Terraform may use to check the manifest signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeys {
    pub gpg_public_keys: Vec<GpgPublicKey>,
}

/// Public key entry of the download document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpgPublicKey {
    pub key_id: String,
    pub ascii_armor: String,
    pub trust_signature: String,
    pub source: String,
    pub source_url: Option<String>,
}

impl From<&GpgKey> for GpgPublicKey {
    fn from(key: &GpgKey) -> Self {
        Self {
            key_id: key.key_id.clone(),
            ascii_armor: key.ascii_armor.clone(),
            trust_signature: key.trust_signature.clone().unwrap_or_default(),
            source: key.source.clone().unwrap_or_default(),
            source_url: key.source_url.clone(),
        }
    }
}

impl PackageDownloadResponse {
    /// Build the document for one binary
    ///
    /// Only the key that verified the version is advertised.
    pub fn new(version: &ProviderVersion, binary: &ProviderBinary, keys: &[GpgKey]) -> Self {
        let gpg_public_keys = keys
            .iter()
            .filter(|key| key.matches_key_id(&version.gpg_key_fingerprint))
            .map(GpgPublicKey::from)
            .collect();

        Self {
            protocols: version.protocol_versions.clone(),
            os: binary.platform.os.clone(),
            arch: binary.platform.arch.clone(),
            filename: binary.filename.clone(),
            download_url: binary.location.clone(),
            shasums_url: version.shasums_url.clone(),
            shasums_signature_url: version.shasums_signature_url.clone(),
            shasum: binary.checksum.value().to_string(),
            signing_keys: SigningKeys { gpg_public_keys },
        }
    }
}

// ============================================================================
// Integrations
// ============================================================================

/// Endpoint another system can call to drive ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    /// HTTP method, `None` when the endpoint is not callable yet
    pub method: Option<String>,
    pub url: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub coming_soon: bool,
}

/// Integration endpoints of a provider, keyed by purpose
pub type ProviderIntegrations = BTreeMap<String, Integration>;

/// Integration endpoints for a provider
pub fn provider_integrations(provider: &Provider) -> ProviderIntegrations {
    let mut integrations = ProviderIntegrations::new();
    integrations.insert(
        "import".to_string(),
        Integration {
            method: Some("POST".to_string()),
            url: format!("/v1/providers/{}/versions", provider.full_id()),
            description: "Trigger version import".to_string(),
            notes: Some(
                "Accepts JSON body with \"version\" key with value of version to be imported".to_string(),
            ),
            coming_soon: false,
        },
    );
    integrations.insert(
        "hooks_github".to_string(),
        Integration {
            method: None,
            url: format!("/v1/providers/{}/hooks/github", provider.full_id()),
            description: "Github hook trigger".to_string(),
            notes: Some("Only accepts `Releases` events, all other events will return an error.".to_string()),
            coming_soon: true,
        },
    );
    integrations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use provider_registry_core::{Checksum, ProviderId, ProviderTier, ProviderVersionId};

    fn provider() -> Provider {
        Provider {
            id: ProviderId(1),
            namespace: "acme".to_string(),
            name: "widgets".to_string(),
            description: None,
            tier: ProviderTier::Community,
            category: None,
            repository_owner: "acme".to_string(),
            repository_name: "terraform-provider-widgets".to_string(),
            latest_version_id: None,
        }
    }

    fn version(id: i64, version: &str) -> ProviderVersion {
        ProviderVersion {
            id: ProviderVersionId(id),
            provider_id: ProviderId(1),
            version: version.to_string(),
            git_tag: format!("v{}", version),
            beta: false,
            gpg_key_fingerprint: "4480682CDC749AC85B84920B30EAFE4B154945D1".to_string(),
            published_at: None,
            protocol_versions: vec!["5.0".to_string()],
            shasums_url: format!("https://example.com/{}/SHA256SUMS", version),
            shasums_signature_url: format!("https://example.com/{}/SHA256SUMS.sig", version),
            created_at: Utc::now(),
        }
    }

    fn binary(version_id: i64, os: &str, arch: &str) -> ProviderBinary {
        ProviderBinary {
            id: version_id * 10,
            provider_version_id: ProviderVersionId(version_id),
            platform: Platform::new(os, arch),
            filename: format!("terraform-provider-widgets_{}_{}.zip", os, arch),
            checksum: Checksum::of(b"binary"),
            location: format!("https://example.com/{}_{}.zip", os, arch),
        }
    }

    #[test]
    fn test_versions_listing_is_newest_first() {
        let response = ProviderVersionsResponse::new(
            &provider(),
            vec![
                (version(1, "1.2.0"), vec![binary(1, "linux", "amd64")]),
                (
                    version(2, "1.10.0"),
                    vec![binary(2, "linux", "amd64"), binary(2, "darwin", "arm64")],
                ),
            ],
        );

        assert_eq!(response.id, "acme/widgets");
        assert_eq!(response.versions[0].version, "1.10.0");
        assert_eq!(response.versions[0].platforms[0].os, "darwin");
        assert_eq!(response.versions[1].version, "1.2.0");

        let json = serde_json::to_value(&response).unwrap();
        assert!(json["warnings"].is_null());
    }

    #[test]
    fn test_download_details_advertise_signing_key() {
        let key = GpgKey::new(Some("acme".to_string()), "30EAFE4B154945D1", "armor")
            .with_fingerprint("4480682CDC749AC85B84920B30EAFE4B154945D1");
        let unrelated = GpgKey::new(Some("acme".to_string()), "4AE18CB2EE4EC3DA", "other");

        let response =
            PackageDownloadResponse::new(&version(1, "1.0.0"), &binary(1, "linux", "amd64"), &[key, unrelated]);

        assert_eq!(response.shasum, Checksum::of(b"binary").value());
        assert_eq!(response.download_url, "https://example.com/linux_amd64.zip");
        assert_eq!(response.signing_keys.gpg_public_keys.len(), 1);
        assert_eq!(response.signing_keys.gpg_public_keys[0].key_id, "30EAFE4B154945D1");
    }

    #[test]
    fn test_integrations() {
        let integrations = provider_integrations(&provider());
        assert_eq!(integrations["import"].url, "/v1/providers/acme/widgets/versions");
        assert_eq!(integrations["import"].method.as_deref(), Some("POST"));

        let json = serde_json::to_value(&integrations).unwrap();
        assert_eq!(json["hooks_github"]["coming_soon"], true);
        assert!(json["import"].get("coming_soon").is_none());
    }
}
