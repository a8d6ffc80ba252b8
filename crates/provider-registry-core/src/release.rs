//! Release metadata reported by a provider's source repository

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RegistryError, Result};
use crate::types::{Platform, PROVIDER_REPOSITORY_PREFIX};
use crate::version::LooseVersion;

/// A downloadable asset attached to a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub url: Url,
    pub content_type: Option<String>,
}

impl ReleaseAsset {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            name: name.into(),
            url,
            content_type: None,
        }
    }
}

/// Immutable description of a single release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    /// Release title as shown by the repository host
    pub name: String,
    /// Git tag the release was cut from
    pub tag: String,
    /// Version derived from the tag
    pub version: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Assets in the order the host lists them
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseMetadata {
    /// Find an asset by exact filename
    pub fn find_asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|asset| asset.name == name)
    }

    /// Parse the release version
    pub fn loose_version(&self) -> Result<LooseVersion> {
        LooseVersion::parse(&self.version)
    }

    /// `name (tag)` for log and error messages
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.tag)
    }
}

/// Artifact filenames a release must follow
///
/// For provider `aws` at `1.2.3`:
/// - `terraform-provider-aws_1.2.3_SHA256SUMS`
/// - `terraform-provider-aws_1.2.3_SHA256SUMS.sig`
/// - `terraform-provider-aws_1.2.3_manifest.json`
/// - `terraform-provider-aws_1.2.3_<os>_<arch>.zip`
#[derive(Debug, Clone)]
pub struct ReleaseArtifactNames {
    prefix: String,
    binary_pattern: Regex,
}

impl ReleaseArtifactNames {
    pub fn new(provider_name: &str, version: &str) -> Result<Self> {
        let prefix = format!("{}{}_{}", PROVIDER_REPOSITORY_PREFIX, provider_name, version);
        let binary_pattern = Regex::new(&format!(
            r"^{}_([a-z0-9]+)_([a-z0-9]+)\.zip$",
            regex::escape(&prefix)
        ))
        .map_err(|e| RegistryError::ValidationError(format!("Invalid artifact pattern: {}", e)))?;

        Ok(Self {
            prefix,
            binary_pattern,
        })
    }

    pub fn shasums(&self) -> String {
        format!("{}_SHA256SUMS", self.prefix)
    }

    pub fn shasums_signature(&self) -> String {
        format!("{}_SHA256SUMS.sig", self.prefix)
    }

    pub fn manifest_json(&self) -> String {
        format!("{}_manifest.json", self.prefix)
    }

    pub fn binary(&self, platform: &Platform) -> String {
        format!("{}_{}_{}.zip", self.prefix, platform.os, platform.arch)
    }

    /// Platform of a binary artifact, `None` for any other file
    pub fn platform_of(&self, filename: &str) -> Option<Platform> {
        self.binary_pattern
            .captures(filename)
            .map(|caps| Platform::new(&caps[1], &caps[2]))
    }
}

/// Terraform plugin `manifest.json` shipped with a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub version: u32,
    pub metadata: PluginManifestMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifestMetadata {
    pub protocol_versions: Vec<String>,
}

impl PluginManifest {
    /// Parse manifest.json content
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let manifest: PluginManifest = serde_json::from_slice(bytes)?;
        if manifest.metadata.protocol_versions.is_empty() {
            return Err(RegistryError::ValidationError(
                "manifest.json lists no protocol versions".to_string(),
            ));
        }
        Ok(manifest)
    }
}
