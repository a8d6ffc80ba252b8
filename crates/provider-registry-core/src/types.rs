//! Core type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::checksum::Checksum;
use crate::error::{RegistryError, Result};

/// Repository name prefix shared by every provider repository
pub const PROVIDER_REPOSITORY_PREFIX: &str = "terraform-provider-";

/// Plugin protocols assumed when a release ships no manifest.json
pub const DEFAULT_PROTOCOL_VERSIONS: &[&str] = &["5.0"];

/// Provider identifier (database primary key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub i64);

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider version identifier (database primary key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderVersionId(pub i64);

impl fmt::Display for ProviderVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Convert a repository name to a provider name
///
/// Only repositories named `terraform-provider-<name>` host providers.
pub fn repository_name_to_provider_name(repository_name: &str) -> Option<&str> {
    repository_name
        .strip_prefix(PROVIDER_REPOSITORY_PREFIX)
        .filter(|name| !name.is_empty())
}

/// Provider tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTier {
    /// Maintained by the registry operators
    Official,
    /// Published by the community
    Community,
}

impl Default for ProviderTier {
    fn default() -> Self {
        Self::Community
    }
}

impl fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Official => write!(f, "official"),
            Self::Community => write!(f, "community"),
        }
    }
}

impl FromStr for ProviderTier {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "official" => Ok(Self::Official),
            "community" => Ok(Self::Community),
            _ => Err(RegistryError::InvalidProviderTier(s.to_string())),
        }
    }
}

/// A Terraform provider, identified by namespace/name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub namespace: String,
    pub name: String,
    pub description: Option<String>,
    pub tier: ProviderTier,
    pub category: Option<String>,
    /// Owner of the source repository
    pub repository_owner: String,
    /// Name of the source repository, `terraform-provider-<name>`
    pub repository_name: String,
    pub latest_version_id: Option<ProviderVersionId>,
}

impl Provider {
    /// `namespace/name`
    pub fn full_id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// `terraform-provider-<name>`, the prefix of every release artifact
    pub fn full_name(&self) -> String {
        format!("{}{}", PROVIDER_REPOSITORY_PREFIX, self.name)
    }
}

/// A released, fully verified version of a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderVersion {
    pub id: ProviderVersionId,
    pub provider_id: ProviderId,
    pub version: String,
    pub git_tag: String,
    pub beta: bool,
    /// Fingerprint (or key id when no fingerprint is known) of the key that
    /// verified the checksum manifest
    pub gpg_key_fingerprint: String,
    pub published_at: Option<DateTime<Utc>>,
    pub protocol_versions: Vec<String>,
    /// Location of the signed checksum manifest
    pub shasums_url: String,
    /// Location of the manifest's detached signature
    pub shasums_signature_url: String,
    pub created_at: DateTime<Utc>,
}

/// Values for a provider version row that has not been inserted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProviderVersion {
    pub provider_id: ProviderId,
    pub version: String,
    pub git_tag: String,
    pub beta: bool,
    pub gpg_key_fingerprint: String,
    pub published_at: Option<DateTime<Utc>>,
    pub protocol_versions: Vec<String>,
    pub shasums_url: String,
    pub shasums_signature_url: String,
}

impl NewProviderVersion {
    /// Materialize the row once the database assigned an id
    pub fn into_version(self, id: ProviderVersionId, created_at: DateTime<Utc>) -> ProviderVersion {
        ProviderVersion {
            id,
            provider_id: self.provider_id,
            version: self.version,
            git_tag: self.git_tag,
            beta: self.beta,
            gpg_key_fingerprint: self.gpg_key_fingerprint,
            published_at: self.published_at,
            protocol_versions: self.protocol_versions,
            shasums_url: self.shasums_url,
            shasums_signature_url: self.shasums_signature_url,
            created_at,
        }
    }
}

/// Operating system and architecture pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

/// One platform binary of a provider version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderBinary {
    pub id: i64,
    pub provider_version_id: ProviderVersionId,
    pub platform: Platform,
    pub filename: String,
    /// Always the value from the verified checksum manifest
    pub checksum: Checksum,
    /// Download URL or storage location
    pub location: String,
}

/// Values for a provider binary row that has not been inserted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProviderBinary {
    pub platform: Platform,
    pub filename: String,
    pub checksum: Checksum,
    pub location: String,
}

/// Namespace-scoped GPG public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpgKey {
    /// Database id, `None` for keys supplied through configuration
    pub id: Option<i64>,
    /// Owning namespace, `None` for global default keys
    pub namespace: Option<String>,
    /// Long (16 hex digit) key id, uppercase
    pub key_id: String,
    /// Full fingerprint, uppercase, when known
    pub fingerprint: Option<String>,
    pub ascii_armor: String,
    pub source: Option<String>,
    pub source_url: Option<String>,
    pub trust_signature: Option<String>,
}

impl GpgKey {
    /// Create a key record, normalizing the key id to uppercase
    pub fn new(namespace: Option<String>, key_id: &str, ascii_armor: impl Into<String>) -> Self {
        Self {
            id: None,
            namespace,
            key_id: normalize_key_id(key_id),
            fingerprint: None,
            ascii_armor: ascii_armor.into(),
            source: None,
            source_url: None,
            trust_signature: None,
        }
    }

    /// Set the fingerprint
    pub fn with_fingerprint(mut self, fingerprint: &str) -> Self {
        self.fingerprint = Some(normalize_key_id(fingerprint));
        self
    }

    /// Identifier recorded against versions verified by this key
    pub fn identity(&self) -> &str {
        self.fingerprint.as_deref().unwrap_or(&self.key_id)
    }

    /// Whether an issuer key id or fingerprint from a signature designates this key
    ///
    /// Long key ids are the low 64 bits of a v4 fingerprint, so a fingerprint
    /// suffix match counts.
    pub fn matches_key_id(&self, candidate: &str) -> bool {
        let candidate = normalize_key_id(candidate);
        if candidate.is_empty() || self.key_id.is_empty() {
            return false;
        }
        if self.key_id == candidate {
            return true;
        }
        match &self.fingerprint {
            Some(fingerprint) => fingerprint == &candidate || fingerprint.ends_with(&candidate),
            None => candidate.ends_with(&self.key_id),
        }
    }

    /// Whether the key belongs to a namespace (case-insensitive)
    pub fn belongs_to(&self, namespace: &str) -> bool {
        self.namespace
            .as_deref()
            .map(|ns| ns.eq_ignore_ascii_case(namespace))
            .unwrap_or(false)
    }
}

/// Uppercase hex without whitespace or `0x` prefix
pub fn normalize_key_id(value: &str) -> String {
    let trimmed = value.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    trimmed
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}
