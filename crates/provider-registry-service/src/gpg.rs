//! GPG key resolution and detached signature verification

use pgp::types::PublicKeyTrait;
use pgp::{Deserializable, SignedPublicKey, StandaloneSignature};
use provider_registry_core::{normalize_key_id, GpgKey};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{IngestionError, IngestionResult};

const ARMOR_HEADER: &[u8] = b"-----BEGIN PGP";

/// OpenPGP operations needed to trust a release
pub trait SignatureVerifier: Send + Sync {
    /// Issuer key ids declared by a detached signature, uppercase hex
    ///
    /// Empty when the signature names no issuer.
    fn issuer_key_ids(&self, signature: &[u8]) -> IngestionResult<Vec<String>>;

    /// Key ids of a public key's primary key and subkeys, uppercase hex
    fn key_ids(&self, key: &GpgKey) -> IngestionResult<Vec<String>>;

    /// Verify a detached signature over `data`
    fn verify(&self, key: &GpgKey, data: &[u8], signature: &[u8]) -> IngestionResult<()>;
}

/// [`SignatureVerifier`] backed by rPGP
#[derive(Debug, Clone, Default)]
pub struct PgpSignatureVerifier;

impl PgpSignatureVerifier {
    pub fn new() -> Self {
        Self
    }

    fn parse_key(key: &GpgKey) -> IngestionResult<SignedPublicKey> {
        let (public_key, _headers) = SignedPublicKey::from_string(&key.ascii_armor).map_err(|e| {
            IngestionError::InvalidSignature(format!("unreadable public key {}: {}", key.key_id, e))
        })?;
        public_key.verify().map_err(|e| {
            IngestionError::InvalidSignature(format!("public key {} failed self-check: {}", key.key_id, e))
        })?;
        Ok(public_key)
    }

    /// Build a key record from an ASCII-armored public key
    ///
    /// Fills in the primary key id and fingerprint.
    pub fn read_key(namespace: Option<String>, ascii_armor: &str) -> IngestionResult<GpgKey> {
        let (public_key, _headers) = SignedPublicKey::from_string(ascii_armor)
            .map_err(|e| IngestionError::InvalidSignature(format!("unreadable public key: {}", e)))?;
        public_key
            .verify()
            .map_err(|e| IngestionError::InvalidSignature(format!("public key failed self-check: {}", e)))?;

        let key_id = hex::encode_upper(public_key.key_id());
        let fingerprint = hex::encode_upper(public_key.fingerprint().as_bytes());
        Ok(GpgKey::new(namespace, &key_id, ascii_armor).with_fingerprint(&fingerprint))
    }

    fn parse_signature(signature: &[u8]) -> IngestionResult<StandaloneSignature> {
        let parsed = if is_armored(signature) {
            let text = std::str::from_utf8(signature).map_err(|_| {
                IngestionError::InvalidSignature("armored signature is not UTF-8".to_string())
            })?;
            StandaloneSignature::from_string(text).map(|(sig, _headers)| sig)
        } else {
            StandaloneSignature::from_bytes(signature)
        };

        parsed.map_err(|e| IngestionError::InvalidSignature(format!("unreadable signature: {}", e)))
    }
}

impl SignatureVerifier for PgpSignatureVerifier {
    fn issuer_key_ids(&self, signature: &[u8]) -> IngestionResult<Vec<String>> {
        let signature = Self::parse_signature(signature)?;
        Ok(signature
            .signature
            .issuer()
            .into_iter()
            .map(hex::encode_upper)
            .collect())
    }

    fn key_ids(&self, key: &GpgKey) -> IngestionResult<Vec<String>> {
        let public_key = Self::parse_key(key)?;
        let mut ids = vec![hex::encode_upper(public_key.key_id())];
        ids.extend(
            public_key
                .public_subkeys
                .iter()
                .map(|subkey| hex::encode_upper(subkey.key_id())),
        );
        Ok(ids)
    }

    fn verify(&self, key: &GpgKey, data: &[u8], signature: &[u8]) -> IngestionResult<()> {
        let public_key = Self::parse_key(key)?;
        let signature = Self::parse_signature(signature)?;

        if signature.verify(&public_key, data).is_ok() {
            return Ok(());
        }
        for subkey in &public_key.public_subkeys {
            if signature.verify(subkey, data).is_ok() {
                return Ok(());
            }
        }

        Err(IngestionError::InvalidSignature(format!(
            "signature does not verify with key {}",
            key.identity()
        )))
    }
}

fn is_armored(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..].starts_with(ARMOR_HEADER)
}

/// Picks the key that should verify a release signature
///
/// Candidates are the namespace's keys followed by the configured default
/// keys. When the signature names its issuer, the first candidate whose key
/// id, fingerprint or subkey id matches wins. Otherwise each candidate is
/// tried until one verifies the manifest.
pub struct GpgKeyResolver {
    verifier: Arc<dyn SignatureVerifier>,
    default_keys: Vec<GpgKey>,
}

impl GpgKeyResolver {
    pub fn new(verifier: Arc<dyn SignatureVerifier>, default_keys: Vec<GpgKey>) -> Self {
        Self {
            verifier,
            default_keys,
        }
    }

    /// Verifier used for signature checks
    pub fn verifier(&self) -> &Arc<dyn SignatureVerifier> {
        &self.verifier
    }

    /// Configured default keys
    pub fn default_keys(&self) -> &[GpgKey] {
        &self.default_keys
    }

    /// Namespace keys first, then default keys
    pub fn candidates(&self, namespace: &str, namespace_keys: Vec<GpgKey>) -> Vec<GpgKey> {
        namespace_keys
            .into_iter()
            .filter(|key| key.belongs_to(namespace))
            .chain(self.default_keys.iter().cloned())
            .collect()
    }

    /// Resolve the key for a release
    ///
    /// `release` is only used in error and log messages.
    pub fn resolve(
        &self,
        namespace: &str,
        namespace_keys: Vec<GpgKey>,
        release: &str,
        manifest: &[u8],
        signature: &[u8],
    ) -> IngestionResult<GpgKey> {
        let candidates = self.candidates(namespace, namespace_keys);
        let hints: Vec<String> = self
            .verifier
            .issuer_key_ids(signature)?
            .iter()
            .map(|hint| normalize_key_id(hint))
            .filter(|hint| !hint.is_empty())
            .collect();

        let found = if hints.is_empty() {
            debug!(release, candidates = candidates.len(), "Signature names no issuer, trying each key");
            candidates
                .into_iter()
                .find(|candidate| self.verifier.verify(candidate, manifest, signature).is_ok())
        } else {
            debug!(release, issuers = ?hints, "Matching signature issuer");
            let matching: Vec<GpgKey> = candidates
                .into_iter()
                .filter(|candidate| self.matches_any(candidate, &hints))
                .collect();
            // A verifying match wins; otherwise the first match is reported
            // so the verifier can name the bad signature.
            let verified = matching
                .iter()
                .position(|candidate| self.verifier.verify(candidate, manifest, signature).is_ok());
            matching.into_iter().nth(verified.unwrap_or(0))
        };

        found.ok_or_else(|| IngestionError::CouldNotFindGpgKeyForProviderVersion {
            release: release.to_string(),
            namespace: namespace.to_string(),
        })
    }

    fn matches_any(&self, candidate: &GpgKey, hints: &[String]) -> bool {
        if hints.iter().any(|hint| candidate.matches_key_id(hint)) {
            return true;
        }

        match self.verifier.key_ids(candidate) {
            Ok(ids) => ids
                .iter()
                .any(|id| hints.iter().any(|hint| hint == id || hint.ends_with(id.as_str()))),
            Err(e) => {
                warn!(key_id = %candidate.key_id, error = %e, "Skipping unreadable GPG key");
                false
            }
        }
    }
}
