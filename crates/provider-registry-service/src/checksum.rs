//! Signed checksum manifest verification

use provider_registry_core::{sha256_hex, Checksum, ChecksumManifest, GpgKey, RegistryError};
use std::sync::Arc;
use tracing::debug;

use crate::error::{IngestionError, IngestionResult};
use crate::gpg::SignatureVerifier;

/// Verifies `SHA256SUMS` manifests and the artifacts they list
pub struct ChecksumManifestVerifier {
    verifier: Arc<dyn SignatureVerifier>,
}

impl ChecksumManifestVerifier {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { verifier }
    }

    /// Check the detached signature, then parse the manifest
    ///
    /// Nothing is parsed unless the signature verifies.
    pub fn verify(
        &self,
        manifest_bytes: &[u8],
        signature_bytes: &[u8],
        key: &GpgKey,
    ) -> IngestionResult<ChecksumManifest> {
        self.verifier.verify(key, manifest_bytes, signature_bytes)?;
        debug!(key = %key.identity(), "Checksum manifest signature verified");

        let manifest = ChecksumManifest::parse(manifest_bytes)?;
        debug!(entries = manifest.len(), "Checksum manifest parsed");
        Ok(manifest)
    }

    /// Compare an artifact hash with its manifest entry
    ///
    /// Returns the manifest checksum, the value to persist for the artifact.
    pub fn verify_binary(
        &self,
        manifest: &ChecksumManifest,
        filename: &str,
        actual_hash: &str,
    ) -> IngestionResult<Checksum> {
        match manifest.verify_file(filename, actual_hash) {
            Ok(checksum) => Ok(checksum.clone()),
            Err(RegistryError::MissingChecksumEntry(artifact)) => {
                Err(IngestionError::MissingSignatureArtifact {
                    artifact,
                    context: "not listed in the signed checksum manifest".to_string(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Hash downloaded content and verify it against the manifest
    pub fn verify_content(
        &self,
        manifest: &ChecksumManifest,
        filename: &str,
        content: &[u8],
    ) -> IngestionResult<Checksum> {
        self.verify_binary(manifest, filename, &sha256_hex(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpg::PgpSignatureVerifier;

    const ACME_KEY: &str = include_str!("../../../testdata/acme-signing-key.asc");
    const OTHER_KEY: &str = include_str!("../../../testdata/other-signing-key.asc");
    const SHASUMS: &[u8] =
        include_bytes!("../../../testdata/artifacts/terraform-provider-widgets_1.0.0_SHA256SUMS");
    const SIGNATURE: &[u8] =
        include_bytes!("../../../testdata/artifacts/terraform-provider-widgets_1.0.0_SHA256SUMS.sig");
    const OTHER_SIGNATURE: &[u8] = include_bytes!("../../../testdata/SHA256SUMS.other.sig");
    const MALFORMED: &[u8] = include_bytes!("../../../testdata/malformed_SHA256SUMS");
    const MALFORMED_SIGNATURE: &[u8] = include_bytes!("../../../testdata/malformed_SHA256SUMS.sig");
    const LINUX_ZIP: &[u8] =
        include_bytes!("../../../testdata/artifacts/terraform-provider-widgets_1.0.0_linux_amd64.zip");

    fn verifier() -> ChecksumManifestVerifier {
        ChecksumManifestVerifier::new(Arc::new(PgpSignatureVerifier::new()))
    }

    fn acme_key() -> GpgKey {
        GpgKey::new(Some("acme".to_string()), "30EAFE4B154945D1", ACME_KEY)
    }

    #[test]
    fn test_verify_signed_manifest() {
        let manifest = verifier().verify(SHASUMS, SIGNATURE, &acme_key()).unwrap();
        assert_eq!(manifest.len(), 3);
        assert!(manifest.contains("terraform-provider-widgets_1.0.0_linux_amd64.zip"));
    }

    #[test]
    fn test_signature_from_other_key_is_rejected() {
        assert!(matches!(
            verifier().verify(SHASUMS, OTHER_SIGNATURE, &acme_key()),
            Err(IngestionError::InvalidSignature(_))
        ));

        let other = GpgKey::new(Some("acme".to_string()), "4AE18CB2EE4EC3DA", OTHER_KEY);
        assert!(verifier().verify(SHASUMS, OTHER_SIGNATURE, &other).is_ok());
    }

    #[test]
    fn test_signed_but_malformed_manifest() {
        assert!(matches!(
            verifier().verify(MALFORMED, MALFORMED_SIGNATURE, &acme_key()),
            Err(IngestionError::MalformedManifest(_))
        ));
    }

    #[test]
    fn test_verify_content() {
        let verifier = verifier();
        let manifest = verifier.verify(SHASUMS, SIGNATURE, &acme_key()).unwrap();

        let checksum = verifier
            .verify_content(
                &manifest,
                "terraform-provider-widgets_1.0.0_linux_amd64.zip",
                LINUX_ZIP,
            )
            .unwrap();
        assert_eq!(
            checksum.value(),
            "54d7955b5ce57a57ff95e90d7441a8f1fa42f463ddd85d5cf0c6f74d3280f85e"
        );

        assert!(matches!(
            verifier.verify_content(
                &manifest,
                "terraform-provider-widgets_1.0.0_linux_amd64.zip",
                b"tampered"
            ),
            Err(IngestionError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unlisted_binary() {
        let verifier = verifier();
        let manifest = verifier.verify(SHASUMS, SIGNATURE, &acme_key()).unwrap();
        assert!(matches!(
            verifier.verify_binary(
                &manifest,
                "terraform-provider-widgets_1.0.0_windows_amd64.zip",
                "00"
            ),
            Err(IngestionError::MissingSignatureArtifact { .. })
        ));
    }
}
