//! Checksums and checksum manifests
//!
//! A provider release publishes a `SHA256SUMS` manifest listing the SHA-256
//! of every artifact. The manifest is only trusted once its detached
//! signature has been verified; this module covers the parsing and the
//! per-file comparison.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{RegistryError, Result};

/// Length of a hex encoded SHA-256 digest
const SHA256_HEX_LEN: usize = 64;

/// Compute the lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == SHA256_HEX_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Validated SHA-256 checksum, stored lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    /// Create a new checksum with validation
    ///
    /// # Errors
    /// Returns an error if the value is not a 64 character hex string
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let normalized = value.into().to_lowercase();
        if !is_sha256_hex(&normalized) {
            return Err(RegistryError::ValidationError(format!(
                "Invalid SHA-256 checksum: {}",
                normalized
            )));
        }
        Ok(Self(normalized))
    }

    /// Checksum of the given content
    pub fn of(data: &[u8]) -> Self {
        Self(sha256_hex(data))
    }

    /// Compare against a raw hash value, ignoring case
    pub fn verify_hash(&self, hash_value: &str) -> bool {
        self.0 == hash_value.to_lowercase()
    }

    /// Get the hex value
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Checksum {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        Checksum::new(value)
    }
}

impl From<Checksum> for String {
    fn from(checksum: Checksum) -> Self {
        checksum.0
    }
}

/// Parsed checksum manifest: artifact filename to expected SHA-256
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    entries: BTreeMap<String, Checksum>,
}

impl ChecksumManifest {
    /// Parse manifest bytes
    ///
    /// Each non-empty line holds a SHA-256 hex digest and a filename separated
    /// by whitespace. The `sha256sum` layout (`hash  filename`, optionally
    /// with a `*` binary marker) is expected; `filename  hash` is accepted
    /// too.
    ///
    /// # Errors
    /// Returns [`RegistryError::MalformedManifest`] for non UTF-8 content,
    /// unparseable lines, conflicting duplicate entries or an empty manifest.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| RegistryError::MalformedManifest("manifest is not UTF-8".to_string()))?;

        let mut entries = BTreeMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let tokens: Vec<&str> = line.split_whitespace().collect();
            let (hash, filename) = match tokens.as_slice() {
                [first, second] if is_sha256_hex(first) => (*first, second.trim_start_matches('*')),
                [first, second] if is_sha256_hex(second) => (*second, *first),
                _ => {
                    return Err(RegistryError::MalformedManifest(format!(
                        "line {}: expected a SHA-256 digest and a filename",
                        index + 1
                    )))
                }
            };

            if filename.is_empty() {
                return Err(RegistryError::MalformedManifest(format!(
                    "line {}: empty filename",
                    index + 1
                )));
            }

            let checksum = Checksum::new(hash)?;
            match entries.get(filename) {
                Some(existing) if existing != &checksum => {
                    return Err(RegistryError::MalformedManifest(format!(
                        "conflicting entries for {}",
                        filename
                    )));
                }
                Some(_) => {}
                None => {
                    entries.insert(filename.to_string(), checksum);
                }
            }
        }

        if entries.is_empty() {
            return Err(RegistryError::MalformedManifest(
                "manifest contains no entries".to_string(),
            ));
        }

        Ok(Self { entries })
    }

    /// Expected checksum for a file
    pub fn get(&self, filename: &str) -> Option<&Checksum> {
        self.entries.get(filename)
    }

    /// Whether the manifest lists a file
    pub fn contains(&self, filename: &str) -> bool {
        self.entries.contains_key(filename)
    }

    /// Compare the actual hash of a file with its manifest entry
    ///
    /// Returns the manifest checksum, which is the value that must be
    /// persisted for the file.
    pub fn verify_file(&self, filename: &str, actual_hash: &str) -> Result<&Checksum> {
        let expected = self
            .get(filename)
            .ok_or_else(|| RegistryError::MissingChecksumEntry(filename.to_string()))?;

        if !expected.verify_hash(actual_hash) {
            return Err(RegistryError::ChecksumMismatch {
                filename: filename.to_string(),
                expected: expected.value().to_string(),
                actual: actual_hash.to_lowercase(),
            });
        }

        Ok(expected)
    }

    /// Iterate over (filename, checksum) pairs in filename order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Checksum)> {
        self.entries.iter().map(|(name, sum)| (name.as_str(), sum))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_sha256_hex_of_empty_input() {
        assert_eq!(sha256_hex(b""), EMPTY_SHA);
        assert_eq!(Checksum::of(b"").value(), EMPTY_SHA);
    }

    #[test]
    fn test_checksum_normalization() {
        let checksum = Checksum::new(EMPTY_SHA.to_uppercase()).unwrap();
        assert_eq!(checksum.value(), EMPTY_SHA);
        assert!(checksum.verify_hash(&EMPTY_SHA.to_uppercase()));
    }

    #[test]
    fn test_checksum_invalid() {
        assert!(Checksum::new("not_a_valid_hash").is_err());
        assert!(Checksum::new("a".repeat(63)).is_err());
        assert!(Checksum::new("g".repeat(64)).is_err());
    }

    #[test]
    fn test_parse_sha256sum_layout() {
        let text = format!(
            "{hash}  terraform-provider-test_1.0.0_linux_amd64.zip\n\
             {other} *terraform-provider-test_1.0.0_darwin_arm64.zip\n\n",
            hash = EMPTY_SHA,
            other = "b".repeat(64)
        );
        let manifest = ChecksumManifest::parse(text.as_bytes()).unwrap();

        assert_eq!(manifest.len(), 2);
        assert_eq!(
            manifest
                .get("terraform-provider-test_1.0.0_linux_amd64.zip")
                .map(|c| c.value()),
            Some(EMPTY_SHA)
        );
        assert!(manifest.contains("terraform-provider-test_1.0.0_darwin_arm64.zip"));
    }

    #[test]
    fn test_parse_filename_first_layout() {
        let text = format!("provider.zip  {}\r\n", EMPTY_SHA);
        let manifest = ChecksumManifest::parse(text.as_bytes()).unwrap();
        assert!(manifest.contains("provider.zip"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let extra_column = format!("{}  a.zip  extra", EMPTY_SHA);
        for text in [
            "",
            "\n\n",
            "this is not a manifest",
            "abc  provider.zip",
            extra_column.as_str(),
        ] {
            assert!(
                matches!(
                    ChecksumManifest::parse(text.as_bytes()),
                    Err(RegistryError::MalformedManifest(_))
                ),
                "expected {:?} to be rejected",
                text
            );
        }

        assert!(ChecksumManifest::parse(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_parse_conflicting_duplicates() {
        let text = format!("{}  a.zip\n{}  a.zip\n", EMPTY_SHA, "c".repeat(64));
        assert!(matches!(
            ChecksumManifest::parse(text.as_bytes()),
            Err(RegistryError::MalformedManifest(_))
        ));

        let same = format!("{}  a.zip\n{}  a.zip\n", EMPTY_SHA, EMPTY_SHA);
        assert_eq!(ChecksumManifest::parse(same.as_bytes()).unwrap().len(), 1);
    }

    #[test]
    fn test_verify_file() {
        let manifest = ChecksumManifest::parse(format!("{}  a.zip", EMPTY_SHA).as_bytes()).unwrap();

        assert_eq!(
            manifest.verify_file("a.zip", &EMPTY_SHA.to_uppercase()).unwrap().value(),
            EMPTY_SHA
        );
        assert!(matches!(
            manifest.verify_file("a.zip", &"d".repeat(64)),
            Err(RegistryError::ChecksumMismatch { .. })
        ));
        assert!(matches!(
            manifest.verify_file("b.zip", EMPTY_SHA),
            Err(RegistryError::MissingChecksumEntry(_))
        ));
    }
}
