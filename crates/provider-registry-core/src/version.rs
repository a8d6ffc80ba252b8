//! Loose semantic version parsing and ordering
//!
//! Provider releases are tagged by humans, so version strings are not always
//! strict SemVer. [`LooseVersion`] accepts a leading `v`, missing minor/patch
//! components and free-form pre-release suffixes while still producing a
//! total order:
//!
//! - release components compare numerically, missing components count as 0
//!   (`0.1.09` and `0.1.9` have equal precedence)
//! - a version with a pre-release suffix ranks below the bare release
//! - pre-release identifiers compare numeric-by-value, alphanumeric lexically,
//!   numeric below alphanumeric, shorter prefix below longer
//! - build metadata (`+...`) is ignored

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{RegistryError, Result};

/// A single pre-release identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u64),
    Alpha(String),
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Identifier::Numeric(a), Identifier::Numeric(b)) => a.cmp(b),
            (Identifier::Numeric(_), Identifier::Alpha(_)) => Ordering::Less,
            (Identifier::Alpha(_), Identifier::Numeric(_)) => Ordering::Greater,
            (Identifier::Alpha(a), Identifier::Alpha(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(n) => write!(f, "{}", n),
            Identifier::Alpha(s) => write!(f, "{}", s),
        }
    }
}

/// Parsed loose semantic version
///
/// Equality and ordering are by precedence only; the original text is kept
/// for display and persistence.
#[derive(Debug, Clone)]
pub struct LooseVersion {
    original: String,
    release: Vec<u64>,
    pre: Vec<Identifier>,
}

impl LooseVersion {
    /// Parse a version string
    ///
    /// # Errors
    /// Returns [`RegistryError::InvalidVersionFormat`] if no major component
    /// can be parsed or the suffix contains characters outside `[0-9A-Za-z.-]`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || RegistryError::InvalidVersionFormat(input.to_string());

        let trimmed = input.trim();
        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        // Build metadata never affects precedence
        let body = body.split_once('+').map(|(main, _)| main).unwrap_or(body);

        let mut release = Vec::new();
        let mut rest = body;
        loop {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits == 0 {
                break;
            }
            let component = rest[..digits].parse::<u64>().map_err(|_| invalid())?;
            release.push(component);
            rest = &rest[digits..];

            match rest.strip_prefix('.') {
                Some(next) if next.starts_with(|c: char| c.is_ascii_digit()) => rest = next,
                _ => break,
            }
        }

        if release.is_empty() {
            return Err(invalid());
        }

        let suffix = rest.trim_start_matches(['-', '.']);
        let mut pre = Vec::new();
        if !suffix.is_empty() {
            for part in suffix.split(['.', '-']) {
                if part.is_empty() {
                    continue;
                }
                if !part.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(invalid());
                }
                let identifier = if part.chars().all(|c| c.is_ascii_digit()) {
                    part.parse::<u64>()
                        .map(Identifier::Numeric)
                        .map_err(|_| invalid())?
                } else {
                    Identifier::Alpha(part.to_string())
                };
                pre.push(identifier);
            }
        }

        Ok(Self {
            original: input.trim().to_string(),
            release,
            pre,
        })
    }

    /// The version string as it was given
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Numeric release components
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// Pre-release identifiers
    pub fn pre(&self) -> &[Identifier] {
        &self.pre
    }

    /// Major component
    pub fn major(&self) -> u64 {
        self.release[0]
    }

    /// Whether the version carries a pre-release suffix
    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    fn component(&self, index: usize) -> u64 {
        self.release.get(index).copied().unwrap_or(0)
    }
}

impl Ord for LooseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.release.len().max(other.release.len());
        for index in 0..width {
            match self.component(index).cmp(&other.component(index)) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }

        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.pre.cmp(&other.pre),
        }
    }
}

impl PartialOrd for LooseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LooseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LooseVersion {}

impl fmt::Display for LooseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl FromStr for LooseVersion {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for LooseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.original)
    }
}

impl<'de> Deserialize<'de> for LooseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        LooseVersion::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Stable sort of versions by precedence
///
/// Versions of equal precedence keep their relative input order, so the
/// result is deterministic for a given input.
pub fn sort_versions(versions: &mut [LooseVersion], descending: bool) {
    if descending {
        versions.sort_by(|a, b| b.cmp(a));
    } else {
        versions.sort();
    }
}
