//! Latest version selection

use provider_registry_core::{LooseVersion, ProviderVersion};

/// Highest non-beta version, `None` when every version is a beta
///
/// Versions of equal precedence resolve to the one indexed first.
pub fn latest_version(versions: &[ProviderVersion]) -> Option<&ProviderVersion> {
    let mut latest: Option<(LooseVersion, &ProviderVersion)> = None;
    for version in versions.iter().filter(|v| !v.beta) {
        let Ok(parsed) = LooseVersion::parse(&version.version) else {
            continue;
        };
        match &latest {
            Some((current, _)) if &parsed <= current => {}
            _ => latest = Some((parsed, version)),
        }
    }
    latest.map(|(_, version)| version)
}
