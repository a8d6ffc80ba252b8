//! Test fixtures
//!
//! Builders for releases published to the scripted release host.

use chrono::{TimeZone, Utc};
use provider_registry_core::{ReleaseAsset, ReleaseMetadata};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use url::Url;

use super::{FakeVerifier, ScriptedDiscoverer, ACME_KEY_ID, NAME};

const RELEASE_HOST: &str = "https://releases.example.com/acme/terraform-provider-widgets/";

/// Lowercase hex SHA-256, computed independently of the code under test
pub fn sha256(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// A release to publish, signed by the acme key with two platforms by default
#[derive(Debug, Clone)]
pub struct ReleaseFixture {
    version: String,
    platforms: Vec<(String, String)>,
    signer: Option<String>,
    forged_signature: bool,
    tampered: Vec<String>,
    protocols: Option<Vec<String>>,
}

impl ReleaseFixture {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            platforms: vec![
                ("linux".to_string(), "amd64".to_string()),
                ("darwin".to_string(), "arm64".to_string()),
            ],
            signer: Some(ACME_KEY_ID.to_string()),
            forged_signature: false,
            tampered: Vec::new(),
            protocols: None,
        }
    }

    pub fn signed_by(mut self, key_id: &str) -> Self {
        self.signer = Some(key_id.to_string());
        self
    }

    /// No `SHA256SUMS.sig` asset
    pub fn unsigned(mut self) -> Self {
        self.signer = None;
        self
    }

    /// Sign bytes other than the manifest
    pub fn forged_signature(mut self) -> Self {
        self.forged_signature = true;
        self
    }

    /// Serve content for this platform that differs from the manifest
    pub fn tamper(mut self, os: &str, arch: &str) -> Self {
        self.tampered.push(format!("{}_{}", os, arch));
        self
    }

    /// Ship a manifest.json advertising these protocols
    pub fn protocols(mut self, protocols: &[&str]) -> Self {
        self.protocols = Some(protocols.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn publish(self, discoverer: &ScriptedDiscoverer) -> ReleaseMetadata {
        let tag = format!("v{}", self.version);
        let prefix = format!("terraform-provider-{}_{}", NAME, self.version);
        let mut content = HashMap::new();
        let mut assets = Vec::new();
        let mut manifest = String::new();

        for (os, arch) in &self.platforms {
            let filename = format!("{}_{}_{}.zip", prefix, os, arch);
            let genuine = format!("{} {} {} binary", self.version, os, arch).into_bytes();
            manifest.push_str(&format!("{}  {}\n", sha256(&genuine), filename));

            let served = if self.tampered.contains(&format!("{}_{}", os, arch)) {
                b"tampered binary".to_vec()
            } else {
                genuine
            };
            assets.push(add_asset(&mut content, &tag, &filename, served));
        }

        if let Some(protocols) = &self.protocols {
            let filename = format!("{}_manifest.json", prefix);
            let json = serde_json::json!({
                "version": 1,
                "metadata": { "protocol_versions": protocols },
            });
            let bytes = serde_json::to_vec(&json).unwrap();
            manifest.push_str(&format!("{}  {}\n", sha256(&bytes), filename));
            assets.push(add_asset(&mut content, &tag, &filename, bytes));
        }

        let manifest = manifest.into_bytes();
        if let Some(signer) = &self.signer {
            let signed: &[u8] = if self.forged_signature { b"something else" } else { &manifest };
            let signature = FakeVerifier::sign(signer, signed);
            assets.push(add_asset(
                &mut content,
                &tag,
                &format!("{}_SHA256SUMS.sig", prefix),
                signature,
            ));
        }
        assets.push(add_asset(&mut content, &tag, &format!("{}_SHA256SUMS", prefix), manifest));

        let release = ReleaseMetadata {
            name: tag.clone(),
            tag,
            version: self.version,
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single(),
            assets,
        };
        discoverer.publish(release.clone(), content);
        release
    }
}

/// Publish the OpenPGP-signed release under `testdata/artifacts`
pub fn publish_signed_testdata(discoverer: &ScriptedDiscoverer) -> ReleaseMetadata {
    let directory = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata/artifacts");
    let tag = "v1.0.0".to_string();
    let mut content = HashMap::new();
    let mut assets = Vec::new();

    let mut names: Vec<String> = std::fs::read_dir(&directory)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    for name in names {
        let bytes = std::fs::read(directory.join(&name)).unwrap();
        assets.push(add_asset(&mut content, &tag, &name, bytes));
    }

    let release = ReleaseMetadata {
        name: "Widgets 1.0.0".to_string(),
        tag,
        version: "1.0.0".to_string(),
        published_at: None,
        assets,
    };
    discoverer.publish(release.clone(), content);
    release
}

/// ASCII-armored public key from `testdata/`
pub fn testdata_key(file: &str) -> String {
    std::fs::read_to_string(Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(file)).unwrap()
}

fn add_asset(content: &mut HashMap<String, Vec<u8>>, tag: &str, filename: &str, bytes: Vec<u8>) -> ReleaseAsset {
    let url = Url::parse(RELEASE_HOST)
        .unwrap()
        .join(&format!("{}/{}", tag, filename))
        .unwrap();
    content.insert(url.to_string(), bytes);
    ReleaseAsset::new(filename, url)
}
