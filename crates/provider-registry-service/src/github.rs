//! GitHub releases adapter for [`ReleaseDiscoverer`]
//!
//! Lists releases through the GitHub REST API, looks up single releases by
//! tag and downloads release assets. Every request is bounded by the
//! configured timeout. Rate-limit responses (429, or 403 with the limit
//! exhausted) are retried with exponential backoff that honours
//! `Retry-After` and `X-RateLimit-Reset`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provider_registry_core::{ReleaseAsset, ReleaseMetadata};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::discovery::{order_new_releases, ReleaseDiscoverer, ReleaseLookup};
use crate::error::{IngestionError, IngestionResult};
use crate::snapshot::ProviderSnapshot;

/// Base URL of the public GitHub API
pub const DEFAULT_API_URL: &str = "https://api.github.com/";

const GITHUB_JSON: &str = "application/vnd.github+json";
const OCTET_STREAM: &str = "application/octet-stream";
const API_VERSION_HEADER: &str = "X-GitHub-Api-Version";
const API_VERSION: &str = "2022-11-28";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Connection and retry settings for the GitHub API
#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// API base URL, `https://api.github.com` for github.com
    pub api_url: Url,
    /// Token sent as a bearer credential
    pub token: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries after a rate-limit response
    pub max_retries: u32,
    /// First backoff delay when the host gives no hint
    pub initial_backoff: Duration,
    /// Upper bound for any single backoff delay
    pub max_backoff: Duration,
    /// Releases per listing page
    pub per_page: u32,
    /// Maximum listing pages fetched per refresh
    pub max_pages: u32,
}

impl GithubConfig {
    /// Settings for an API base URL with default limits
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            token: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            per_page: 100,
            max_pages: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    name: Option<String>,
    #[serde(default)]
    draft: bool,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
    content_type: Option<String>,
}

impl GithubRelease {
    fn into_metadata(self) -> ReleaseMetadata {
        let version = self
            .tag_name
            .strip_prefix('v')
            .unwrap_or(&self.tag_name)
            .to_string();
        let assets = self
            .assets
            .into_iter()
            .filter_map(|asset| match Url::parse(&asset.browser_download_url) {
                Ok(url) => Some(ReleaseAsset {
                    name: asset.name,
                    url,
                    content_type: asset.content_type,
                }),
                Err(e) => {
                    warn!(asset = %asset.name, error = %e, "Ignoring asset with invalid URL");
                    None
                }
            })
            .collect();

        ReleaseMetadata {
            name: self
                .name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| self.tag_name.clone()),
            tag: self.tag_name,
            version,
            published_at: self.published_at,
            assets,
        }
    }
}

/// [`ReleaseDiscoverer`] over GitHub releases
pub struct GithubReleaseDiscoverer {
    client: Client,
    config: GithubConfig,
}

impl GithubReleaseDiscoverer {
    /// Create an adapter with its own HTTP client
    pub fn new(config: GithubConfig) -> IngestionResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("provider-registry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestionError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn repository_url(&self, snapshot: &ProviderSnapshot, suffix: &str) -> IngestionResult<Url> {
        let path = format!(
            "repos/{}/{}/{}",
            snapshot.provider.repository_owner, snapshot.provider.repository_name, suffix
        );
        self.config
            .api_url
            .join(&path)
            .map_err(|e| IngestionError::Internal(format!("Invalid release URL {}: {}", path, e)))
    }

    /// Send a GET, retrying while the host reports an exhausted rate limit
    async fn get(&self, url: &Url, accept: &str) -> IngestionResult<Response> {
        let mut attempt = 0;
        loop {
            let mut request = self
                .client
                .get(url.clone())
                .header(ACCEPT, accept)
                .header(API_VERSION_HEADER, API_VERSION);
            if let Some(token) = &self.config.token {
                request = request.header(AUTHORIZATION, format!("Bearer {}", token));
            }

            let response = request.send().await.map_err(|e| map_request_error(url, e))?;
            if !is_rate_limited(response.status(), response.headers()) {
                return Ok(response);
            }

            let delay = retry_delay(response.headers(), attempt, &self.config);
            if attempt >= self.config.max_retries {
                warn!(url = %url, attempts = attempt + 1, "Release host rate limit exhausted");
                return Err(IngestionError::RateLimited {
                    retry_after_secs: delay.as_secs(),
                });
            }

            warn!(url = %url, delay_ms = delay.as_millis() as u64, "Rate limited by release host, backing off");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn fetch_all_releases(&self, snapshot: &ProviderSnapshot) -> IngestionResult<Vec<GithubRelease>> {
        let mut releases = Vec::new();
        for page in 1..=self.config.max_pages {
            let mut url = self.repository_url(snapshot, "releases")?;
            url.query_pairs_mut()
                .append_pair("per_page", &self.config.per_page.to_string())
                .append_pair("page", &page.to_string());

            let response = check_status(&url, self.get(&url, GITHUB_JSON).await?)?;
            let batch: Vec<GithubRelease> = response
                .json()
                .await
                .map_err(|e| map_request_error(&url, e))?;

            let received = batch.len();
            releases.extend(batch);
            if received < self.config.per_page as usize {
                break;
            }
        }
        Ok(releases)
    }
}

#[async_trait]
impl ReleaseDiscoverer for GithubReleaseDiscoverer {
    #[instrument(skip(self, snapshot), fields(provider = %snapshot.provider.full_id()))]
    async fn list_new_releases(&self, snapshot: &ProviderSnapshot) -> IngestionResult<Vec<ReleaseMetadata>> {
        let releases: Vec<ReleaseMetadata> = self
            .fetch_all_releases(snapshot)
            .await?
            .into_iter()
            .filter(|release| !release.draft)
            .map(GithubRelease::into_metadata)
            .collect();

        debug!(total = releases.len(), "Fetched releases");
        Ok(order_new_releases(releases, snapshot))
    }

    #[instrument(skip(self, snapshot), fields(provider = %snapshot.provider.full_id()))]
    async fn get_release(&self, snapshot: &ProviderSnapshot, version: &str) -> IngestionResult<ReleaseLookup> {
        if snapshot.is_indexed(version) {
            return Ok(ReleaseLookup::AlreadyIndexed);
        }

        for tag in [format!("v{}", version), version.to_string()] {
            let url = self.repository_url(snapshot, &format!("releases/tags/{}", tag))?;
            let response = self.get(&url, GITHUB_JSON).await?;
            if response.status() == StatusCode::NOT_FOUND {
                debug!(tag = %tag, "No release for tag");
                continue;
            }

            let release: GithubRelease = check_status(&url, response)?
                .json()
                .await
                .map_err(|e| map_request_error(&url, e))?;
            if release.draft {
                continue;
            }
            return Ok(ReleaseLookup::Found(release.into_metadata()));
        }

        Ok(ReleaseLookup::NotFound)
    }

    #[instrument(skip(self, asset), fields(asset = %asset.name))]
    async fn download_asset(&self, asset: &ReleaseAsset) -> IngestionResult<Vec<u8>> {
        let response = check_status(&asset.url, self.get(&asset.url, OCTET_STREAM).await?)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_request_error(&asset.url, e))?;

        debug!(size = bytes.len(), "Downloaded asset");
        Ok(bytes.to_vec())
    }
}

fn map_request_error(url: &Url, err: reqwest::Error) -> IngestionError {
    if err.is_timeout() {
        IngestionError::Timeout(format!("{}: {}", url, err))
    } else {
        IngestionError::ReleaseHostUnavailable(format!("{}: {}", url, err))
    }
}

fn check_status(url: &Url, response: Response) -> IngestionResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(IngestionError::ReleaseHostUnavailable(format!(
            "{} returned {}",
            url, status
        )))
    }
}

fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == StatusCode::FORBIDDEN
        && (headers.contains_key(RETRY_AFTER)
            || header_str(headers, RATE_LIMIT_REMAINING) == Some("0"))
}

/// Delay before the next attempt
///
/// `Retry-After` wins, then `X-RateLimit-Reset`, then exponential backoff
/// from the initial delay. Always capped by the configured maximum.
fn retry_delay(headers: &HeaderMap, attempt: u32, config: &GithubConfig) -> Duration {
    let hinted = header_str(headers, RETRY_AFTER.as_str())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .or_else(|| {
            header_str(headers, RATE_LIMIT_RESET)
                .and_then(|value| value.trim().parse::<i64>().ok())
                .map(|reset| {
                    let wait = reset - Utc::now().timestamp();
                    Duration::from_secs(wait.max(0) as u64)
                })
        });

    let delay = hinted.unwrap_or_else(|| {
        config
            .initial_backoff
            .saturating_mul(1u32 << attempt.min(16))
    });
    delay.min(config.max_backoff)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
