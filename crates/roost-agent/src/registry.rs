//! Release registry client
//!
//! Queries a GitHub-style releases API for the latest release of each
//! component and fetches companion checksum assets. Registry errors are
//! reported as `SourceError::Unavailable` so a transient outage is never
//! mistaken for "no update exists"; only an explicit 404 on the latest
//! release becomes `NotFound`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use roost_core::digest::parse_checksum_text;
use roost_core::release::{normalize_tag, ReleaseAsset, ReleaseMetadata, ReleaseSource, SourceError};

/// HTTP timeout for registry metadata requests
const REGISTRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Latest-release response from the registry API
#[derive(Debug, Deserialize)]
struct ApiRelease {
    tag_name: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<ApiAsset>,
}

#[derive(Debug, Deserialize)]
struct ApiAsset {
    name: String,
    browser_download_url: String,
}

/// Release source backed by a GitHub-style releases API.
pub struct GithubReleaseSource {
    client: reqwest::Client,
    api_base: String,
    /// Component name -> repository slug (`owner/name`)
    repos: BTreeMap<String, String>,
}

impl GithubReleaseSource {
    pub fn new(
        api_base: &str,
        repos: BTreeMap<String, String>,
        token: Option<String>,
    ) -> Result<Self, SourceError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = token {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SourceError::Unavailable(format!("invalid registry token: {e}")))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .timeout(REGISTRY_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            repos,
        })
    }

    fn latest_url(&self, repo: &str) -> String {
        format!("{}/repos/{}/releases/latest", self.api_base, repo)
    }
}

#[async_trait]
impl ReleaseSource for GithubReleaseSource {
    async fn latest_release(&self, component: &str) -> Result<ReleaseMetadata, SourceError> {
        let repo = self
            .repos
            .get(component)
            .ok_or_else(|| SourceError::NotFound(component.to_string()))?;
        let url = self.latest_url(repo);
        debug!(component = %component, url = %url, "Fetching latest release");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(component.to_string()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "registry returned {} for {url}",
                response.status()
            )));
        }

        let release: ApiRelease = response
            .json()
            .await
            .map_err(|e| SourceError::Unavailable(format!("failed to parse release: {e}")))?;

        let metadata = ReleaseMetadata {
            version: normalize_tag(&release.tag_name),
            tag: release.tag_name,
            published_at: release.published_at,
            notes: release.body.unwrap_or_default(),
            assets: release
                .assets
                .into_iter()
                .map(|a| ReleaseAsset {
                    name: a.name,
                    download_url: a.browser_download_url,
                })
                .collect(),
        };

        info!(
            component = %component,
            tag = %metadata.tag,
            assets = metadata.assets.len(),
            "Fetched latest release"
        );
        Ok(metadata)
    }

    async fn fetch_checksum(&self, asset: &ReleaseAsset) -> Result<String, SourceError> {
        let response = self
            .client
            .get(&asset.download_url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "checksum asset fetch returned {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        match parse_checksum_text(&body) {
            Some(digest) => Ok(digest),
            None => {
                warn!(asset = %asset.name, "Checksum asset was empty");
                Err(SourceError::Unavailable(format!(
                    "checksum asset {} is empty",
                    asset.name
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(api_base: &str, token: Option<String>) -> GithubReleaseSource {
        let mut repos = BTreeMap::new();
        repos.insert("kernel".to_string(), "example/linux-firmware".to_string());
        GithubReleaseSource::new(api_base, repos, token).unwrap()
    }

    fn release_json(server_uri: &str) -> serde_json::Value {
        serde_json::json!({
            "tag_name": "v6.6.51",
            "published_at": "2024-10-01T08:00:00Z",
            "body": "Linux 6.6.y LTS",
            "assets": [
                {
                    "name": "kernel-6.6.51.tar.gz",
                    "browser_download_url": format!("{server_uri}/dl/kernel-6.6.51.tar.gz")
                },
                {
                    "name": "kernel-6.6.51.tar.gz.sha256",
                    "browser_download_url": format!("{server_uri}/dl/kernel-6.6.51.tar.gz.sha256")
                }
            ]
        })
    }

    #[tokio::test]
    async fn test_latest_release_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/example/linux-firmware/releases/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(release_json(&server.uri())))
            .mount(&server)
            .await;

        let source = source(&server.uri(), None);
        let release = source.latest_release("kernel").await.unwrap();
        assert_eq!(release.tag, "v6.6.51");
        assert_eq!(release.version, "6.6.51");
        assert_eq!(release.payload_asset().unwrap().name, "kernel-6.6.51.tar.gz");
        assert!(release.checksum_asset().is_some());
        assert_eq!(release.notes, "Linux 6.6.y LTS");
    }

    #[tokio::test]
    async fn test_bearer_token_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/example/linux-firmware/releases/latest"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(release_json(&server.uri())))
            .mount(&server)
            .await;

        let source = source(&server.uri(), Some("sekrit".to_string()));
        assert!(source.latest_release("kernel").await.is_ok());
    }

    #[tokio::test]
    async fn test_404_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/example/linux-firmware/releases/latest"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = source(&server.uri(), None);
        let err = source.latest_release("kernel").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/example/linux-firmware/releases/latest"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = source(&server.uri(), None);
        let err = source.latest_release("kernel").await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_unknown_component_is_not_found() {
        let server = MockServer::start().await;
        let source = source(&server.uri(), None);
        let err = source.latest_release("bootloader").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_checksum_first_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl/kernel.tar.gz.sha256"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("deadbeefcafe  kernel-6.6.51.tar.gz\n"),
            )
            .mount(&server)
            .await;

        let source = source(&server.uri(), None);
        let asset = ReleaseAsset {
            name: "kernel.tar.gz.sha256".to_string(),
            download_url: format!("{}/dl/kernel.tar.gz.sha256", server.uri()),
        };
        assert_eq!(source.fetch_checksum(&asset).await.unwrap(), "deadbeefcafe");
    }
}
