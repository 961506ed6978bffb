//! Release feed: where new console builds are published.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::{UpdateError, UpdateResult};

/// Default GitHub API endpoint for the latest console release.
pub const DEFAULT_RELEASE_FEED: &str =
    "https://api.github.com/repos/castellan-media/castellan/releases/latest";
/// Default artifact name within a release.
pub const DEFAULT_ARTIFACT_NAME: &str = "castellan-x86_64-unknown-linux-gnu";

const USER_AGENT: &str = concat!("castellan/", env!("CARGO_PKG_VERSION"));

/// One published console build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRelease {
    /// Version tag as published (`v1.4.0`).
    pub version: String,
    /// Artifact download URL.
    pub download_url: String,
    /// Lowercase hex SHA-256 of the artifact.
    pub checksum: String,
    /// Advertised artifact size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Release notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Source of release descriptors and artifacts.
#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    /// Latest published release.
    async fn latest(&self) -> UpdateResult<UpdateRelease>;

    /// Download `release`'s artifact to `dest`, returning the byte count.
    async fn download(&self, release: &UpdateRelease, dest: &Path) -> UpdateResult<u64>;
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Feed backed by the GitHub releases API. The artifact's checksum is read
/// from a sibling `<artifact>.sha256` asset.
#[derive(Debug, Clone)]
pub struct GitHubReleaseFeed {
    client: reqwest::Client,
    url: String,
    artifact: String,
}

impl GitHubReleaseFeed {
    /// Feed reading `url` and picking the asset named `artifact`.
    ///
    /// # Errors
    ///
    /// Returns `Feed` when the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, artifact: impl Into<String>, timeout: Duration) -> UpdateResult<Self> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|source| UpdateError::Feed {
                url: url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            url,
            artifact: artifact.into(),
        })
    }

    async fn get(&self, url: &str) -> UpdateResult<reqwest::Response> {
        self.client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|source| UpdateError::Feed {
                url: url.to_string(),
                source,
            })
    }
}

#[async_trait]
impl ReleaseFeed for GitHubReleaseFeed {
    #[instrument(name = "updater.feed.latest", skip(self), fields(url = %self.url))]
    async fn latest(&self) -> UpdateResult<UpdateRelease> {
        let release: GitHubRelease =
            self.get(&self.url)
                .await?
                .json()
                .await
                .map_err(|source| UpdateError::Feed {
                    url: self.url.clone(),
                    source,
                })?;
        let rejected = |reason| UpdateError::FeedFormat {
            url: self.url.clone(),
            reason,
        };
        let artifact = release
            .assets
            .iter()
            .find(|asset| asset.name == self.artifact)
            .ok_or_else(|| rejected("release has no artifact for this platform"))?;
        let checksum_name = format!("{}.sha256", self.artifact);
        let checksum_asset = release
            .assets
            .iter()
            .find(|asset| asset.name == checksum_name)
            .ok_or_else(|| rejected("release has no checksum asset"))?;
        let checksum_text = self
            .get(&checksum_asset.browser_download_url)
            .await?
            .text()
            .await
            .map_err(|source| UpdateError::Feed {
                url: checksum_asset.browser_download_url.clone(),
                source,
            })?;
        let checksum = parse_checksum(&checksum_text).ok_or_else(|| rejected("checksum asset is not a sha256 digest"))?;
        debug!(version = %release.tag_name, "release descriptor fetched");
        Ok(UpdateRelease {
            version: release.tag_name,
            download_url: artifact.browser_download_url.clone(),
            checksum,
            size: artifact.size,
            notes: release.body,
        })
    }

    #[instrument(name = "updater.feed.download", skip(self, release), fields(version = %release.version))]
    async fn download(&self, release: &UpdateRelease, dest: &Path) -> UpdateResult<u64> {
        let mut response = self.get(&release.download_url).await?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|err| UpdateError::io("download.create", dest, err))?;
        let mut written = 0_u64;
        while let Some(chunk) = response.chunk().await.map_err(|source| UpdateError::Feed {
            url: release.download_url.clone(),
            source,
        })? {
            file.write_all(&chunk)
                .await
                .map_err(|err| UpdateError::io("download.write", dest, err))?;
            written += chunk.len() as u64;
        }
        file.sync_all()
            .await
            .map_err(|err| UpdateError::io("download.sync", dest, err))?;
        Ok(written)
    }
}

/// First token of a `sha256sum`-style line, when it is a hex digest.
fn parse_checksum(text: &str) -> Option<String> {
    let token = text.split_whitespace().next()?;
    (token.len() == 64 && token.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| token.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    const DIGEST: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[tokio::test]
    async fn latest_release_is_resolved_with_checksum() -> UpdateResult<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/releases/latest");
                then.status(200).json_body(serde_json::json!({
                    "tag_name": "v1.4.0",
                    "body": "Bug fixes",
                    "assets": [
                        {
                            "name": DEFAULT_ARTIFACT_NAME,
                            "browser_download_url": server.url("/dl/castellan"),
                            "size": 4096
                        },
                        {
                            "name": format!("{DEFAULT_ARTIFACT_NAME}.sha256"),
                            "browser_download_url": server.url("/dl/castellan.sha256")
                        }
                    ]
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/dl/castellan.sha256");
                then.status(200)
                    .body(format!("{}  castellan\n", DIGEST.to_uppercase()));
            })
            .await;

        let feed = GitHubReleaseFeed::new(
            server.url("/releases/latest"),
            DEFAULT_ARTIFACT_NAME,
            Duration::from_secs(5),
        )?;
        let release = feed.latest().await?;
        assert_eq!(release.version, "v1.4.0");
        assert_eq!(release.checksum, DIGEST);
        assert_eq!(release.size, Some(4096));
        assert_eq!(release.download_url, server.url("/dl/castellan"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_platform_asset_is_a_format_error() -> UpdateResult<()> {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/releases/latest");
                then.status(200)
                    .json_body(serde_json::json!({"tag_name": "v2.0.0", "assets": []}));
            })
            .await;
        let feed = GitHubReleaseFeed::new(server.url("/releases/latest"), "other", Duration::from_secs(5))?;
        assert!(matches!(feed.latest().await, Err(UpdateError::FeedFormat { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn download_streams_to_disk() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start_async().await;
        let payload = vec![7_u8; 3000];
        server
            .mock_async(|when, then| {
                when.method(GET).path("/dl/castellan");
                then.status(200).body(payload.clone());
            })
            .await;
        let dir = TempDir::new()?;
        let dest = dir.path().join("artifact.part");
        let feed = GitHubReleaseFeed::new(server.url("/latest"), DEFAULT_ARTIFACT_NAME, Duration::from_secs(5))?;
        let release = UpdateRelease {
            version: "v1.0.1".to_string(),
            download_url: server.url("/dl/castellan"),
            checksum: DIGEST.to_string(),
            size: None,
            notes: None,
        };
        assert_eq!(feed.download(&release, &dest).await?, 3000);
        assert_eq!(std::fs::read(&dest)?, payload);
        Ok(())
    }

    #[test]
    fn checksum_lines_are_parsed() {
        assert_eq!(parse_checksum(&format!("{DIGEST} file")).as_deref(), Some(DIGEST));
        assert!(parse_checksum("abc123").is_none());
        assert!(parse_checksum("").is_none());
    }
}
