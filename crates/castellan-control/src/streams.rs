//! Stream inventory read from the media server API.
//!
//! Viewer counts fold each `live/<name>` relay path into `<name>`. The relay
//! is fed by the console's own transcoder, which shows up as one reader of
//! the relay, so that reader is not counted as a viewer.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// One active path as reported by the media server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Path name.
    pub name: String,
    /// Whether a publisher is connected and tracks are known.
    pub ready: bool,
    /// Publisher kind (`rtmpConn`, `srtConn`, ...), when publishing.
    pub source: Option<String>,
    /// Codec names.
    pub tracks: Vec<String>,
    /// Connected readers.
    pub readers: usize,
    /// Bytes received from the publisher.
    pub bytes_received: u64,
}

/// Path prefix of the transcoder relays.
pub const RELAY_PREFIX: &str = "live/";

/// Viewers of one published stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamViewers {
    /// Path name.
    pub name: String,
    /// Readers of the path plus viewers of its relay.
    pub viewers: usize,
    /// Publisher kind.
    pub source: Option<String>,
}

/// Dashboard viewer summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerMetrics {
    /// Paths with a connected publisher.
    pub active_streams: usize,
    /// Viewers across all active streams.
    pub total_viewers: usize,
    /// Per-stream breakdown, sorted by name.
    pub streams: Vec<StreamViewers>,
}

impl ViewerMetrics {
    /// Summarise a path listing.
    #[must_use]
    pub fn from_streams(streams: &[StreamInfo]) -> Self {
        let relayed: HashMap<&str, usize> = streams
            .iter()
            .filter_map(|stream| {
                let name = stream.name.strip_prefix(RELAY_PREFIX)?;
                Some((name, stream.readers.saturating_sub(1)))
            })
            .collect();
        let mut metrics = Self::default();
        for stream in streams {
            if !stream.ready || stream.name == "all" || stream.name.starts_with(RELAY_PREFIX) {
                continue;
            }
            let viewers = stream.readers + relayed.get(stream.name.as_str()).copied().unwrap_or(0);
            metrics.active_streams += 1;
            metrics.total_viewers += viewers;
            metrics.streams.push(StreamViewers {
                name: stream.name.clone(),
                viewers,
                source: stream.source.clone(),
            });
        }
        metrics.streams.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }
}

#[derive(Debug, Deserialize)]
struct PathList {
    #[serde(default)]
    items: Vec<PathItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PathItem {
    name: String,
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    source: Option<PathSource>,
    #[serde(default)]
    tracks: Vec<String>,
    #[serde(default)]
    readers: Vec<serde_json::Value>,
    #[serde(default)]
    bytes_received: u64,
}

#[derive(Debug, Deserialize)]
struct PathSource {
    #[serde(rename = "type")]
    kind: String,
}

/// Client for the media server's path listing.
#[derive(Debug, Clone)]
pub struct MediaApiClient {
    client: reqwest::Client,
    url: String,
}

impl MediaApiClient {
    /// Client for the `/v3/paths/list` endpoint at `url`.
    ///
    /// # Errors
    ///
    /// Returns `MediaApi` when the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> ControlResult<Self> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ControlError::MediaApi {
                url: url.clone(),
                source,
            })?;
        Ok(Self { client, url })
    }

    /// Active paths, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns `MediaApi` when the request fails, the server answers with an
    /// error status, or the body does not decode.
    pub async fn streams(&self) -> ControlResult<Vec<StreamInfo>> {
        let wrap = |source| ControlError::MediaApi {
            url: self.url.clone(),
            source,
        };
        let list: PathList = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(wrap)?
            .json()
            .await
            .map_err(wrap)?;
        let mut streams: Vec<_> = list
            .items
            .into_iter()
            .map(|item| StreamInfo {
                name: item.name,
                ready: item.ready,
                source: item.source.map(|source| source.kind),
                tracks: item.tracks,
                readers: item.readers.len(),
                bytes_received: item.bytes_received,
            })
            .collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(streams)
    }

    /// Viewer summary of the current path listing.
    ///
    /// # Errors
    ///
    /// Same as [`Self::streams`].
    pub async fn viewer_metrics(&self) -> ControlResult<ViewerMetrics> {
        Ok(ViewerMetrics::from_streams(&self.streams().await?))
    }
}
