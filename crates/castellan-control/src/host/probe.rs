//! HTTP liveness probe against the media server API.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::HealthProbe;
use crate::error::{ControlError, ControlResult};

/// Default per-probe time limit.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probe that treats any HTTP response (including 401) as alive.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthProbe {
    /// Probe `url` with the given time limit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the URL is not absolute HTTP(S).
    pub fn new(url: impl Into<String>, timeout: Duration) -> ControlResult<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ControlError::invalid("health_url", "must be an http(s) URL", url));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ControlError::MediaApi {
                url: url.clone(),
                source,
            })?;
        Ok(Self { client, url })
    }

    /// Probed URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                debug!(status = response.status().as_u16(), "health probe answered");
                true
            }
            Err(err) => {
                debug!(error = %err, "health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn any_http_answer_counts_as_alive() -> ControlResult<()> {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/paths/list");
                then.status(401);
            })
            .await;
        let probe = HttpHealthProbe::new(server.url("/v3/paths/list"), DEFAULT_PROBE_TIMEOUT)?;
        assert!(probe.check().await);
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn refused_connection_is_dead() -> ControlResult<()> {
        let probe = HttpHealthProbe::new("http://127.0.0.1:9/", Duration::from_millis(200))?;
        assert!(!probe.check().await);
        assert!(HttpHealthProbe::new("ftp://host", DEFAULT_PROBE_TIMEOUT).is_err());
        Ok(())
    }
}
