use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;

/// The probe gives up after 3 seconds; a slower server counts as unreachable.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Confirms that the backend is actually reachable, as opposed to the
/// network link merely being up (captive portals, dead upstreams).
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` only if the server answered with a 2xx status in time.
    async fn check(&self) -> bool;
}

/// `HEAD` request against the backend's health endpoint.
#[derive(Clone)]
pub struct HttpHealthProbe {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, url))
    }

    /// Reuse an existing client, sharing its connection pool.
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self) -> bool {
        let request = self
            .client
            .head(&self.url)
            .header(header::CACHE_CONTROL, "no-store")
            .send();

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => {
                let ok = response.status().is_success();
                if !ok {
                    debug!(url = %self.url, status = %response.status(), "Health probe rejected");
                }
                ok
            }
            Ok(Err(e)) => {
                debug!(url = %self.url, error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                debug!(url = %self.url, timeout_ms = self.timeout.as_millis() as u64, "Health probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_server::{TestRequest, TestServer};

    #[tokio::test]
    async fn test_head_request_to_healthy_server() {
        let server = TestServer::start(|req: &TestRequest| {
            if req.method == "HEAD" && req.path == "/api/health" {
                (200, String::new())
            } else {
                (404, String::new())
            }
        })
        .await;

        let probe = HttpHealthProbe::new(format!("{}/health", server.base_url())).unwrap();
        assert!(probe.check().await);
    }

    #[tokio::test]
    async fn test_error_status_is_not_healthy() {
        let server = TestServer::start(|_: &TestRequest| (503, String::new())).await;

        let probe = HttpHealthProbe::new(format!("{}/health", server.base_url())).unwrap();
        assert!(!probe.check().await);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_not_healthy() {
        // Port 9 on loopback is discard; nothing listens there in test environments
        let probe = HttpHealthProbe::new("http://127.0.0.1:9/health")
            .unwrap()
            .with_timeout(Duration::from_millis(500));
        assert!(!probe.check().await);
    }
}
