//! HTTP poll transport.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::TransportError;
use crate::resilience::timeouts::with_timeout;
use crate::telemetry::reporter::build_client;
use crate::transport::PollTransport;

/// `GET pollUrl`, expecting a 2xx JSON body.
pub struct HttpPollTransport {
    url: Url,
    timeout: Duration,
    client: ArcSwap<reqwest::Client>,
}

impl HttpPollTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::Poll(format!("invalid poll URL '{}': {}", url, e)))?;
        Ok(Self {
            url,
            timeout,
            client: ArcSwap::from_pointee(build_client(timeout)),
        })
    }
}

#[async_trait]
impl PollTransport for HttpPollTransport {
    async fn fetch(&self) -> Result<Value, TransportError> {
        let client = self.client.load_full();
        with_timeout(self.timeout, async {
            let response = client
                .get(self.url.clone())
                .send()
                .await
                .map_err(|e| TransportError::Poll(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Poll(format!("backend returned {}", status)));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| TransportError::Decode(e.to_string()))
        })
        .await
    }

    fn reset(&self) {
        tracing::info!(url = %self.url, "Rebuilding poll HTTP client");
        self.client.store(Arc::new(build_client(self.timeout)));
    }

    fn endpoint(&self) -> String {
        self.url.to_string()
    }
}

impl std::fmt::Debug for HttpPollTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPollTransport")
            .field("url", &self.url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}
