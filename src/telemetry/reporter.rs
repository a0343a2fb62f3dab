//! Reporting collaborators (flush targets).
//!
//! # Responsibilities
//! - Deliver a batch of telemetry records somewhere durable
//! - Rebuild connection state on request (recovery remediation)
//!
//! # Design Decisions
//! - Batches are JSON arrays; the consumer is assumed idempotent, no dedupe keys
//! - The HTTP client sits behind an ArcSwap so `reset` never blocks a flush

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;
use crate::resilience::timeouts::with_timeout;
use crate::telemetry::record::TelemetryRecord;

/// Accepts flushed telemetry batches.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, batch: &[TelemetryRecord]) -> Result<(), TransportError>;

    /// Drop pooled connections and start fresh.
    fn reset(&self) {}
}

/// POSTs batches to an HTTP collector.
pub struct HttpReporter {
    url: Url,
    timeout: Duration,
    client: ArcSwap<reqwest::Client>,
}

impl HttpReporter {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let url = Url::parse(url)
            .map_err(|e| TransportError::Report(format!("invalid report URL '{}': {}", url, e)))?;
        Ok(Self {
            url,
            timeout,
            client: ArcSwap::from_pointee(build_client(timeout)),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn report(&self, batch: &[TelemetryRecord]) -> Result<(), TransportError> {
        let client = self.client.load_full();
        with_timeout(self.timeout, async {
            let response = client
                .post(self.url.clone())
                .json(batch)
                .send()
                .await
                .map_err(|e| TransportError::Report(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Report(format!("collector returned {}", status)));
            }
            Ok(())
        })
        .await
    }

    fn reset(&self) {
        tracing::info!(url = %self.url, "Rebuilding reporter HTTP client");
        self.client.store(Arc::new(build_client(self.timeout)));
    }
}

impl std::fmt::Debug for HttpReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReporter")
            .field("url", &self.url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Writes batches to the log. Used when no collector is configured.
#[derive(Debug, Default)]
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn report(&self, batch: &[TelemetryRecord]) -> Result<(), TransportError> {
        tracing::info!(records = batch.len(), "Telemetry batch");
        for record in batch {
            tracing::debug!(
                timestamp = record.timestamp,
                category = %record.category,
                payload = %record.payload,
                "Telemetry record"
            );
        }
        Ok(())
    }
}

pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}
