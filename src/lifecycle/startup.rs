//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the real transports from validated configuration
//! - Pick the reporter (HTTP collector or log)
//! - Spawn the channel
//!
//! # Design Decisions
//! - Fail fast: a bad endpoint is a startup error, not a runtime one
//! - The channel starts disconnected; the caller decides when to connect

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelManager;
use crate::config::validation::{validate_config, ValidationError};
use crate::config::ChannelConfig;
use crate::error::TransportError;
use crate::telemetry::{HttpReporter, LogReporter, Reporter};
use crate::transport::{HttpPollTransport, WsPushTransport};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0:?}")]
    Config(Vec<ValidationError>),

    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Construct a channel against the configured endpoints.
///
/// Must be called inside a Tokio runtime.
pub fn build_manager(config: &ChannelConfig) -> Result<ChannelManager, StartupError> {
    validate_config(config).map_err(StartupError::Config)?;

    let request_timeout = Duration::from_millis(config.connection.request_timeout_ms);
    let push = WsPushTransport::new(&config.connection.push_url, request_timeout)?;
    let poll = HttpPollTransport::new(&config.connection.poll_url, request_timeout)?;
    let reporter: Arc<dyn Reporter> = match &config.telemetry.report_url {
        Some(url) => Arc::new(HttpReporter::new(url, request_timeout)?),
        None => {
            tracing::info!("No report_url configured, telemetry batches go to the log");
            Arc::new(LogReporter)
        }
    };

    tracing::info!(
        push_url = %config.connection.push_url,
        poll_url = %config.connection.poll_url,
        "Channel transports ready"
    );
    Ok(ChannelManager::new(config, Arc::new(push), Arc::new(poll), reporter))
}
