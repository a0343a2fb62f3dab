//! Transport subsystem.
//!
//! # Data Flow
//! ```text
//! Push (push.rs):
//!     PushTransport::connect → PushSession { sink, stream }
//!     stream → InboundFrame {type, payload} → channel actor
//!     channel writer → OutboundFrame {type, data, timestamp} → sink
//!
//! Poll (poll.rs):
//!     PollTransport::fetch → snapshot JSON (same shape as push `metrics` payloads)
//!
//! Loopback (memory.rs):
//!     In-process peers for tests and network-free embedding
//! ```
//!
//! # Design Decisions
//! - One session per connect; reconnect means a new session, never resume
//! - Malformed inbound frames are skipped, not fatal
//! - `reset` rebuilds pooled clients and is the recovery remediation hook

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::TransportError;
use crate::telemetry::record::unix_millis;

pub mod memory;
pub mod poll;
pub mod push;

pub use poll::HttpPollTransport;
pub use push::WsPushTransport;

/// Server-to-client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl InboundFrame {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self { kind: kind.into(), payload }
    }
}

/// Client-to-server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    /// Unix time in milliseconds.
    pub timestamp: u64,
}

impl OutboundFrame {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: unix_millis(),
        }
    }
}

/// Write half of a push session.
#[async_trait]
pub trait PushSink: Send + Sync {
    async fn send(&self, frame: &OutboundFrame) -> Result<(), TransportError>;

    /// Close the session. Errors are ignored; the session is gone either way.
    async fn close(&self);
}

/// Read half of a push session.
#[async_trait]
pub trait PushStream: Send {
    /// Next frame; `None` once the peer closed cleanly.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>>;
}

/// A live push connection.
pub struct PushSession {
    pub sink: Arc<dyn PushSink>,
    pub stream: Box<dyn PushStream>,
}

impl std::fmt::Debug for PushSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSession").finish_non_exhaustive()
    }
}

/// Opens push sessions.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self) -> Result<PushSession, TransportError>;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;
}

/// Fetches the latest snapshot over a stateless request.
#[async_trait]
pub trait PollTransport: Send + Sync {
    async fn fetch(&self) -> Result<Value, TransportError>;

    /// Drop pooled connections and start fresh.
    fn reset(&self) {}

    fn endpoint(&self) -> String;
}
