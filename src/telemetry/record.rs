//! Telemetry records and category conventions.

use std::time::{SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};

/// Categories produced inside the crate.
pub mod categories {
    pub const CONNECTION: &str = "connection";
    pub const MESSAGE: &str = "message";
    pub const POLL: &str = "poll";
    pub const POLL_ERROR: &str = "poll.error";
    pub const PUSH_ERROR: &str = "push.error";
    pub const CIRCUIT: &str = "circuit";
    pub const RECOVERY: &str = "recovery";
    pub const RECOVERY_ERROR: &str = "recovery.error";
    pub const TELEMETRY_ERROR: &str = "telemetry.error";
}

/// A timestamped diagnostic event destined for the reporting endpoint.
///
/// The payload is opaque at this layer; producers serialize their own schema
/// (the crate's own producers use compact JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Unix time in milliseconds.
    pub timestamp: u64,
    pub category: String,
    pub payload: String,
}

impl TelemetryRecord {
    pub fn new(category: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            timestamp: unix_millis(),
            category: category.into(),
            payload: payload.into(),
        }
    }
}

/// Error categories are `error` itself or anything ending in `.error`.
pub fn is_error_category(category: &str) -> bool {
    category == "error" || category.ends_with(".error")
}

/// Milliseconds since the Unix epoch, 0 if the clock is before it.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
