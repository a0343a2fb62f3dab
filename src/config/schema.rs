//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a live channel.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for one live channel.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Push/poll endpoints and reconnect policy.
    pub connection: ConnectionConfig,

    /// Circuit breaker settings shared by every operation class.
    pub circuit: CircuitConfig,

    /// Retry settings for push sends, poll fetches and flushes.
    pub retries: RetryConfig,

    /// Telemetry buffer and reporting.
    pub telemetry: TelemetryConfig,

    /// Automatic remediation caps.
    pub recovery: RecoveryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Push and poll endpoints plus reconnect policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// WebSocket URL of the push channel (ws:// or wss://).
    pub push_url: String,

    /// HTTP URL returning the latest snapshot (http:// or https://).
    pub poll_url: String,

    /// Fallback poll interval in milliseconds.
    pub poll_interval_ms: u64,

    /// First reconnect delay in milliseconds.
    pub reconnect_delay_ms: u64,

    /// Growth factor between reconnect delays.
    pub reconnect_backoff_factor: f64,

    /// Upper bound for a single reconnect delay in milliseconds.
    pub max_reconnect_delay_ms: u64,

    /// Reconnect attempts before entering the terminal error state.
    pub max_reconnect_attempts: u32,

    /// Deadline for establishing the push connection in milliseconds.
    pub connect_timeout_ms: u64,

    /// Deadline for a single poll or report request in milliseconds.
    pub request_timeout_ms: u64,

    /// Outbound frames that may wait for the writer before `send` refuses.
    pub send_queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            push_url: "ws://127.0.0.1:8080/ws".to_string(),
            poll_url: "http://127.0.0.1:8080/metrics".to_string(),
            poll_interval_ms: 5000,
            reconnect_delay_ms: 3000,
            reconnect_backoff_factor: 2.0,
            max_reconnect_delay_ms: 60_000,
            max_reconnect_attempts: 10,
            connect_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            send_queue_capacity: 64,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures before the circuit opens.
    pub threshold: u32,

    /// Time an open circuit waits before admitting a probe, in milliseconds.
    pub reset_timeout_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of invocations per call.
    pub max_attempts: u32,

    /// Delay after the first failure in milliseconds.
    pub initial_delay_ms: u64,

    /// Growth factor between delays.
    pub backoff_factor: f64,

    /// Upper bound for a single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Jitter ratio applied to each delay (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
            jitter: 0.2,
        }
    }
}

/// Telemetry buffer configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Reporting endpoint; batches go to the log when unset.
    pub report_url: Option<String>,

    /// Periodic flush interval in milliseconds.
    pub flush_interval_ms: u64,

    /// Records held before a flush is forced.
    pub buffer_capacity: usize,

    /// Probability of keeping a non-error record.
    pub sample_rate: f64,

    /// Categories recorded regardless of the sample rate.
    pub always_record: Vec<String>,

    /// Deadline for the best-effort flush on teardown, in milliseconds.
    pub flush_timeout_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            report_url: None,
            flush_interval_ms: 5000,
            buffer_capacity: 100,
            sample_rate: 0.1,
            always_record: vec!["connection".to_string()],
            flush_timeout_ms: 2000,
        }
    }
}

/// Recovery ledger configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Remediation attempts allowed per failure category.
    pub max_attempts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
