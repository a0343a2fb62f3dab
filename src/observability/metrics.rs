//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define channel metrics (state transitions, messages, breakers, telemetry, recovery)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `channel_state_transitions_total` (counter): transitions by target state
//! - `channel_messages_total` (counter): inbound push frames by type
//! - `channel_send_rejected_total` (counter): `send` calls refused
//! - `circuit_state` (gauge): 0=closed, 1=half-open, 2=open, per class
//! - `retry_attempts_total` (counter): retries by operation class
//! - `telemetry_records_total` / `telemetry_sampled_out_total` / `telemetry_dropped_total` (counters)
//! - `telemetry_flush_total` (counter): flushes by outcome
//! - `recovery_attempts_total` (counter): remediation decisions by category
//! - `poll_total` (counter): fallback polls by outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so library users pay nothing
//! - Label cardinality is bounded (states, classes, configured categories)

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::channel::state::ConnectionState;
use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_state_transition(to: ConnectionState) {
    counter!("channel_state_transitions_total", "to" => to.as_str()).increment(1);
}

pub fn record_message(kind: &str) {
    counter!("channel_messages_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_send_rejected() {
    counter!("channel_send_rejected_total").increment(1);
}

pub fn record_circuit_state(class: &'static str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("circuit_state", "class" => class).set(value);
}

pub fn record_retry(class: &'static str) {
    counter!("retry_attempts_total", "class" => class).increment(1);
}

pub fn record_telemetry_recorded() {
    counter!("telemetry_records_total").increment(1);
}

pub fn record_telemetry_sampled_out() {
    counter!("telemetry_sampled_out_total").increment(1);
}

pub fn record_telemetry_dropped(count: u64) {
    counter!("telemetry_dropped_total").increment(count);
}

pub fn record_flush(outcome: &'static str, records: usize) {
    counter!("telemetry_flush_total", "outcome" => outcome).increment(1);
    if outcome == "success" {
        counter!("telemetry_flushed_records_total").increment(records as u64);
    }
}

pub fn record_recovery(category: &str, allowed: bool) {
    counter!(
        "recovery_attempts_total",
        "category" => category.to_string(),
        "allowed" => if allowed { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_poll(outcome: &'static str) {
    counter!("poll_total", "outcome" => outcome).increment(1);
}
