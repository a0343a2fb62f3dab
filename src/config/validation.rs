//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check endpoint URLs and their schemes
//! - Validate value ranges (intervals > 0, rates within [0, 1])
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ChannelConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use url::Url;

use crate::config::schema::ChannelConfig;

/// A single semantic problem with a configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration.
pub fn validate_config(config: &ChannelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let conn = &config.connection;

    check_url(&mut errors, "connection.push_url", &conn.push_url, &["ws", "wss"]);
    check_url(&mut errors, "connection.poll_url", &conn.poll_url, &["http", "https"]);
    if let Some(report_url) = &config.telemetry.report_url {
        check_url(&mut errors, "telemetry.report_url", report_url, &["http", "https"]);
    }

    check_positive(&mut errors, "connection.poll_interval_ms", conn.poll_interval_ms);
    check_positive(&mut errors, "connection.reconnect_delay_ms", conn.reconnect_delay_ms);
    check_positive(&mut errors, "connection.max_reconnect_delay_ms", conn.max_reconnect_delay_ms);
    check_positive(&mut errors, "connection.connect_timeout_ms", conn.connect_timeout_ms);
    check_positive(&mut errors, "connection.request_timeout_ms", conn.request_timeout_ms);
    check_positive(&mut errors, "connection.send_queue_capacity", conn.send_queue_capacity as u64);
    check_factor(&mut errors, "connection.reconnect_backoff_factor", conn.reconnect_backoff_factor);

    check_positive(&mut errors, "circuit.threshold", config.circuit.threshold as u64);
    check_positive(&mut errors, "circuit.reset_timeout_ms", config.circuit.reset_timeout_ms);

    check_positive(&mut errors, "retries.max_attempts", config.retries.max_attempts as u64);
    check_positive(&mut errors, "retries.max_delay_ms", config.retries.max_delay_ms);
    check_factor(&mut errors, "retries.backoff_factor", config.retries.backoff_factor);
    check_ratio(&mut errors, "retries.jitter", config.retries.jitter);

    check_positive(&mut errors, "telemetry.flush_interval_ms", config.telemetry.flush_interval_ms);
    check_positive(&mut errors, "telemetry.buffer_capacity", config.telemetry.buffer_capacity as u64);
    check_positive(&mut errors, "telemetry.flush_timeout_ms", config.telemetry.flush_timeout_ms);
    check_ratio(&mut errors, "telemetry.sample_rate", config.telemetry.sample_rate);

    check_positive(&mut errors, "recovery.max_attempts", config.recovery.max_attempts as u64);

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError {
            field: "observability.metrics_address",
            message: format!("'{}' is not a socket address", config.observability.metrics_address),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &'static str, value: &str, schemes: &[&str]) {
    match Url::parse(value) {
        Ok(url) if schemes.contains(&url.scheme()) => {}
        Ok(url) => errors.push(ValidationError {
            field,
            message: format!("scheme '{}' not allowed, expected one of {:?}", url.scheme(), schemes),
        }),
        Err(e) => errors.push(ValidationError {
            field,
            message: format!("invalid URL '{}': {}", value, e),
        }),
    }
}

fn check_positive(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field,
            message: "must be greater than 0".to_string(),
        });
    }
}

fn check_factor(errors: &mut Vec<ValidationError>, field: &'static str, value: f64) {
    if !(value.is_finite() && value >= 1.0) {
        errors.push(ValidationError {
            field,
            message: format!("must be >= 1.0, got {}", value),
        });
    }
}

fn check_ratio(errors: &mut Vec<ValidationError>, field: &'static str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(ValidationError {
            field,
            message: format!("must be within [0, 1], got {}", value),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ChannelConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ChannelConfig::default();
        config.connection.push_url = "http://wrong-scheme".to_string();
        config.connection.poll_url = "not a url".to_string();
        config.telemetry.sample_rate = 1.5;
        config.telemetry.buffer_capacity = 0;
        config.retries.backoff_factor = 0.5;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(errors.len(), 5, "{:?}", fields);
        assert!(fields.contains(&"connection.push_url"));
        assert!(fields.contains(&"connection.poll_url"));
        assert!(fields.contains(&"telemetry.sample_rate"));
        assert!(fields.contains(&"telemetry.buffer_capacity"));
        assert!(fields.contains(&"retries.backoff_factor"));
    }

    #[test]
    fn test_report_url_checked_when_present() {
        let mut config = ChannelConfig::default();
        config.telemetry.report_url = Some("ftp://collector".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "telemetry.report_url");
    }
}
