//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges)
//!     → telemetry buffer (records flushed to the reporting endpoint)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every log event (class, state, attempt)
//! - Metrics are cheap (atomic increments behind the facade)

pub mod logging;
pub mod metrics;
