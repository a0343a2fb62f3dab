//! Telemetry subsystem.
//!
//! # Data Flow
//! ```text
//! Any component (manager, breakers, poller, recovery):
//!     → TelemetryHandle::record (weak, never keeps the buffer alive)
//!     → buffer.rs (sampling via sampler.rs, bounded FIFO)
//!     → flusher task (interval or forced)
//!     → RetryExecutor + `flush` CircuitBreaker
//!     → reporter.rs (HTTP collector or log)
//! ```
//!
//! # Design Decisions
//! - Payloads are opaque strings; producers choose their own schema
//! - Error categories are never sampled
//! - Failed flushes keep their records; only sustained failure drops the oldest

use std::sync::{Arc, Weak};

pub mod buffer;
pub mod record;
pub mod reporter;
pub mod sampler;

pub use buffer::{TelemetryBuffer, TelemetryStats};
pub use record::{categories, TelemetryRecord};
pub use reporter::{HttpReporter, LogReporter, Reporter};

/// Weak recording handle to a [`TelemetryBuffer`].
///
/// Recording through a handle whose buffer is gone is a no-op.
#[derive(Clone, Default)]
pub struct TelemetryHandle {
    buffer: Weak<TelemetryBuffer>,
}

impl TelemetryHandle {
    pub fn from_weak(buffer: Weak<TelemetryBuffer>) -> Self {
        Self { buffer }
    }

    /// A handle that records nothing.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn record(&self, category: impl Into<String>, payload: impl Into<String>) {
        if let Some(buffer) = self.buffer.upgrade() {
            buffer.record(category, payload);
        }
    }

    pub fn upgrade(&self) -> Option<Arc<TelemetryBuffer>> {
        self.buffer.upgrade()
    }
}

impl std::fmt::Debug for TelemetryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryHandle")
            .field("attached", &(self.buffer.strong_count() > 0))
            .finish()
    }
}
