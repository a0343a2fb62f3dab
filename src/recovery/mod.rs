//! Recovery subsystem.
//!
//! # Data Flow
//! ```text
//! Repeated failure (flush exhausted retries, poll exhausted retries):
//!     → RecoveryCoordinator::recover(category)
//!     → tracker.rs (per-category cap)
//!     → registered remediation, or the generic path for unknown categories
//!     → cap reached: RecoveryExhaustedError, logged and recorded, never retried
//! ```
//!
//! # Design Decisions
//! - Remediations are synchronous and cheap (rebuild a client, clear a cache)
//! - The ledger only resets on operator action

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::RecoveryExhaustedError;
use crate::telemetry::{categories, TelemetryHandle};

pub mod tracker;

pub use tracker::RecoveryTracker;

/// Flush failed after its retries.
pub const FLUSH_FAILURE: &str = "flush_failure";
/// Poll failed after its retries.
pub const NETWORK_ERROR: &str = "network_error";

type Remediation = Arc<dyn Fn() + Send + Sync>;

/// Maps failure categories to remediation actions, bounded by a [`RecoveryTracker`].
pub struct RecoveryCoordinator {
    tracker: RecoveryTracker,
    remediations: DashMap<String, Remediation>,
    telemetry: TelemetryHandle,
}

impl RecoveryCoordinator {
    pub fn new(max_attempts: u32, telemetry: TelemetryHandle) -> Self {
        Self {
            tracker: RecoveryTracker::new(max_attempts),
            remediations: DashMap::new(),
            telemetry,
        }
    }

    /// Register (or replace) the action run for `category`.
    pub fn register<F>(&self, category: impl Into<String>, remediation: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.remediations.insert(category.into(), Arc::new(remediation));
    }

    /// Try one remediation for `category`.
    pub fn recover(&self, category: &str) -> Result<(), RecoveryExhaustedError> {
        // cloned out so the map shard is not held while the action runs
        let remediation = self.remediations.get(category).map(|r| Arc::clone(r.value()));

        let allowed = self.tracker.attempt_recovery(category, || match &remediation {
            Some(action) => action(),
            None => tracing::info!(category, "No remediation registered, taking generic path"),
        });

        if allowed {
            let attempt = self.tracker.attempts(category);
            tracing::warn!(category, attempt, max = self.tracker.max_attempts(), "Recovery attempted");
            let payload = serde_json::json!({ "category": category, "attempt": attempt });
            self.telemetry.record(categories::RECOVERY, payload.to_string());
            return Ok(());
        }

        let err = RecoveryExhaustedError {
            category: category.to_string(),
            attempts: self.tracker.attempts(category),
        };
        tracing::error!(category, attempts = err.attempts, "Recovery exhausted, no further automatic action");
        let payload = serde_json::json!({ "category": category, "attempts": err.attempts });
        self.telemetry.record(categories::RECOVERY_ERROR, payload.to_string());
        Err(err)
    }

    pub fn tracker(&self) -> &RecoveryTracker {
        &self.tracker
    }

    pub fn reset(&self, category: &str) {
        tracing::info!(category, "Recovery ledger reset");
        self.tracker.reset(category);
    }

    pub fn reset_all(&self) {
        tracing::info!("Recovery ledger cleared");
        self.tracker.reset_all();
    }
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("tracker", &self.tracker)
            .field("registered", &self.remediations.len())
            .finish()
    }
}
