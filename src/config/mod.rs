//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, apply LIVE_CHANNEL_* overrides)
//!     → validation.rs (semantic checks)
//!     → ChannelConfig (validated, immutable)
//!     → handed to lifecycle::startup to build the channel
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → diff_reload: sample rate applied live, everything else logged as restart-only
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the telemetry sample rate is live
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::ChannelConfig;
pub use schema::CircuitConfig;
pub use schema::ConnectionConfig;
pub use schema::ObservabilityConfig;
pub use schema::RecoveryConfig;
pub use schema::RetryConfig;
pub use schema::TelemetryConfig;
