//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build transports → Spawn channel → connect()
//!
//! Shutdown (shutdown.rs):
//!     Signal received → ChannelManager::shutdown → tasks stop → final flush
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then transports, then the channel
//! - Shutdown never waits on in-flight network calls; only the final flush
//!   has a (bounded) wait

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_manager, StartupError};
