//! Resilient live-data channel.
//!
//! Keeps a consumer fed with near-real-time server state over a push
//! connection, falls back to polling while push is down, isolates repeated
//! failures with circuit breakers, and buffers telemetry with bounded,
//! best-effort delivery.

// Core
pub mod channel;
pub mod config;
pub mod error;
pub mod transport;

// Failure handling
pub mod recovery;
pub mod resilience;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod telemetry;

pub use channel::{ChannelEvent, ChannelManager, ConnectionState, EventKind};
pub use config::ChannelConfig;
pub use lifecycle::Shutdown;
