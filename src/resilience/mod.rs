//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Remote call (push send, poll fetch, telemetry flush):
//!     → retries.rs (bounded attempts, backoff.rs delays between them)
//!     → circuit_breaker.rs (one breaker per operation class, fail fast when open)
//!     → timeouts.rs (deadline on the underlying transport call)
//! ```
//!
//! # Design Decisions
//! - Every remote call has a deadline
//! - Retry wraps the breaker, so an open circuit ends the retry loop at once
//! - Backoff is pure; jitter is applied by callers that wait
//! - Breakers never reset themselves outside their state machine

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState, OperationClass};
pub use retries::RetryExecutor;
