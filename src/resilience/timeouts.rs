//! Timeout enforcement.
//!
//! # Responsibilities
//! - Put a deadline on every transport call (connect, send, fetch, report)
//! - Turn an elapsed deadline into `TransportError::Timeout`
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry
//! - Timeouts count as ordinary failures for retries and breakers

use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

/// Await `fut` for at most `deadline`.
pub async fn with_timeout<T, F>(deadline: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(deadline)),
    }
}
