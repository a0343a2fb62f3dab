//! Error taxonomy for the live channel.
//!
//! Concrete failures derive `thiserror`. The wrappers produced by the
//! resilience layer are generic over the wrapped operation's error and
//! implement `Display`/`Error` by hand.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::circuit_breaker::OperationClass;

/// Failure of a push connect, push send or poll fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Outbound frame could not be written.
    #[error("send failed: {0}")]
    Send(String),

    /// Poll request failed or returned a non-success status.
    #[error("poll failed: {0}")]
    Poll(String),

    /// Reporting endpoint rejected or did not accept the batch.
    #[error("report failed: {0}")]
    Report(String),

    /// The stream was closed by the peer or broke mid-read.
    #[error("connection closed: {0}")]
    Closed(String),

    /// Payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The call did not complete before its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Fail-fast rejection from an open circuit. Not a real attempt.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("circuit open for {class}")]
pub struct CircuitOpenError {
    pub class: OperationClass,
}

/// Outcome of a single call through a circuit breaker.
#[derive(Debug)]
pub enum CallError<E> {
    /// The breaker rejected the call without invoking the operation.
    CircuitOpen(CircuitOpenError),
    /// The operation ran and failed.
    Failed(E),
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::CircuitOpen(e) => write!(f, "{}", e),
            CallError::Failed(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CallError<E> {}

/// Aggregate error after every retry attempt failed.
#[derive(Debug)]
pub struct RetryExhaustedError<E> {
    /// Number of invocations that were made.
    pub attempts: u32,
    /// Error returned by the final invocation.
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for RetryExhaustedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.last)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryExhaustedError<E> {}

/// Outcome of a retried call gated by a circuit breaker.
#[derive(Debug)]
pub enum GuardedError<E> {
    /// The breaker was open; remaining attempts were skipped.
    CircuitOpen(CircuitOpenError),
    /// Every attempt ran and failed.
    Exhausted(RetryExhaustedError<E>),
}

impl<E> GuardedError<E> {
    /// True when the call never reached the operation.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardedError::CircuitOpen(_))
    }
}

impl<E: fmt::Display> fmt::Display for GuardedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardedError::CircuitOpen(e) => write!(f, "{}", e),
            GuardedError::Exhausted(e) => write!(f, "{}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for GuardedError<E> {}

/// The reporting collaborator could not take a batch.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("flush rejected: {0}")]
    CircuitOpen(CircuitOpenError),

    #[error("reporting endpoint unreachable after {attempts} attempts: {last}")]
    Unreachable { attempts: u32, last: TransportError },

    #[error("flush timed out after {0:?}")]
    Timeout(Duration),
}

impl From<GuardedError<TransportError>> for FlushError {
    fn from(err: GuardedError<TransportError>) -> Self {
        match err {
            GuardedError::CircuitOpen(e) => FlushError::CircuitOpen(e),
            GuardedError::Exhausted(e) => FlushError::Unreachable {
                attempts: e.attempts,
                last: e.last,
            },
        }
    }
}

/// Remediation cap reached for a failure category.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("recovery exhausted for '{category}' after {attempts} attempts")]
pub struct RecoveryExhaustedError {
    pub category: String,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RetryExhaustedError {
            attempts: 3,
            last: TransportError::Poll("503".into()),
        };
        assert_eq!(err.to_string(), "gave up after 3 attempts: poll failed: 503");

        let err = CircuitOpenError { class: OperationClass::Flush };
        assert_eq!(err.to_string(), "circuit open for flush");
    }

    #[test]
    fn test_flush_error_from_guarded() {
        let err: FlushError = GuardedError::Exhausted(RetryExhaustedError {
            attempts: 2,
            last: TransportError::Report("refused".into()),
        })
        .into();
        assert!(matches!(err, FlushError::Unreachable { attempts: 2, .. }));

        let err: FlushError = GuardedError::<TransportError>::CircuitOpen(CircuitOpenError {
            class: OperationClass::Flush,
        })
        .into();
        assert!(matches!(err, FlushError::CircuitOpen(_)));
    }
}
