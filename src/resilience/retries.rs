//! Retry logic.
//!
//! # Responsibilities
//! - Invoke an operation up to `max_attempts` times
//! - Wait `BackoffPolicy::next_delay(n)` between attempts (jittered if configured)
//! - Stop immediately when a circuit breaker rejects the call
//!
//! # Design Decisions
//! - Waits are plain `tokio::time::sleep`; dropping the future cancels the loop
//! - An open circuit is not a real attempt, so it short-circuits the remaining ones
//! - Exhaustion carries the last error and the number of invocations

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{CallError, CircuitOpenError, GuardedError, RetryExhaustedError};
use crate::observability::metrics;
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};

/// Bounded retry with geometric backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_attempts: u32,
    policy: BackoffPolicy,
}

impl RetryExecutor {
    /// `max_attempts` of 0 is treated as 1.
    pub fn new(max_attempts: u32, policy: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            policy,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let policy = BackoffPolicy::new(
            Duration::from_millis(config.initial_delay_ms),
            config.backoff_factor,
        )
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
        .with_jitter(config.jitter);
        Self::new(config.max_attempts, policy)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Retry `op` until it succeeds or attempts run out.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryExhaustedError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(last) if attempt >= self.max_attempts => {
                    return Err(RetryExhaustedError { attempts: attempt, last });
                }
                Err(_) => self.wait(attempt, None).await,
            }
        }
    }

    /// Retry `op` with every attempt passing through `breaker`.
    ///
    /// The first `CircuitOpen` rejection ends the call without further attempts,
    /// as does a failure that opens the circuit.
    pub async fn execute_guarded<T, E, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        mut op: F,
    ) -> Result<T, GuardedError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match breaker.execute(&mut op).await {
                Ok(value) => return Ok(value),
                Err(CallError::CircuitOpen(e)) => return Err(GuardedError::CircuitOpen(e)),
                Err(CallError::Failed(last)) if attempt >= self.max_attempts => {
                    return Err(GuardedError::Exhausted(RetryExhaustedError {
                        attempts: attempt,
                        last,
                    }));
                }
                Err(CallError::Failed(_)) if breaker.state() == CircuitState::Open => {
                    tracing::debug!(attempt, class = %breaker.class(), "Circuit opened, abandoning retries");
                    return Err(GuardedError::CircuitOpen(CircuitOpenError {
                        class: breaker.class(),
                    }));
                }
                Err(CallError::Failed(_)) => {
                    self.wait(attempt, Some(breaker.class().as_str())).await
                }
            }
        }
    }

    async fn wait(&self, attempt: u32, class: Option<&'static str>) {
        let delay = self.policy.jittered_delay(attempt - 1);
        tracing::debug!(attempt, delay = ?delay, class = class.unwrap_or("unguarded"), "Retrying after failure");
        if let Some(class) = class {
            metrics::record_retry(class);
        }
        tokio::time::sleep(delay).await;
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
