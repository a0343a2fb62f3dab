//! Circuit breaker for remote operation classes.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: remote assumed down, calls fail fast
//! - Half-Open: exactly one trial call decides the next state
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: reset_timeout elapsed since last failure (checked on the next call)
//! Half-Open → Closed: probe succeeds, failure_count = 0
//! Half-Open → Open: probe fails, failure_count = threshold
//! ```
//!
//! # Design Decisions
//! - One breaker per operation class (push-send, poll-fetch, flush)
//! - Fail fast in Open state without invoking the operation
//! - Single probe in Half-Open; concurrent callers are rejected while it runs
//! - Only an operator may `reset()` outside the transitions above

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{CallError, CircuitOpenError};
use crate::observability::metrics;
use crate::telemetry::{categories, TelemetryHandle};

/// Class of remote call protected by its own breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationClass {
    PushSend,
    PollFetch,
    Flush,
}

impl OperationClass {
    pub const ALL: [OperationClass; 3] = [
        OperationClass::PushSend,
        OperationClass::PollFetch,
        OperationClass::Flush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::PushSend => "push-send",
            OperationClass::PollFetch => "poll-fetch",
            OperationClass::Flush => "flush",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
    pub threshold: u32,
    pub reset_timeout: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Strict, non-probabilistic circuit breaker.
pub struct CircuitBreaker {
    class: OperationClass,
    threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
    telemetry: Option<TelemetryHandle>,
}

type Transition = Option<(CircuitState, CircuitState)>;

impl CircuitBreaker {
    /// Create a closed breaker. A threshold of 0 is treated as 1.
    pub fn new(class: OperationClass, threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            class,
            threshold: threshold.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
            telemetry: None,
        }
    }

    /// Mirror transitions into the telemetry buffer.
    pub fn with_telemetry(mut self, telemetry: TelemetryHandle) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn class(&self) -> OperationClass {
        self.class
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
            threshold: self.threshold,
            reset_timeout: self.reset_timeout,
        }
    }

    /// Force `Closed` with a zero failure count. Operator/test action only.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.lock();
            let from = inner.state;
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.last_failure = None;
            inner.probe_in_flight = false;
            (from != CircuitState::Closed).then_some((from, CircuitState::Closed))
        };
        tracing::info!(class = %self.class, "Circuit breaker reset by operator");
        self.announce(transition);
    }

    /// Run `op` through the breaker.
    ///
    /// Returns `CallError::CircuitOpen` without invoking `op` while the
    /// circuit is open and the reset timeout has not elapsed.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = self.acquire().map_err(CallError::CircuitOpen)?;
        let result = op().await;
        match &result {
            Ok(_) => permit.succeed(),
            Err(_) => permit.fail(),
        }
        result.map_err(CallError::Failed)
    }

    fn acquire(&self) -> Result<Permit<'_>, CircuitOpenError> {
        let (permit, transition) = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => (Permit::new(self, false), None),
                CircuitState::Open => {
                    let cooled_down = inner
                        .last_failure
                        .map_or(true, |at| at.elapsed() >= self.reset_timeout);
                    if !cooled_down {
                        return Err(CircuitOpenError { class: self.class });
                    }
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    (
                        Permit::new(self, true),
                        Some((CircuitState::Open, CircuitState::HalfOpen)),
                    )
                }
                CircuitState::HalfOpen => {
                    if inner.probe_in_flight {
                        return Err(CircuitOpenError { class: self.class });
                    }
                    inner.probe_in_flight = true;
                    (Permit::new(self, true), None)
                }
            }
        };
        self.announce(transition);
        Ok(permit)
    }

    fn on_success(&self, probe: bool) {
        let transition = {
            let mut inner = self.lock();
            if probe {
                inner.probe_in_flight = false;
            }
            match inner.state {
                CircuitState::HalfOpen if probe => {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    Some((CircuitState::HalfOpen, CircuitState::Closed))
                }
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    None
                }
                // a call admitted before the circuit opened earns no credit
                _ => None,
            }
        };
        self.announce(transition);
    }

    fn on_failure(&self, probe: bool) {
        let transition = {
            let mut inner = self.lock();
            if probe {
                inner.probe_in_flight = false;
            }
            inner.last_failure = Some(Instant::now());
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count = inner.failure_count.saturating_add(1);
                    if inner.failure_count >= self.threshold {
                        inner.state = CircuitState::Open;
                        Some((CircuitState::Closed, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Open;
                    inner.failure_count = self.threshold;
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
                CircuitState::Open => {
                    inner.failure_count = inner.failure_count.saturating_add(1);
                    None
                }
            }
        };
        self.announce(transition);
    }

    fn release_probe(&self) {
        self.lock().probe_in_flight = false;
    }

    fn announce(&self, transition: Transition) {
        let Some((from, to)) = transition else {
            return;
        };

        if to == CircuitState::Open {
            tracing::warn!(class = %self.class, from = %from, "Circuit opened");
        } else {
            tracing::info!(class = %self.class, from = %from, to = %to, "Circuit state changed");
        }
        metrics::record_circuit_state(self.class.as_str(), to);

        if let Some(telemetry) = &self.telemetry {
            let payload = serde_json::json!({
                "class": self.class.as_str(),
                "from": from.as_str(),
                "to": to.as_str(),
            });
            telemetry.record(categories::CIRCUIT, payload.to_string());
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("class", &self.class)
            .field("threshold", &self.threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission for one call. A probe dropped before completion frees the
/// Half-Open slot so a cancelled call cannot wedge the breaker.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self { breaker, probe, settled: false }
    }

    fn succeed(&mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    fn fail(&mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}
