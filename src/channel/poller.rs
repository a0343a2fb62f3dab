//! Fallback poller.
//!
//! # Responsibilities
//! - Fetch the snapshot on an interval while push is unavailable
//! - Route every fetch through retries and the `poll-fetch` breaker
//! - Cache successful snapshots and report outcomes to the channel actor
//!
//! # Design Decisions
//! - Single-flight: a fetch never starts while another is running
//! - Each `start` opens a new epoch; outcomes carry it so the actor can
//!   discard results from a stopped run
//! - Only exhausted retries count toward `network_error` recovery; an open
//!   breaker is already the back-off

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::channel::cache::PollCache;
use crate::channel::events::{DataSource, Snapshot};
use crate::error::GuardedError;
use crate::observability::metrics;
use crate::recovery::{RecoveryCoordinator, NETWORK_ERROR};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retries::RetryExecutor;
use crate::telemetry::record::{categories, unix_millis};
use crate::telemetry::TelemetryHandle;
use crate::transport::PollTransport;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Result of one poll, tagged with the run that produced it.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub epoch: u64,
    pub result: Result<Arc<Snapshot>, PollFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollFailure {
    pub message: String,
    /// The breaker rejected the fetch; no request was made.
    pub circuit_open: bool,
}

struct PollerShared {
    transport: Arc<dyn PollTransport>,
    retry: RetryExecutor,
    breaker: CircuitBreaker,
    cache: Arc<PollCache>,
    telemetry: TelemetryHandle,
    recovery: Option<Arc<RecoveryCoordinator>>,
    in_flight: AtomicBool,
    sequence: AtomicU64,
    outcomes: mpsc::UnboundedSender<PollOutcome>,
}

/// Periodic pull-based refresh used while push is down.
pub struct FallbackPoller {
    shared: Arc<PollerShared>,
    epoch: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FallbackPoller {
    /// Returns the poller and the receiver of its outcomes.
    pub fn new(
        transport: Arc<dyn PollTransport>,
        retry: RetryExecutor,
        breaker: CircuitBreaker,
        cache: Arc<PollCache>,
        telemetry: TelemetryHandle,
        recovery: Option<Arc<RecoveryCoordinator>>,
    ) -> (Self, mpsc::UnboundedReceiver<PollOutcome>) {
        let (outcomes, rx) = mpsc::unbounded_channel();
        let shared = PollerShared {
            transport,
            retry,
            breaker,
            cache,
            telemetry,
            recovery,
            in_flight: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            outcomes,
        };
        let poller = Self {
            shared: Arc::new(shared),
            epoch: AtomicU64::new(0),
            task: Mutex::new(None),
        };
        (poller, rx)
    }

    /// Start polling every `interval`, first fetch immediately. No-op if running.
    ///
    /// A zero interval is raised to 1ms.
    pub fn start(&self, interval: Duration) {
        let interval = interval.max(MIN_INTERVAL);
        let mut task = self.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = Arc::clone(&self.shared);
        tracing::info!(endpoint = %shared.transport.endpoint(), interval = ?interval, epoch, "Fallback polling started");

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Some(result) = shared.poll_once().await {
                    let _ = shared.outcomes.send(PollOutcome { epoch, result });
                }
            }
        }));
    }

    /// Stop polling. An in-flight fetch is cancelled.
    pub fn stop(&self) {
        if let Some(task) = self.lock().take() {
            task.abort();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            tracing::info!("Fallback polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Epoch of the current (or last) run.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// One fetch outside the interval loop. `None` if a fetch is already in flight.
    pub async fn poll_once(&self) -> Option<Result<Arc<Snapshot>, PollFailure>> {
        self.shared.poll_once().await
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.shared.breaker
    }

    pub fn cache(&self) -> &Arc<PollCache> {
        &self.shared.cache
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().expect("poller mutex poisoned")
    }
}

impl Drop for FallbackPoller {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

impl PollerShared {
    async fn poll_once(&self) -> Option<Result<Arc<Snapshot>, PollFailure>> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::debug!("Poll already in flight, skipping");
            metrics::record_poll("skipped");
            return None;
        }
        let _slot = FlightSlot(&self.in_flight);

        let result = self
            .retry
            .execute_guarded(&self.breaker, || self.transport.fetch())
            .await;

        Some(match result {
            Ok(payload) => {
                let snapshot = Arc::new(Snapshot {
                    source: DataSource::Poll,
                    payload,
                    received_at: unix_millis(),
                    sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
                });
                self.cache.store(Arc::clone(&snapshot));
                metrics::record_poll("success");
                let record = serde_json::json!({ "sequence": snapshot.sequence });
                self.telemetry.record(categories::POLL, record.to_string());
                Ok(snapshot)
            }
            Err(GuardedError::CircuitOpen(e)) => {
                tracing::debug!(error = %e, "Poll skipped, circuit open");
                metrics::record_poll("circuit_open");
                Err(PollFailure { message: e.to_string(), circuit_open: true })
            }
            Err(GuardedError::Exhausted(e)) => {
                tracing::warn!(attempts = e.attempts, error = %e.last, "Poll failed");
                metrics::record_poll("failure");
                let record = serde_json::json!({ "attempts": e.attempts, "error": e.last.to_string() });
                self.telemetry.record(categories::POLL_ERROR, record.to_string());
                if let Some(recovery) = &self.recovery {
                    let _ = recovery.recover(NETWORK_ERROR);
                }
                Err(PollFailure { message: e.to_string(), circuit_open: false })
            }
        })
    }
}

/// Frees the single-flight slot, also when the fetch is cancelled.
struct FlightSlot<'a>(&'a AtomicBool);

impl Drop for FlightSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::OperationClass;
    use crate::transport::memory::MemoryPollTransport;
    use serde_json::json;

    fn poller(
        transport: Arc<MemoryPollTransport>,
    ) -> (FallbackPoller, mpsc::UnboundedReceiver<PollOutcome>) {
        FallbackPoller::new(
            transport,
            RetryExecutor::new(1, Default::default()),
            CircuitBreaker::new(OperationClass::PollFetch, 2, Duration::from_secs(60)),
            Arc::new(PollCache::new()),
            TelemetryHandle::detached(),
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_immediately_then_on_interval() {
        let transport = Arc::new(MemoryPollTransport::new(json!({"cpu": 0.5})));
        let (poller, mut outcomes) = poller(transport.clone());

        poller.start(Duration::from_millis(1000));
        let first = outcomes.recv().await.unwrap();
        assert_eq!(first.epoch, poller.epoch());
        let snapshot = first.result.unwrap();
        assert_eq!(snapshot.source, DataSource::Poll);
        assert_eq!(snapshot.sequence, 1);

        let second = outcomes.recv().await.unwrap();
        assert_eq!(second.result.unwrap().sequence, 2);
        assert_eq!(transport.calls(), 2);
        assert_eq!(poller.cache().latest().unwrap().sequence, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_keeps_polling() {
        let transport = Arc::new(MemoryPollTransport::new(json!({})));
        let (poller, mut outcomes) = poller(transport.clone());

        poller.start(Duration::ZERO);
        for _ in 0..3 {
            assert!(outcomes.recv().await.unwrap().result.is_ok());
        }
        assert!(poller.is_running());
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_polling() {
        let transport = Arc::new(MemoryPollTransport::new(json!({})));
        let (poller, mut outcomes) = poller(transport.clone());

        poller.start(Duration::from_millis(1000));
        outcomes.recv().await.unwrap();
        let run = poller.epoch();
        poller.stop();
        assert!(!poller.is_running());
        assert_ne!(poller.epoch(), run);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight() {
        let transport = Arc::new(MemoryPollTransport::new(json!({})));
        transport.set_delay(Duration::from_millis(500));
        let (poller, _outcomes) = poller(transport.clone());

        let (a, b) = tokio::join!(poller.poll_once(), poller.poll_once());
        assert!(a.is_some() != b.is_some());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_on_repeated_failure() {
        let transport = Arc::new(MemoryPollTransport::new(json!({})));
        transport.set_failing(true);
        let (poller, _outcomes) = poller(transport.clone());

        for _ in 0..2 {
            let failure = poller.poll_once().await.unwrap().unwrap_err();
            assert!(!failure.circuit_open);
        }
        let failure = poller.poll_once().await.unwrap().unwrap_err();
        assert!(failure.circuit_open);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_frees_slot() {
        let transport = Arc::new(MemoryPollTransport::new(json!({})));
        transport.set_delay(Duration::from_secs(60));
        let (poller, _outcomes) = poller(transport.clone());

        let pending = tokio::time::timeout(Duration::from_millis(10), poller.poll_once()).await;
        assert!(pending.is_err());

        transport.set_delay(Duration::ZERO);
        assert!(poller.poll_once().await.is_some());
    }
}
