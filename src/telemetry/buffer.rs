//! Bounded telemetry buffer with periodic flush.
//!
//! # Responsibilities
//! - Accept records from every component without blocking on I/O
//! - Sample non-error records; never sample errors or audit categories
//! - Flush to the reporter on a timer or when the buffer fills
//! - Keep records across failed flushes, bounded by capacity
//!
//! # Design Decisions
//! - Reaching capacity stages the whole buffer as the next batch and wakes
//!   the flusher, so a full buffer is a flush trigger rather than data loss
//! - While a flush is pending, overflow evicts the oldest record and counts it
//! - The dropped count travels with the next batch as a `telemetry.error` record
//! - The buffer lock is never held across the reporter call

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{CircuitConfig, TelemetryConfig};
use crate::error::{FlushError, GuardedError, TransportError};
use crate::observability::metrics;
use crate::recovery::{RecoveryCoordinator, FLUSH_FAILURE};
use crate::resilience::circuit_breaker::{CircuitBreaker, OperationClass};
use crate::resilience::retries::RetryExecutor;
use crate::telemetry::record::{categories, is_error_category, TelemetryRecord};
use crate::telemetry::reporter::Reporter;
use crate::telemetry::sampler::Sampler;
use crate::telemetry::TelemetryHandle;

/// Counters describing the buffer's life so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStats {
    pub recorded: u64,
    pub sampled_out: u64,
    pub dropped: u64,
    pub flushed: u64,
    pub flush_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    recorded: AtomicU64,
    sampled_out: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
    flush_failures: AtomicU64,
}

#[derive(Debug, Default)]
struct BufferState {
    records: VecDeque<TelemetryRecord>,
    /// Batch set aside by a forced flush, sent ahead of `records`.
    staged: Vec<TelemetryRecord>,
    in_flight: bool,
    dropped_unreported: u64,
}

/// Bounded FIFO of telemetry records shared by every component of a channel.
///
/// `capacity` bounds the queue. A staged batch waiting for the flusher sits
/// beside it, so up to twice `capacity` records can be held at once.
pub struct TelemetryBuffer {
    capacity: usize,
    always_record: Vec<String>,
    flush_interval: Duration,
    flush_timeout: Duration,
    sampler: Sampler,
    state: Mutex<BufferState>,
    reporter: Arc<dyn Reporter>,
    retry: RetryExecutor,
    breaker: CircuitBreaker,
    flush_requested: Notify,
    counters: Counters,
}

impl TelemetryBuffer {
    /// Build a buffer whose flushes go through `retry` and a dedicated
    /// `flush` circuit breaker.
    pub fn new(
        config: &TelemetryConfig,
        circuit: &CircuitConfig,
        retry: RetryExecutor,
        reporter: Arc<dyn Reporter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let breaker = CircuitBreaker::new(
                OperationClass::Flush,
                circuit.threshold,
                Duration::from_millis(circuit.reset_timeout_ms),
            )
            .with_telemetry(TelemetryHandle::from_weak(weak.clone()));

            Self {
                capacity: config.buffer_capacity.max(1),
                always_record: config.always_record.clone(),
                flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
                flush_timeout: Duration::from_millis(config.flush_timeout_ms.max(1)),
                sampler: Sampler::new(config.sample_rate),
                state: Mutex::new(BufferState::default()),
                reporter,
                retry,
                breaker,
                flush_requested: Notify::new(),
                counters: Counters::default(),
            }
        })
    }

    /// A weak recording handle for components that must not keep the buffer alive.
    pub fn handle(self: &Arc<Self>) -> TelemetryHandle {
        TelemetryHandle::from_weak(Arc::downgrade(self))
    }

    /// Append a record. Never fails and never waits on the reporter.
    pub fn record(&self, category: impl Into<String>, payload: impl Into<String>) {
        let category = category.into();
        if !self.bypasses_sampling(&category) && !self.sampler.keep() {
            self.counters.sampled_out.fetch_add(1, Ordering::Relaxed);
            metrics::record_telemetry_sampled_out();
            return;
        }

        let record = TelemetryRecord::new(category, payload);
        let forced = {
            let mut state = self.lock();
            let mut forced = false;
            if state.records.len() >= self.capacity {
                if !state.in_flight && state.staged.is_empty() {
                    let batch: Vec<_> = state.records.drain(..).collect();
                    state.staged = batch;
                    forced = true;
                } else {
                    state.records.pop_front();
                    state.dropped_unreported += 1;
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    metrics::record_telemetry_dropped(1);
                }
            }
            state.records.push_back(record);
            forced
        };

        self.counters.recorded.fetch_add(1, Ordering::Relaxed);
        metrics::record_telemetry_recorded();
        if forced {
            tracing::debug!(capacity = self.capacity, "Telemetry buffer full, forcing flush");
            self.flush_requested.notify_one();
        }
    }

    /// Send everything buffered to the reporter.
    ///
    /// Returns the number of records delivered; 0 when there was nothing to
    /// send or another flush is already running. On failure the records stay
    /// buffered for the next cycle.
    pub async fn flush_now(&self) -> Result<usize, FlushError> {
        let Some(batch) = self.take_batch() else {
            return Ok(0);
        };

        let guard = InFlight { buffer: self, batch: Some(batch) };
        let result = self
            .retry
            .execute_guarded(&self.breaker, || self.reporter.report(guard.batch()))
            .await;
        guard.finish(result)
    }

    /// One flush bounded by the configured teardown deadline.
    ///
    /// A flush still running at the deadline is cancelled and its batch requeued.
    pub async fn flush_best_effort(&self) -> Result<usize, FlushError> {
        tokio::time::timeout(self.flush_timeout, self.flush_now())
            .await
            .map_err(|_| FlushError::Timeout(self.flush_timeout))?
    }

    /// Run periodic and forced flushes until `shutdown` fires, then flush once more.
    ///
    /// Flush failures that exhaust their retries are escalated to `recovery`
    /// under the `flush_failure` category.
    pub fn spawn_flusher(
        self: &Arc<Self>,
        recovery: Option<Arc<RecoveryCoordinator>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let buffer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(buffer.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = buffer.flush_requested.notified() => {}
                    _ = shutdown.recv() => break,
                }

                match buffer.flush_now().await {
                    Ok(0) => {}
                    Ok(sent) => tracing::debug!(records = sent, "Telemetry flushed"),
                    Err(e) => {
                        tracing::warn!(error = %e, "Telemetry flush failed, records kept for next cycle");
                        if matches!(e, FlushError::Unreachable { .. }) {
                            if let Some(recovery) = &recovery {
                                let _ = recovery.recover(FLUSH_FAILURE);
                            }
                        }
                    }
                }
            }

            tracing::debug!("Telemetry flusher stopping, final flush");
            if let Err(e) = buffer.flush_best_effort().await {
                tracing::warn!(error = %e, "Final telemetry flush failed");
            }
        })
    }

    /// Records waiting in the queue (excludes a batch already handed to a flush).
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records waiting in total, including a staged batch.
    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.records.len() + state.staged.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn sample_rate(&self) -> f64 {
        self.sampler.rate()
    }

    pub fn set_sample_rate(&self, rate: f64) {
        self.sampler.set_rate(rate);
        tracing::info!(sample_rate = self.sampler.rate(), "Telemetry sample rate updated");
    }

    /// The breaker guarding flushes.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Copy of the queued records, oldest first.
    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        let state = self.lock();
        state.staged.iter().chain(state.records.iter()).cloned().collect()
    }

    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            recorded: self.counters.recorded.load(Ordering::Relaxed),
            sampled_out: self.counters.sampled_out.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            flush_failures: self.counters.flush_failures.load(Ordering::Relaxed),
        }
    }

    fn bypasses_sampling(&self, category: &str) -> bool {
        is_error_category(category) || self.always_record.iter().any(|c| c == category)
    }

    fn take_batch(&self) -> Option<Vec<TelemetryRecord>> {
        let mut state = self.lock();
        if state.in_flight {
            return None;
        }

        let mut batch = std::mem::take(&mut state.staged);
        batch.extend(state.records.drain(..));
        if state.dropped_unreported > 0 {
            let payload = serde_json::json!({ "dropped": state.dropped_unreported });
            batch.push(TelemetryRecord::new(categories::TELEMETRY_ERROR, payload.to_string()));
            state.dropped_unreported = 0;
        }

        if batch.is_empty() {
            return None;
        }
        state.in_flight = true;
        Some(batch)
    }

    fn requeue(&self, batch: Vec<TelemetryRecord>) {
        let mut state = self.lock();
        state.in_flight = false;

        let mut merged: VecDeque<_> = batch.into_iter().collect();
        merged.extend(state.records.drain(..));
        let mut evicted = 0u64;
        while merged.len() > self.capacity {
            merged.pop_front();
            evicted += 1;
        }
        state.records = merged;

        if evicted > 0 {
            state.dropped_unreported += evicted;
            self.counters.dropped.fetch_add(evicted, Ordering::Relaxed);
            metrics::record_telemetry_dropped(evicted);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().expect("telemetry buffer mutex poisoned")
    }
}

impl std::fmt::Debug for TelemetryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryBuffer")
            .field("capacity", &self.capacity)
            .field("sample_rate", &self.sampler.rate())
            .field("stats", &self.stats())
            .finish()
    }
}

/// A batch handed to the reporter. Dropped unfinished (flush cancelled),
/// the batch goes back to the buffer.
struct InFlight<'a> {
    buffer: &'a TelemetryBuffer,
    batch: Option<Vec<TelemetryRecord>>,
}

impl InFlight<'_> {
    fn batch(&self) -> &[TelemetryRecord] {
        self.batch.as_deref().unwrap_or(&[])
    }

    fn finish(mut self, result: Result<(), GuardedError<TransportError>>) -> Result<usize, FlushError> {
        let batch = self.batch.take().unwrap_or_default();
        let sent = batch.len();
        let counters = &self.buffer.counters;

        match result {
            Ok(()) => {
                self.buffer.lock().in_flight = false;
                counters.flushed.fetch_add(sent as u64, Ordering::Relaxed);
                metrics::record_flush("success", sent);
                Ok(sent)
            }
            Err(e) => {
                self.buffer.requeue(batch);
                counters.flush_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_flush(if e.is_circuit_open() { "circuit_open" } else { "failure" }, sent);
                Err(e.into())
            }
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.buffer.requeue(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryReporter;

    fn config(capacity: usize, sample_rate: f64) -> TelemetryConfig {
        TelemetryConfig {
            buffer_capacity: capacity,
            sample_rate,
            ..Default::default()
        }
    }

    fn buffer(capacity: usize, reporter: Arc<MemoryReporter>) -> Arc<TelemetryBuffer> {
        let retry = RetryExecutor::new(1, Default::default());
        TelemetryBuffer::new(&config(capacity, 1.0), &CircuitConfig::default(), retry, reporter)
    }

    #[tokio::test]
    async fn test_flush_sends_and_clears() {
        let reporter = Arc::new(MemoryReporter::new());
        let buffer = buffer(10, reporter.clone());
        buffer.record("message", "a");
        buffer.record("message", "b");

        assert_eq!(buffer.flush_now().await.unwrap(), 2);
        assert!(buffer.is_empty());
        let batches = reporter.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].payload, "a");
        assert_eq!(batches[0][1].payload, "b");
    }

    #[tokio::test]
    async fn test_second_flush_is_noop() {
        let reporter = Arc::new(MemoryReporter::new());
        let buffer = buffer(10, reporter.clone());
        buffer.record("message", "a");

        assert_eq!(buffer.flush_now().await.unwrap(), 1);
        assert_eq!(buffer.flush_now().await.unwrap(), 0);
        assert_eq!(reporter.calls(), 1);
    }

    #[tokio::test]
    async fn test_length_never_exceeds_capacity() {
        let reporter = Arc::new(MemoryReporter::new());
        let buffer = buffer(5, reporter.clone());

        for i in 0..23 {
            buffer.record("message", i.to_string());
            assert!(buffer.len() <= buffer.capacity());
        }
    }

    #[tokio::test]
    async fn test_full_buffer_stages_forced_flush_without_loss() {
        let reporter = Arc::new(MemoryReporter::new());
        let buffer = buffer(3, reporter.clone());

        for i in 0..4 {
            buffer.record("message", i.to_string());
        }
        // the first three were staged, the fourth starts a fresh queue
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.pending(), 4);
        assert_eq!(buffer.stats().dropped, 0);

        assert_eq!(buffer.flush_now().await.unwrap(), 4);
        let payloads: Vec<_> = reporter.batches()[0].iter().map(|r| r.payload.clone()).collect();
        assert_eq!(payloads, vec!["0", "1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_overflow_while_flush_pending_evicts_oldest() {
        let reporter = Arc::new(MemoryReporter::new());
        let buffer = buffer(2, reporter.clone());

        // 0,1 staged by the forced flush; 2,3 queued; 4 evicts 2
        for i in 0..5 {
            buffer.record("message", i.to_string());
        }
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.stats().dropped, 1);

        buffer.flush_now().await.unwrap();
        let batch = &reporter.batches()[0];
        let payloads: Vec<_> = batch.iter().map(|r| r.payload.as_str()).collect();
        assert_eq!(&payloads[..4], &["0", "1", "3", "4"]);
        let dropped = batch.last().unwrap();
        assert_eq!(dropped.category, categories::TELEMETRY_ERROR);
        assert_eq!(dropped.payload, "{\"dropped\":1}");
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_records() {
        let reporter = Arc::new(MemoryReporter::new());
        reporter.set_failing(true);
        let buffer = buffer(10, reporter.clone());
        buffer.record("message", "kept");

        assert!(buffer.flush_now().await.is_err());
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.stats().flush_failures, 1);

        reporter.set_failing(false);
        assert_eq!(buffer.flush_now().await.unwrap(), 1);
        assert_eq!(reporter.batches()[0][0].payload, "kept");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_merges_and_trims_oldest() {
        let reporter = Arc::new(MemoryReporter::new());
        reporter.set_failing(true);
        reporter.set_delay(Duration::from_millis(100));
        let buffer = buffer(3, reporter.clone());

        for i in 0..3 {
            buffer.record("message", i.to_string());
        }
        let flush = tokio::spawn({
            let buffer = Arc::clone(&buffer);
            async move { buffer.flush_now().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // 3,4,5 queue behind the in-flight batch, 6 evicts 3
        for i in 3..7 {
            buffer.record("message", i.to_string());
        }
        assert_eq!(buffer.stats().dropped, 1);

        assert!(flush.await.unwrap().is_err());
        let queued: Vec<_> = buffer.snapshot().into_iter().map(|r| r.payload).collect();
        assert_eq!(queued, vec!["4", "5", "6"]);
        assert_eq!(buffer.stats().dropped, 4);

        reporter.set_failing(false);
        assert_eq!(buffer.flush_now().await.unwrap(), 4);
        let batch = &reporter.batches()[0];
        let payloads: Vec<_> = batch.iter().map(|r| r.payload.as_str()).collect();
        assert_eq!(payloads, vec!["4", "5", "6", "{\"dropped\":4}"]);
        assert_eq!(batch[3].category, categories::TELEMETRY_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_best_effort_flush_times_out_and_requeues() {
        let reporter = Arc::new(MemoryReporter::new());
        reporter.set_delay(Duration::from_secs(60));
        let buffer = buffer(10, reporter.clone());
        buffer.record("message", "slow");

        let err = buffer.flush_best_effort().await.unwrap_err();
        assert!(matches!(err, FlushError::Timeout(_)));
        assert_eq!(buffer.len(), 1);
        assert!(reporter.batches().is_empty());
    }

    #[tokio::test]
    async fn test_errors_bypass_sampling() {
        let reporter = Arc::new(MemoryReporter::new());
        let retry = RetryExecutor::new(1, Default::default());
        let buffer = TelemetryBuffer::new(&config(100, 0.0), &CircuitConfig::default(), retry, reporter);

        buffer.record("message", "sampled away");
        buffer.record("poll.error", "kept");
        buffer.record("error", "kept");
        buffer.record("connection", "audit trail");

        let categories: Vec<_> = buffer.snapshot().into_iter().map(|r| r.category).collect();
        assert_eq!(categories, vec!["poll.error", "error", "connection"]);
        assert_eq!(buffer.stats().sampled_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flusher_runs_on_interval_and_shutdown() {
        let reporter = Arc::new(MemoryReporter::new());
        let buffer = buffer(100, reporter.clone());
        let (tx, rx) = broadcast::channel(1);
        let flusher = buffer.spawn_flusher(None, rx);

        buffer.record("message", "tick");
        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(reporter.calls(), 1);

        buffer.record("message", "final");
        tx.send(()).unwrap();
        flusher.await.unwrap();
        assert_eq!(reporter.calls(), 2);
        assert_eq!(reporter.batches()[1][0].payload, "final");
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_flush_wakes_flusher() {
        let reporter = Arc::new(MemoryReporter::new());
        let buffer = buffer(2, reporter.clone());
        let (_tx, rx) = broadcast::channel(1);
        let _flusher = buffer.spawn_flusher(None, rx);

        for i in 0..3 {
            buffer.record("message", i.to_string());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(reporter.calls(), 1);
        assert_eq!(reporter.batches()[0].len(), 3);
    }
}
