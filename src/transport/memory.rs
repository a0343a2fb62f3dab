//! In-process loopback transports.
//!
//! Each collaborator can be switched between healthy and failing at runtime
//! and counts its calls, which is what the scenario tests drive.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::telemetry::record::TelemetryRecord;
use crate::telemetry::reporter::Reporter;
use crate::transport::{
    InboundFrame, OutboundFrame, PollTransport, PushSession, PushSink, PushStream, PushTransport,
};

/// Push transport whose server side is handed out as a [`MemoryPeer`] per connect.
#[derive(Debug)]
pub struct MemoryPushTransport {
    available: AtomicBool,
    connects: AtomicU32,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryPushTransport {
    /// Returns the transport and the receiver of accepted peers.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let transport = Self {
            available: AtomicBool::new(true),
            connects: AtomicU32::new(0),
            peers,
        };
        (transport, accepted)
    }

    /// While unavailable, every connect is refused.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Connect attempts so far, refused ones included.
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for MemoryPushTransport {
    async fn connect(&self) -> Result<PushSession, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            inbound: inbound_tx,
            outbound: outbound_rx,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Connect("no listener".to_string()))?;

        Ok(PushSession {
            sink: Arc::new(MemorySink {
                outbound: outbound_tx,
                closed: AtomicBool::new(false),
            }),
            stream: Box::new(MemoryStream { inbound: inbound_rx }),
        })
    }

    fn endpoint(&self) -> String {
        "memory://push".to_string()
    }
}

/// Server side of one loopback push session. Dropping it closes the session.
#[derive(Debug)]
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Result<InboundFrame, TransportError>>,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl MemoryPeer {
    /// Deliver a frame to the client. `false` once the client is gone.
    pub fn push(&self, kind: &str, payload: Value) -> bool {
        self.inbound.send(Ok(InboundFrame::new(kind, payload))).is_ok()
    }

    /// Break the stream with a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self.inbound.send(Err(TransportError::Closed(reason.to_string())));
    }

    /// Next frame the client sent; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.outbound.recv().await
    }
}

struct MemorySink {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    closed: AtomicBool,
}

#[async_trait]
impl PushSink for MemorySink {
    async fn send(&self, frame: &OutboundFrame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Send("session closed".to_string()));
        }
        self.outbound
            .send(frame.clone())
            .map_err(|_| TransportError::Send("peer gone".to_string()))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MemoryStream {
    inbound: mpsc::UnboundedReceiver<Result<InboundFrame, TransportError>>,
}

#[async_trait]
impl PushStream for MemoryStream {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        self.inbound.recv().await
    }
}

/// Poll transport serving a settable snapshot.
#[derive(Debug)]
pub struct MemoryPollTransport {
    snapshot: Mutex<Value>,
    failing: AtomicBool,
    delay: Mutex<Duration>,
    calls: AtomicU32,
    resets: AtomicU32,
}

impl MemoryPollTransport {
    pub fn new(snapshot: Value) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            failing: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicU32::new(0),
            resets: AtomicU32::new(0),
        }
    }

    pub fn set_snapshot(&self, snapshot: Value) {
        *self.snapshot.lock().expect("poll snapshot mutex poisoned") = snapshot;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Latency added to every fetch.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("poll delay mutex poisoned") = delay;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PollTransport for MemoryPollTransport {
    async fn fetch(&self) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("poll delay mutex poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Poll("backend unavailable".to_string()));
        }
        Ok(self.snapshot.lock().expect("poll snapshot mutex poisoned").clone())
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn endpoint(&self) -> String {
        "memory://poll".to_string()
    }
}

/// Reporter that keeps every accepted batch.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    batches: Mutex<Vec<Vec<TelemetryRecord>>>,
    failing: AtomicBool,
    delay: Mutex<Duration>,
    calls: AtomicU32,
    resets: AtomicU32,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Latency added to every report call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("reporter delay mutex poisoned") = delay;
    }

    /// Accepted batches in delivery order.
    pub fn batches(&self) -> Vec<Vec<TelemetryRecord>> {
        self.batches.lock().expect("reporter mutex poisoned").clone()
    }

    /// Every accepted record, flattened.
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.batches().into_iter().flatten().collect()
    }

    /// Report calls so far, failed ones included.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reporter for MemoryReporter {
    async fn report(&self, batch: &[TelemetryRecord]) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("reporter delay mutex poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Report("collector unavailable".to_string()));
        }
        self.batches
            .lock()
            .expect("reporter mutex poisoned")
            .push(batch.to_vec());
        Ok(())
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_loopback() {
        let (transport, mut peers) = MemoryPushTransport::new();
        let mut session = transport.connect().await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        assert!(peer.push("metrics", json!({"cpu": 1})));
        let frame = session.stream.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.kind, "metrics");

        session.sink.send(&OutboundFrame::new("ack", json!(1))).await.unwrap();
        assert_eq!(peer.recv().await.unwrap().kind, "ack");

        drop(peer);
        assert!(session.stream.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_refuses() {
        let (transport, _peers) = MemoryPushTransport::new();
        transport.set_available(false);
        assert!(transport.connect().await.is_err());
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test]
    async fn test_poll_switches() {
        let poll = MemoryPollTransport::new(json!({"v": 1}));
        assert_eq!(poll.fetch().await.unwrap(), json!({"v": 1}));
        poll.set_failing(true);
        assert!(poll.fetch().await.is_err());
        assert_eq!(poll.calls(), 2);
    }
}
