//! End-to-end channel behaviour over in-memory transports, on paused time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use live_channel::channel::{ChannelEvent, ChannelManager, ConnectionState, DataSource, EventKind, NoticeContext};
use live_channel::config::ChannelConfig;
use live_channel::recovery::{FLUSH_FAILURE, NETWORK_ERROR};
use live_channel::resilience::{CircuitState, OperationClass};
use live_channel::telemetry::categories;
use live_channel::transport::memory::{MemoryPeer, MemoryPollTransport, MemoryPushTransport, MemoryReporter};

mod common;

const LIMIT: Duration = Duration::from_secs(600);

struct Harness {
    manager: ChannelManager,
    push: Arc<MemoryPushTransport>,
    peers: tokio::sync::mpsc::UnboundedReceiver<MemoryPeer>,
    poll: Arc<MemoryPollTransport>,
    reporter: Arc<MemoryReporter>,
}

fn test_config() -> ChannelConfig {
    let mut config = ChannelConfig::default();
    config.connection.reconnect_delay_ms = 1000;
    config.connection.poll_interval_ms = 200;
    config.retries.max_attempts = 1;
    config.retries.jitter = 0.0;
    config
}

fn harness(config: ChannelConfig) -> Harness {
    let (push, peers) = MemoryPushTransport::new();
    let push = Arc::new(push);
    let poll = Arc::new(MemoryPollTransport::new(json!({"cpu": 0.25})));
    let reporter = Arc::new(MemoryReporter::new());
    let manager = ChannelManager::new(&config, push.clone(), poll.clone(), reporter.clone());
    Harness { manager, push, peers, poll, reporter }
}

/// Next `Data` event, skipping everything else.
async fn next_data(events: &mut broadcast::Receiver<ChannelEvent>) -> live_channel::channel::Snapshot {
    loop {
        if let ChannelEvent::Data(snapshot) = events.recv().await.unwrap() {
            return snapshot;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_poll_fallback_and_recovery() {
    let mut h = harness(test_config());
    let mut events = h.manager.subscribe();

    h.manager.connect();
    common::wait_for_state(&h.manager, ConnectionState::Connected, LIMIT).await;
    let peer = h.peers.recv().await.unwrap();

    // push drops and cannot come back yet
    h.push.set_available(false);
    drop(peer);

    let polled = next_data(&mut events).await;
    assert_eq!(polled.source, DataSource::Poll);
    assert_eq!(polled.payload, json!({"cpu": 0.25}));
    common::wait_for_state(&h.manager, ConnectionState::Degraded, LIMIT).await;

    let status = h.manager.status();
    assert!(status.polling);
    assert_eq!(status.last_source, Some(DataSource::Poll));
    assert_eq!(status.reconnect_attempts, 1);
    assert_eq!(h.manager.cached().unwrap().payload, json!({"cpu": 0.25}));

    // push is back before the first reconnect fires
    h.push.set_available(true);
    common::wait_for_state(&h.manager, ConnectionState::Connected, LIMIT).await;
    let peer = h.peers.recv().await.unwrap();
    assert!(!h.manager.status().polling);
    assert_eq!(h.manager.status().reconnect_attempts, 0);

    let polls = h.poll.calls();
    peer.push("metrics", json!({"cpu": 0.9}));
    let pushed = loop {
        let snapshot = next_data(&mut events).await;
        if snapshot.source == DataSource::Push {
            break snapshot;
        }
    };
    assert_eq!(pushed.payload, json!({"cpu": 0.9}));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.poll.calls(), polls, "poller kept running after reconnect");
    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scenario_d_exhaustion_then_retry() {
    let mut config = test_config();
    config.connection.reconnect_delay_ms = 100;
    let mut h = harness(config);
    h.push.set_available(false);

    h.manager.connect();
    common::wait_for_state(&h.manager, ConnectionState::Error, LIMIT).await;

    let status = h.manager.status();
    assert_eq!(status.reconnect_attempts, 10);
    assert!(status.polling, "poller keeps serving data in the error state");
    assert_eq!(h.push.connects(), 11);

    // Error is terminal until retry()
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.push.connects(), 11);
    assert_eq!(h.manager.state(), ConnectionState::Error);

    let mut events = h.manager.subscribe();
    h.push.set_available(true);
    h.manager.retry();

    // polled snapshots may interleave
    let (from, to) = loop {
        if let ChannelEvent::StateChanged { from, to } = events.recv().await.unwrap() {
            break (from, to);
        }
    };
    assert_eq!(from, ConnectionState::Error);
    assert_eq!(to, ConnectionState::Connecting);
    common::wait_for_state(&h.manager, ConnectionState::Connected, LIMIT).await;
    let _peer = h.peers.recv().await.unwrap();
    assert_eq!(h.manager.status().reconnect_attempts, 0);
    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_connection() {
    let mut h = harness(test_config());
    assert!(!h.manager.send("subscribe", json!({"topic": "cpu"})));

    h.manager.connect();
    common::wait_for_state(&h.manager, ConnectionState::Connected, LIMIT).await;
    let mut peer = h.peers.recv().await.unwrap();

    assert!(h.manager.send("subscribe", json!({"topic": "cpu"})));
    let frame = peer.recv().await.unwrap();
    assert_eq!(frame.kind, "subscribe");
    assert!(frame.timestamp > 0);

    h.push.set_available(false);
    drop(peer);
    common::wait_for_state(&h.manager, ConnectionState::Reconnecting, LIMIT).await;
    assert!(!h.manager.send("subscribe", json!({"topic": "cpu"})));
    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_on_and_off() {
    let mut h = harness(test_config());
    let seen = Arc::new(AtomicU32::new(0));
    let counter = seen.clone();
    let id = h.manager.on(EventKind::StateChanged, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.manager.connect();
    common::wait_for_state(&h.manager, ConnectionState::Connected, LIMIT).await;
    let _peer = h.peers.recv().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    assert!(h.manager.off(id));
    h.manager.disconnect().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connection_audit_trail_survives_sampling() {
    let mut config = test_config();
    config.telemetry.sample_rate = 0.0;
    let mut h = harness(config);

    h.manager.connect();
    common::wait_for_state(&h.manager, ConnectionState::Connected, LIMIT).await;
    let peer = h.peers.recv().await.unwrap();
    peer.push("metrics", json!({}));
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.manager.disconnect().await;

    let records = h.reporter.records();
    let transitions: Vec<(String, String)> = records
        .iter()
        .filter(|r| r.category == categories::CONNECTION)
        .map(|r| {
            let payload: serde_json::Value = serde_json::from_str(&r.payload).unwrap();
            (payload["from"].as_str().unwrap().to_string(), payload["to"].as_str().unwrap().to_string())
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            ("disconnected".to_string(), "connecting".to_string()),
            ("connecting".to_string(), "connected".to_string()),
            ("connected".to_string(), "disconnected".to_string()),
        ]
    );
    // `message` records are sampled away at rate 0
    assert!(records.iter().all(|r| r.category != categories::MESSAGE));
    assert!(h.manager.telemetry().stats().sampled_out >= 1);
    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_flush_failures_trigger_capped_recovery() {
    let h = harness(test_config());
    h.reporter.set_failing(true);

    h.manager.telemetry().record("error", "boom");
    // four flush cycles: three remediations, then the cap
    tokio::time::sleep(Duration::from_millis(4 * 5000 + 100)).await;

    assert_eq!(h.reporter.resets(), 3);
    assert_eq!(h.manager.recovery().tracker().attempts(FLUSH_FAILURE), 3);
    let buffered = h.manager.telemetry().snapshot();
    assert!(buffered.iter().any(|r| r.category == categories::RECOVERY_ERROR));
    assert!(buffered.iter().any(|r| r.payload == "boom"), "failed flushes keep their records");

    h.manager.reset_recovery(FLUSH_FAILURE);
    assert_eq!(h.manager.recovery().tracker().attempts(FLUSH_FAILURE), 0);

    h.reporter.set_failing(false);
    assert!(h.manager.flush_now().await.unwrap() > 0);
    assert!(h.reporter.records().iter().any(|r| r.payload == "boom"));
    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_poll_failures_open_breaker_and_recover_network() {
    let h = harness(test_config());
    h.push.set_available(false);
    h.poll.set_failing(true);
    let mut events = h.manager.subscribe();

    h.manager.connect();
    let mut poll_notices = 0;
    while poll_notices < 5 {
        if let ChannelEvent::Error(notice) = events.recv().await.unwrap() {
            if notice.context == NoticeContext::Poll {
                poll_notices += 1;
            }
        }
    }

    assert_eq!(h.manager.circuit_state(OperationClass::PollFetch), CircuitState::Open);
    assert_eq!(h.poll.resets(), 3);
    assert_eq!(h.manager.recovery().tracker().attempts(NETWORK_ERROR), 3);

    // open breaker: no more requests reach the backend
    let calls = h.poll.calls();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.poll.calls(), calls);

    h.manager.reset_circuit(OperationClass::PollFetch);
    assert_eq!(h.manager.circuit_state(OperationClass::PollFetch), CircuitState::Closed);
    h.manager.shutdown().await;
}
