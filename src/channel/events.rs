//! Typed channel events and handler dispatch.
//!
//! # Responsibilities
//! - Define the event union delivered to consumers
//! - Keep the `on`/`off` handler registry
//! - Deliver events in emission order without blocking the actor
//!
//! # Design Decisions
//! - Handlers run on one dispatcher task; a slow handler delays later
//!   events but never the actor
//! - A panicking handler is caught and logged, delivery continues
//! - `subscribe()` receivers are a broadcast fan-out; lagging ones lose events

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::channel::state::ConnectionState;
use crate::transport::InboundFrame;

const SUBSCRIBER_CAPACITY: usize = 256;

/// Which transport produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Push,
    Poll,
}

/// A data snapshot, same shape whether pushed or polled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub source: DataSource,
    pub payload: Value,
    /// Unix time in milliseconds.
    pub received_at: u64,
    /// Increases per source.
    pub sequence: u64,
}

/// Where a notice originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeContext {
    Connect,
    Stream,
    Send,
    Poll,
    Reconnect,
}

/// One-shot notification of a failure that was handled locally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelNotice {
    pub context: NoticeContext,
    pub message: String,
}

impl ChannelNotice {
    pub fn new(context: NoticeContext, message: impl Into<String>) -> Self {
        Self { context, message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelEvent {
    StateChanged { from: ConnectionState, to: ConnectionState },
    Data(Snapshot),
    Message(InboundFrame),
    Error(ChannelNotice),
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::StateChanged { .. } => EventKind::StateChanged,
            ChannelEvent::Data(_) => EventKind::Data,
            ChannelEvent::Message(_) => EventKind::Message,
            ChannelEvent::Error(_) => EventKind::Error,
        }
    }
}

/// Selects the events a handler receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    Data,
    Message,
    Error,
}

/// Returned by `on`, passed to `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

pub type Handler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Handlers keyed by id; ids grow with registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: DashMap<HandlerId, (EventKind, Handler)>,
}

impl HandlerRegistry {
    pub fn on(&self, kind: EventKind, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.insert(id, (kind, handler));
        id
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn matching(&self, kind: EventKind) -> Vec<Handler> {
        let mut matched: Vec<_> = self
            .handlers
            .iter()
            .filter(|entry| entry.value().0 == kind)
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().1)))
            .collect();
        matched.sort_by_key(|(id, _)| *id);
        matched.into_iter().map(|(_, handler)| handler).collect()
    }
}

/// Emission side held by the actor.
///
/// Dropping the bus ends the dispatcher once queued events are delivered.
pub struct EventBus {
    dispatch: mpsc::UnboundedSender<ChannelEvent>,
    subscribers: broadcast::Sender<ChannelEvent>,
}

impl EventBus {
    /// Spawn the dispatcher for `registry`.
    pub fn spawn(registry: Arc<HandlerRegistry>) -> (Self, JoinHandle<()>) {
        let (dispatch, mut queue) = mpsc::unbounded_channel::<ChannelEvent>();
        let (subscribers, _) = broadcast::channel(SUBSCRIBER_CAPACITY);

        let dispatcher = tokio::spawn(async move {
            while let Some(event) = queue.recv().await {
                for handler in registry.matching(event.kind()) {
                    if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                        tracing::error!(kind = ?event.kind(), "Event handler panicked");
                    }
                }
            }
        });

        (Self { dispatch, subscribers }, dispatcher)
    }

    pub fn emit(&self, event: ChannelEvent) {
        // no subscribers is fine
        let _ = self.subscribers.send(event.clone());
        let _ = self.dispatch.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.subscribers.subscribe()
    }

    pub fn subscriber_handle(&self) -> broadcast::Sender<ChannelEvent> {
        self.subscribers.clone()
    }
}
