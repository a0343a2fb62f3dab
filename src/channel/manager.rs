//! Channel manager: the push connection state machine.
//!
//! # Responsibilities
//! - Own the push session and the connection state
//! - Fall back to polling while push is down, reconnect with backoff
//! - Route inbound frames and polled snapshots to consumers as typed events
//! - Mirror every transition and inbound frame into telemetry
//!
//! # Design Decisions
//! - One actor task owns all mutable connection state; the handle talks to
//!   it through commands and reads the published status through a watch
//! - Transport callbacks carry the generation that spawned them; anything
//!   from an older generation is ignored
//! - `send` never waits: it pushes into the session's bounded queue or
//!   returns `false`
//! - Teardown aborts tasks without awaiting in-flight network calls

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channel::cache::PollCache;
use crate::channel::events::{
    ChannelEvent, ChannelNotice, DataSource, EventBus, EventKind, HandlerId, HandlerRegistry,
    NoticeContext, Snapshot,
};
use crate::channel::poller::{FallbackPoller, PollOutcome};
use crate::channel::state::{ChannelStatus, ConnectionState};
use crate::config::{ChannelConfig, ConnectionConfig};
use crate::error::{FlushError, TransportError};
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::recovery::{RecoveryCoordinator, FLUSH_FAILURE, NETWORK_ERROR};
use crate::resilience::backoff::BackoffPolicy;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState, OperationClass};
use crate::resilience::retries::RetryExecutor;
use crate::resilience::timeouts::with_timeout;
use crate::telemetry::record::{categories, unix_millis};
use crate::telemetry::{Reporter, TelemetryBuffer};
use crate::transport::{InboundFrame, OutboundFrame, PollTransport, PushSession, PushSink, PushTransport};

/// Inbound frames of this type also carry a data snapshot.
pub const METRICS_FRAME: &str = "metrics";

enum Command {
    Connect,
    Retry,
    Disconnect { done: oneshot::Sender<()> },
    Shutdown { done: oneshot::Sender<()> },
}

/// Transport callbacks, tagged with the generation that produced them.
enum Internal {
    Opened { generation: u64, session: PushSession },
    ConnectFailed { generation: u64, error: TransportError },
    ReconnectDue { generation: u64 },
    Frame { generation: u64, frame: InboundFrame },
    Closed { generation: u64, error: Option<TransportError> },
    SendFailed { generation: u64, error: String },
}

impl Internal {
    fn generation(&self) -> u64 {
        match self {
            Internal::Opened { generation, .. }
            | Internal::ConnectFailed { generation, .. }
            | Internal::ReconnectDue { generation }
            | Internal::Frame { generation, .. }
            | Internal::Closed { generation, .. }
            | Internal::SendFailed { generation, .. } => *generation,
        }
    }
}

/// Handle to a running channel.
///
/// Dropping the handle tears the channel down; the telemetry flusher still
/// performs its final flush.
pub struct ChannelManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ChannelStatus>,
    outbound: Arc<ArcSwapOption<mpsc::Sender<OutboundFrame>>>,
    handlers: Arc<HandlerRegistry>,
    subscribers: broadcast::Sender<ChannelEvent>,
    telemetry: Arc<TelemetryBuffer>,
    push_breaker: Arc<CircuitBreaker>,
    poller: Arc<FallbackPoller>,
    recovery: Arc<RecoveryCoordinator>,
    shutdown: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelManager {
    /// Build the channel and spawn its tasks. Must be called inside a Tokio runtime.
    ///
    /// The channel starts `Disconnected`; call [`connect`](Self::connect).
    pub fn new(
        config: &ChannelConfig,
        push: Arc<dyn PushTransport>,
        poll: Arc<dyn PollTransport>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let retry = RetryExecutor::from_config(&config.retries);
        let breaker = |class| {
            CircuitBreaker::new(
                class,
                config.circuit.threshold,
                Duration::from_millis(config.circuit.reset_timeout_ms),
            )
        };

        let telemetry = TelemetryBuffer::new(
            &config.telemetry,
            &config.circuit,
            retry.clone(),
            Arc::clone(&reporter),
        );

        let recovery = Arc::new(RecoveryCoordinator::new(
            config.recovery.max_attempts,
            telemetry.handle(),
        ));
        recovery.register(FLUSH_FAILURE, move || reporter.reset());
        let poll_reset = Arc::clone(&poll);
        recovery.register(NETWORK_ERROR, move || poll_reset.reset());

        let (poller, poll_outcomes) = FallbackPoller::new(
            poll,
            retry.clone(),
            breaker(OperationClass::PollFetch).with_telemetry(telemetry.handle()),
            Arc::new(PollCache::new()),
            telemetry.handle(),
            Some(Arc::clone(&recovery)),
        );
        let poller = Arc::new(poller);
        let push_breaker = Arc::new(breaker(OperationClass::PushSend).with_telemetry(telemetry.handle()));

        let shutdown = Shutdown::new();
        let handlers = Arc::new(HandlerRegistry::default());
        let (bus, dispatcher) = EventBus::spawn(Arc::clone(&handlers));
        let subscribers = bus.subscriber_handle();
        let (status_tx, status) = watch::channel(ChannelStatus::initial());
        let outbound = Arc::new(ArcSwapOption::empty());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let flusher = telemetry.spawn_flusher(Some(Arc::clone(&recovery)), shutdown.subscribe());

        let actor = ChannelActor {
            connection: config.connection.clone(),
            reconnect_policy: BackoffPolicy::new(
                Duration::from_millis(config.connection.reconnect_delay_ms),
                config.connection.reconnect_backoff_factor,
            )
            .with_max_delay(Duration::from_millis(config.connection.max_reconnect_delay_ms))
            .with_jitter(config.retries.jitter),
            push,
            push_retry: retry,
            push_breaker: Arc::clone(&push_breaker),
            poller: Arc::clone(&poller),
            telemetry: Arc::clone(&telemetry),
            bus,
            status: status_tx,
            outbound: Arc::clone(&outbound),
            commands: command_rx,
            internal_tx,
            internal_rx,
            poll_outcomes,
            shutdown: shutdown.subscribe(),
            state: ConnectionState::Disconnected,
            generation: 0,
            reconnect_attempts: 0,
            push_sequence: 0,
            last_source: None,
            session: None,
            connecting: None,
            timer: None,
        };
        let actor = tokio::spawn(actor.run());

        Self {
            commands,
            status,
            outbound,
            handlers,
            subscribers,
            telemetry,
            push_breaker,
            poller,
            recovery,
            shutdown,
            tasks: Mutex::new(vec![actor, flusher, dispatcher]),
        }
    }

    /// Open the push connection. Ignored unless `Disconnected`.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Operator retry: zero the reconnect counter and connect now.
    ///
    /// Honoured from `Error`, `Reconnecting`, `Degraded` and `Disconnected`.
    pub fn retry(&self) {
        let _ = self.commands.send(Command::Retry);
    }

    /// Close the push connection and stop polling, then flush telemetry once.
    pub async fn disconnect(&self) {
        let (done, ack) = oneshot::channel();
        if self.commands.send(Command::Disconnect { done }).is_ok() {
            let _ = ack.await;
        }
        if let Err(e) = self.telemetry.flush_best_effort().await {
            tracing::warn!(error = %e, "Telemetry flush on disconnect failed");
        }
    }

    /// Queue an outbound frame. `false` unless connected with room in the send queue.
    pub fn send(&self, kind: &str, payload: Value) -> bool {
        if self.state() != ConnectionState::Connected {
            metrics::record_send_rejected();
            return false;
        }
        let Some(queue) = self.outbound.load_full() else {
            metrics::record_send_rejected();
            return false;
        };
        match queue.try_send(OutboundFrame::new(kind, payload)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(kind, error = %e, "Outbound frame rejected");
                metrics::record_send_rejected();
                false
            }
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.handlers.on(kind, Arc::new(handler))
    }

    /// Remove a handler. `false` if it was not registered.
    pub fn off(&self, id: HandlerId) -> bool {
        self.handlers.off(id)
    }

    /// Every event, for async consumers.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.subscribers.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ChannelStatus {
        let mut status = self.status.borrow().clone();
        status.cache_age = self.poller.cache().age();
        status
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Last polled snapshot, served while push is degraded.
    pub fn cached(&self) -> Option<Arc<Snapshot>> {
        self.poller.cache().latest()
    }

    pub async fn flush_now(&self) -> Result<usize, FlushError> {
        self.telemetry.flush_now().await
    }

    pub fn circuit_state(&self, class: OperationClass) -> CircuitState {
        self.breaker(class).state()
    }

    /// Operator action: force a breaker closed.
    pub fn reset_circuit(&self, class: OperationClass) {
        self.breaker(class).reset();
    }

    /// Operator action: clear the recovery ledger for `category`.
    pub fn reset_recovery(&self, category: &str) {
        self.recovery.reset(category);
    }

    pub fn telemetry(&self) -> &Arc<TelemetryBuffer> {
        &self.telemetry
    }

    pub fn recovery(&self) -> &Arc<RecoveryCoordinator> {
        &self.recovery
    }

    /// Tear the channel down: disconnect, stop every task, flush once.
    pub async fn shutdown(&self) {
        let (done, ack) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = ack.await;
        }
        self.shutdown.trigger();

        let tasks = std::mem::take(&mut *self.tasks.lock().expect("task list mutex poisoned"));
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("Channel shut down");
    }

    fn breaker(&self, class: OperationClass) -> &CircuitBreaker {
        match class {
            OperationClass::PushSend => &self.push_breaker,
            OperationClass::PollFetch => self.poller.breaker(),
            OperationClass::Flush => self.telemetry.breaker(),
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

struct ActiveSession {
    id: Uuid,
    sink: Arc<dyn PushSink>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct ChannelActor {
    connection: ConnectionConfig,
    reconnect_policy: BackoffPolicy,
    push: Arc<dyn PushTransport>,
    push_retry: RetryExecutor,
    push_breaker: Arc<CircuitBreaker>,
    poller: Arc<FallbackPoller>,
    telemetry: Arc<TelemetryBuffer>,
    bus: EventBus,
    status: watch::Sender<ChannelStatus>,
    outbound: Arc<ArcSwapOption<mpsc::Sender<OutboundFrame>>>,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    poll_outcomes: mpsc::UnboundedReceiver<PollOutcome>,
    shutdown: broadcast::Receiver<()>,

    state: ConnectionState,
    generation: u64,
    reconnect_attempts: u32,
    push_sequence: u64,
    last_source: Option<DataSource>,
    session: Option<ActiveSession>,
    connecting: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

enum Wake {
    Command(Command),
    Internal(Internal),
    Poll(PollOutcome),
    Stop,
}

impl ChannelActor {
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => Wake::Stop,
                },
                Some(message) = self.internal_rx.recv() => Wake::Internal(message),
                Some(outcome) = self.poll_outcomes.recv() => Wake::Poll(outcome),
                _ = self.shutdown.recv() => Wake::Stop,
            };

            match wake {
                Wake::Command(Command::Connect) => self.on_connect(),
                Wake::Command(Command::Retry) => self.on_retry(),
                Wake::Command(Command::Disconnect { done }) => {
                    self.teardown();
                    let _ = done.send(());
                }
                Wake::Command(Command::Shutdown { done }) => {
                    self.teardown();
                    let _ = done.send(());
                    break;
                }
                Wake::Internal(message) => self.on_internal(message),
                Wake::Poll(outcome) => self.on_poll(outcome),
                Wake::Stop => {
                    self.teardown();
                    break;
                }
            }
        }
        tracing::debug!("Channel actor stopped");
    }

    fn on_connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            tracing::debug!(state = %self.state, "connect() ignored");
            return;
        }
        self.begin_connect();
    }

    fn on_retry(&mut self) {
        if !self.state.accepts_retry() {
            tracing::debug!(state = %self.state, "retry() ignored");
            return;
        }
        tracing::info!(state = %self.state, attempts = self.reconnect_attempts, "Operator retry");
        self.reconnect_attempts = 0;
        self.begin_connect();
    }

    fn begin_connect(&mut self) {
        self.cancel_pending();
        self.generation += 1;
        self.transition(ConnectionState::Connecting);

        let generation = self.generation;
        let push = Arc::clone(&self.push);
        let internal = self.internal_tx.clone();
        let deadline = Duration::from_millis(self.connection.connect_timeout_ms);
        tracing::info!(endpoint = %push.endpoint(), generation, "Connecting push channel");

        self.connecting = Some(tokio::spawn(async move {
            let message = match with_timeout(deadline, push.connect()).await {
                Ok(session) => Internal::Opened { generation, session },
                Err(error) => Internal::ConnectFailed { generation, error },
            };
            let _ = internal.send(message);
        }));
    }

    fn on_internal(&mut self, message: Internal) {
        if message.generation() != self.generation {
            tracing::trace!(generation = message.generation(), current = self.generation, "Stale transport message dropped");
            return;
        }

        match message {
            Internal::Opened { session, .. } => self.on_opened(session),
            Internal::ConnectFailed { error, .. } => {
                self.connecting = None;
                tracing::warn!(error = %error, attempts = self.reconnect_attempts, "Push connect failed");
                self.notify(NoticeContext::Connect, error.to_string());
                self.schedule_reconnect();
            }
            Internal::ReconnectDue { .. } => {
                self.timer = None;
                self.begin_connect();
            }
            Internal::Frame { frame, .. } => self.on_frame(frame),
            Internal::Closed { error, .. } => {
                self.close_session();
                match error {
                    Some(error) => {
                        tracing::warn!(error = %error, "Push stream broke");
                        self.notify(NoticeContext::Stream, error.to_string());
                    }
                    None => tracing::info!("Push stream closed by peer"),
                }
                self.schedule_reconnect();
            }
            Internal::SendFailed { error, .. } => self.notify(NoticeContext::Send, error),
        }
    }

    fn on_opened(&mut self, session: PushSession) {
        self.connecting = None;
        let generation = self.generation;
        let PushSession { sink, mut stream } = session;

        let (queue_tx, mut queue_rx) = mpsc::channel::<OutboundFrame>(self.connection.send_queue_capacity.max(1));
        let writer = {
            let sink = Arc::clone(&sink);
            let retry = self.push_retry.clone();
            let breaker = Arc::clone(&self.push_breaker);
            let telemetry = self.telemetry.handle();
            let internal = self.internal_tx.clone();
            tokio::spawn(async move {
                while let Some(frame) = queue_rx.recv().await {
                    if let Err(e) = retry.execute_guarded(&breaker, || sink.send(&frame)).await {
                        tracing::warn!(kind = %frame.kind, error = %e, "Outbound frame dropped");
                        let record = serde_json::json!({ "type": frame.kind, "error": e.to_string() });
                        telemetry.record(categories::PUSH_ERROR, record.to_string());
                        let _ = internal.send(Internal::SendFailed { generation, error: e.to_string() });
                    }
                }
            })
        };

        let reader = {
            let internal = self.internal_tx.clone();
            tokio::spawn(async move {
                loop {
                    match stream.next_frame().await {
                        Some(Ok(frame)) => {
                            if internal.send(Internal::Frame { generation, frame }).is_err() {
                                break;
                            }
                        }
                        Some(Err(error)) => {
                            let _ = internal.send(Internal::Closed { generation, error: Some(error) });
                            break;
                        }
                        None => {
                            let _ = internal.send(Internal::Closed { generation, error: None });
                            break;
                        }
                    }
                }
            })
        };

        let id = Uuid::new_v4();
        tracing::info!(session = %id, generation, "Push session open");
        self.session = Some(ActiveSession { id, sink, reader, writer });
        self.outbound.store(Some(Arc::new(queue_tx)));
        self.reconnect_attempts = 0;
        self.poller.stop();
        self.transition(ConnectionState::Connected);
    }

    fn on_frame(&mut self, frame: InboundFrame) {
        metrics::record_message(&frame.kind);
        let record = serde_json::json!({ "type": frame.kind });
        self.telemetry.record(categories::MESSAGE, record.to_string());

        let snapshot = (frame.kind == METRICS_FRAME).then(|| {
            self.push_sequence += 1;
            Snapshot {
                source: DataSource::Push,
                payload: frame.payload.clone(),
                received_at: unix_millis(),
                sequence: self.push_sequence,
            }
        });

        self.bus.emit(ChannelEvent::Message(frame));
        if let Some(snapshot) = snapshot {
            self.last_source = Some(DataSource::Push);
            self.publish();
            self.bus.emit(ChannelEvent::Data(snapshot));
        }
    }

    fn on_poll(&mut self, outcome: PollOutcome) {
        if outcome.epoch != self.poller.epoch()
            || matches!(self.state, ConnectionState::Connected | ConnectionState::Disconnected)
        {
            tracing::trace!(epoch = outcome.epoch, state = %self.state, "Poll outcome discarded");
            return;
        }

        match outcome.result {
            Ok(snapshot) => {
                if self.state == ConnectionState::Reconnecting {
                    self.transition(ConnectionState::Degraded);
                }
                self.last_source = Some(DataSource::Poll);
                self.publish();
                self.bus.emit(ChannelEvent::Data((*snapshot).clone()));
            }
            Err(failure) if !failure.circuit_open => self.notify(NoticeContext::Poll, failure.message),
            Err(_) => {}
        }
    }

    fn schedule_reconnect(&mut self) {
        let max = self.connection.max_reconnect_attempts;
        self.poller.start(Duration::from_millis(self.connection.poll_interval_ms));

        if self.reconnect_attempts >= max {
            tracing::error!(attempts = self.reconnect_attempts, "Reconnect attempts exhausted, waiting for retry()");
            self.transition(ConnectionState::Error);
            self.notify(
                NoticeContext::Reconnect,
                format!("gave up after {} reconnect attempts", self.reconnect_attempts),
            );
            return;
        }

        let delay = self.reconnect_policy.jittered_delay(self.reconnect_attempts);
        self.reconnect_attempts += 1;
        tracing::info!(attempt = self.reconnect_attempts, max, delay = ?delay, "Reconnect scheduled");
        self.transition(ConnectionState::Reconnecting);

        let generation = self.generation;
        let internal = self.internal_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::ReconnectDue { generation });
        }));
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            self.publish();
            return;
        }
        self.state = to;

        tracing::info!(from = %from, to = %to, attempts = self.reconnect_attempts, "Connection state changed");
        metrics::record_state_transition(to);
        let record = serde_json::json!({
            "from": from.as_str(),
            "to": to.as_str(),
            "attempts": self.reconnect_attempts,
        });
        self.telemetry.record(categories::CONNECTION, record.to_string());

        self.publish();
        self.bus.emit(ChannelEvent::StateChanged { from, to });
    }

    fn publish(&self) {
        let status = ChannelStatus {
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            polling: self.poller.is_running(),
            last_source: self.last_source,
            cache_age: None,
        };
        self.status.send_replace(status);
    }

    fn notify(&self, context: NoticeContext, message: String) {
        self.bus.emit(ChannelEvent::Error(ChannelNotice::new(context, message)));
    }

    fn close_session(&mut self) {
        self.outbound.store(None);
        if let Some(session) = self.session.take() {
            tracing::debug!(session = %session.id, "Push session closed");
            session.reader.abort();
            session.writer.abort();
            // fire and forget, never wait on the peer
            let sink = session.sink;
            tokio::spawn(async move { sink.close().await });
        }
    }

    /// Abort the connect attempt and the reconnect timer.
    fn cancel_pending(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        if let Some(task) = self.timer.take() {
            task.abort();
        }
    }

    fn teardown(&mut self) {
        self.generation += 1;
        self.cancel_pending();
        self.close_session();
        self.poller.stop();
        self.reconnect_attempts = 0;
        self.transition(ConnectionState::Disconnected);
    }
}
