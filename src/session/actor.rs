//! The session actor.
//!
//! One tokio task owns every piece of mutable session state. Commands from
//! [`SessionManager`](super::SessionManager) handles, events from the pull
//! pumps and the duplex link, the reconnect timer and the rate ticker are
//! multiplexed by a single `select!` loop, so handlers interleave but never
//! overlap.
//!
//! ```text
//!  SessionManager ──Command──┐
//!                            ▼
//!  pull pump ───Inbound──► actor ──► watch<SessionSnapshot>
//!  link task ───Inbound──►   │   ──► broadcast<SessionEvent>
//!                            └─────► MessageLedger
//! ```
//!
//! Every inbound event carries the [`HandleId`] or [`ConnectionId`] it was
//! produced under and is dropped unless that id is still current.

// ============================================================================
// Imports
// ============================================================================

use std::future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, Sleep, interval, sleep};
use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, HandleId};
use crate::ledger::MessageLedger;
use crate::retry::RetryPolicy;
use crate::stats::{StatsTracker, windowed_rate};
use crate::transport::{
    DuplexConnector, DuplexLink, DuplexSender, LinkEvent, Payload, PullConnector, SocketStream,
    StreamFault, StreamKind, TransportEvent,
};

use super::event::SessionEvent;
use super::state::{ConnectivityState, SessionSnapshot, StreamSnapshot, TransportState};

// ============================================================================
// Types
// ============================================================================

/// Ledger shared between the actor and every handle.
pub type SharedLedger = Arc<RwLock<MessageLedger>>;

// ============================================================================
// Constants
// ============================================================================

/// Reason reported when a link's event channel ends without a terminal event.
const LINK_CLOSED_REASON: &str = "link closed";

/// Error shown while the duplex link is being recovered.
const CONNECTION_LOST: &str = "Connection lost. Attempting to reconnect...";

// ============================================================================
// Commands
// ============================================================================

/// Operation requested by a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    StartStream(StreamKind),
    StopStream(StreamKind),
    ManualReconnect,
    ClearError,
    ClearAllData,
    Disconnect,
    Shutdown,
}

/// An operation plus its completion signal.
pub(crate) struct Command {
    pub(crate) op: Operation,
    pub(crate) reply: oneshot::Sender<()>,
}

/// Collaborators injected into the actor.
pub(crate) struct Connectors {
    pub(crate) pull: Arc<dyn PullConnector>,
    pub(crate) duplex: Arc<dyn DuplexConnector>,
    pub(crate) clock: Arc<dyn Clock>,
}

/// Channels the actor publishes on.
pub(crate) struct Outlets {
    pub(crate) snapshot: watch::Sender<SessionSnapshot>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) ledger: SharedLedger,
}

// ============================================================================
// Inbound
// ============================================================================

/// Events from tasks spawned by the actor.
enum Inbound {
    /// An event from a pull pump.
    Stream {
        kind: StreamKind,
        handle: HandleId,
        event: TransportEvent,
    },
    /// A duplex transport was established.
    LinkOpened {
        connection: ConnectionId,
        sender: DuplexSender,
    },
    /// A lifecycle or data event from a duplex link.
    Link {
        connection: ConnectionId,
        event: LinkEvent,
    },
}

// ============================================================================
// StreamSlot
// ============================================================================

/// Actor-side state of one stream.
struct StreamSlot {
    state: TransportState,
    desired: bool,
    handle: Option<HandleId>,
    pump: Option<JoinHandle<()>>,
    tracker: StatsTracker,
    last_message: Option<String>,
    content: String,
}

impl StreamSlot {
    fn new() -> Self {
        Self {
            state: TransportState::Idle,
            desired: false,
            handle: None,
            pump: None,
            tracker: StatsTracker::new(),
            last_message: None,
            content: String::new(),
        }
    }

    /// Invalidates the current handle. Returns `true` if there was one.
    fn release(&mut self) -> bool {
        self.desired = false;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.handle.take().is_some()
    }

    fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            state: self.state,
            desired: self.desired,
            stats: self.tracker.stats().clone(),
            last_message: self.last_message.clone(),
            content: self.content.clone(),
        }
    }
}

// ============================================================================
// LinkSlot
// ============================================================================

/// The single duplex link.
enum LinkSlot {
    Down,
    Connecting {
        id: ConnectionId,
        task: JoinHandle<()>,
    },
    Up {
        id: ConnectionId,
        sender: DuplexSender,
        task: JoinHandle<()>,
    },
}

impl LinkSlot {
    fn id(&self) -> Option<ConnectionId> {
        match self {
            Self::Down => None,
            Self::Connecting { id, .. } | Self::Up { id, .. } => Some(*id),
        }
    }

    fn sender(&self) -> Option<&DuplexSender> {
        match self {
            Self::Up { sender, .. } => Some(sender),
            Self::Down | Self::Connecting { .. } => None,
        }
    }

    /// Closes whatever link is held and leaves the slot `Down`.
    fn close(&mut self) {
        match std::mem::replace(self, Self::Down) {
            Self::Down => {}
            Self::Connecting { id, task } => {
                debug!(connection = %id, "Abandoning link attempt");
                task.abort();
            }
            Self::Up { id, sender, task } => {
                debug!(connection = %id, "Closing duplex link");
                sender.close();
                task.abort();
            }
        }
    }
}

// ============================================================================
// SessionActor
// ============================================================================

/// Owner of all session state.
pub(crate) struct SessionActor {
    retry: RetryPolicy,
    rate_window: Duration,
    pull: Arc<dyn PullConnector>,
    duplex: Arc<dyn DuplexConnector>,
    clock: Arc<dyn Clock>,
    outlets: Outlets,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    sse: StreamSlot,
    socket: StreamSlot,
    link: LinkSlot,
    connectivity: ConnectivityState,
    message_count: u64,
    message_rate: u32,
    parse_failures: u64,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
}

impl SessionActor {
    /// Spawns the actor task.
    ///
    /// The actor opens the duplex link and starts the rate sampler
    /// immediately. It runs until [`Operation::Shutdown`] or until every
    /// command sender is dropped.
    pub(crate) fn spawn(
        config: &SessionConfig,
        connectors: Connectors,
        outlets: Outlets,
        commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let actor = Self {
            retry: config.retry_policy(),
            rate_window: config.rate_window(),
            pull: connectors.pull,
            duplex: connectors.duplex,
            clock: connectors.clock,
            outlets,
            inbound_tx,
            sse: StreamSlot::new(),
            socket: StreamSlot::new(),
            link: LinkSlot::Down,
            connectivity: ConnectivityState::default(),
            message_count: 0,
            message_rate: 0,
            parse_failures: 0,
            reconnect_timer: None,
        };

        tokio::spawn(actor.run(commands, inbound_rx, config.rate_sample_interval()));
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
        sample_interval: Duration,
    ) {
        let mut ticker = interval(sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Session started");
        self.open_link();
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(Command { op, reply }) = command else {
                        debug!("All session handles dropped");
                        break;
                    };

                    let shutdown = op == Operation::Shutdown;
                    self.execute(op);
                    self.publish();
                    let _ = reply.send(());

                    if shutdown {
                        break;
                    }
                }

                Some(message) = inbound.recv() => {
                    self.dispatch(message);
                    self.publish();
                }

                () = wait_timer(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.on_reconnect_timer();
                    self.publish();
                }

                _ = ticker.tick() => {
                    self.sample_rate();
                    self.publish();
                }
            }
        }

        self.teardown();
        self.publish();
        info!("Session terminated");
    }

    // ========================================================================
    // Operations
    // ========================================================================

    fn execute(&mut self, op: Operation) {
        trace!(?op, "Executing operation");

        match op {
            Operation::StartStream(kind) => self.start_stream(kind),
            Operation::StopStream(kind) => self.stop_stream(kind),
            Operation::ManualReconnect => self.manual_reconnect(),
            Operation::ClearError => self.clear_last_error(),
            Operation::ClearAllData => self.clear_all_data(),
            Operation::Disconnect => self.disconnect(),
            Operation::Shutdown => self.teardown(),
        }
    }

    fn start_stream(&mut self, kind: StreamKind) {
        let now = self.clock.now();

        if self.slot(kind).handle.is_some() {
            self.stop_stream(kind);
        }
        self.rearm_retries();
        self.clear_last_error();

        let handle = HandleId::next();
        let slot = self.slot_mut(kind);
        slot.desired = true;
        slot.handle = Some(handle);
        slot.tracker.reset(now);
        slot.content.clear();

        info!(%kind, %handle, "Starting stream");
        self.set_state(kind, TransportState::Connecting);

        match kind {
            StreamKind::Sse => {
                let pump = tokio::spawn(run_pull(
                    Arc::clone(&self.pull),
                    handle,
                    self.inbound_tx.clone(),
                ));
                self.sse.pump = Some(pump);
            }
            StreamKind::Socket => {
                if self.connectivity.connected {
                    self.subscribe_socket();
                } else if matches!(self.link, LinkSlot::Down) {
                    self.reconnect_timer = None;
                    self.open_link();
                } else {
                    debug!("Duplex link pending; socket stream will start on connect");
                }
            }
        }
    }

    fn stop_stream(&mut self, kind: StreamKind) {
        let had_handle = self.slot_mut(kind).release();

        if kind == StreamKind::Socket
            && had_handle
            && let Some(sender) = self.link.sender()
            && let Err(e) = SocketStream::stop(sender)
        {
            debug!(error = %e, "Could not send stopStream");
        }

        self.set_state(kind, TransportState::Idle);
        debug!(%kind, "Stream stopped");
    }

    fn stop_all(&mut self) {
        for kind in StreamKind::ALL {
            self.stop_stream(kind);
        }
    }

    fn manual_reconnect(&mut self) {
        if self.connectivity.connected {
            debug!("Already connected; manual reconnect ignored");
            return;
        }

        info!("Manual reconnect requested");
        self.rearm_retries();
        self.reconnect_timer = None;
        self.open_link();
    }

    fn clear_all_data(&mut self) {
        self.stop_all();

        self.message_count = 0;
        self.message_rate = 0;
        self.parse_failures = 0;
        for slot in [&mut self.sse, &mut self.socket] {
            slot.tracker.clear();
            slot.content.clear();
            slot.last_message = None;
        }

        info!("Session data cleared");
    }

    fn disconnect(&mut self) {
        info!("Disconnecting session");

        self.stop_all();
        self.reconnect_timer = None;
        self.link.close();
        self.set_connected(false);
    }

    /// Releases every task and timer without emitting protocol traffic.
    fn teardown(&mut self) {
        for kind in StreamKind::ALL {
            self.slot_mut(kind).release();
            self.set_state(kind, TransportState::Idle);
        }
        self.reconnect_timer = None;
        self.link.close();
        self.set_connected(false);
    }

    // ========================================================================
    // Inbound Events
    // ========================================================================

    fn dispatch(&mut self, message: Inbound) {
        match message {
            Inbound::Stream {
                kind,
                handle,
                event,
            } => self.on_transport_event(kind, handle, event),
            Inbound::LinkOpened { connection, sender } => self.on_link_opened(connection, sender),
            Inbound::Link { connection, event } => self.on_link_event(connection, event),
        }
    }

    fn on_transport_event(&mut self, kind: StreamKind, handle: HandleId, event: TransportEvent) {
        if self.slot(kind).handle != Some(handle) {
            debug!(%kind, %handle, "Dropping event from stale handle");
            return;
        }

        match event {
            TransportEvent::Data(payload) => self.ingest(kind, payload),

            TransportEvent::Error(fault) if fault.is_parse() => {
                self.parse_failures = self.parse_failures.saturating_add(1);
                warn!(%kind, error = %fault, "Skipping undecodable message");
            }

            TransportEvent::Error(fault) => self.on_stream_fault(kind, &fault),

            TransportEvent::Closed => {
                info!(%kind, "Stream ended");
                self.set_state(kind, TransportState::Closed);
                self.slot_mut(kind).release();
                self.set_state(kind, TransportState::Idle);
            }
        }
    }

    fn ingest(&mut self, kind: StreamKind, payload: Payload) {
        let now = self.clock.now();
        let Payload { text, size } = payload;

        if !self.slot(kind).state.is_active() {
            self.set_state(kind, TransportState::Active);
        }

        let slot = self.slot_mut(kind);
        slot.tracker.record(size, now);
        slot.content.push_str(&text);
        slot.last_message = Some(text.clone());

        self.message_count = self.message_count.saturating_add(1);
        self.outlets.ledger.write().append(kind, text.as_str(), now);

        trace!(%kind, size, "Message received");
        self.emit(SessionEvent::MessageReceived {
            kind,
            content: text,
            size,
        });
    }

    fn on_stream_fault(&mut self, kind: StreamKind, fault: &StreamFault) {
        warn!(%kind, error = %fault, "Stream failed");

        self.raise_error(format!("{kind} stream error: {fault}"));
        self.set_state(kind, TransportState::Erroring);
        self.attempt_reconnect();

        // The pull body is gone; only the duplex link is ever recovered.
        if kind == StreamKind::Sse {
            self.slot_mut(kind).release();
            self.set_state(kind, TransportState::Idle);
        }
    }

    fn on_link_opened(&mut self, connection: ConnectionId, sender: DuplexSender) {
        self.link = match std::mem::replace(&mut self.link, LinkSlot::Down) {
            LinkSlot::Connecting { id, task } if id == connection => {
                debug!(%connection, "Duplex transport established");
                LinkSlot::Up { id, sender, task }
            }
            current => {
                debug!(%connection, "Closing superseded link");
                sender.close();
                current
            }
        };
    }

    fn on_link_event(&mut self, connection: ConnectionId, event: LinkEvent) {
        if self.link.id() != Some(connection) {
            debug!(%connection, "Dropping event from stale link");
            return;
        }

        match event {
            LinkEvent::Connected => self.on_connected(connection),

            LinkEvent::Disconnected { reason } => {
                info!(%connection, %reason, "Duplex link lost");
                self.on_link_down();
                if self.socket.desired {
                    self.raise_error(CONNECTION_LOST);
                }
                self.attempt_reconnect();
            }

            LinkEvent::ConnectError { message } => {
                warn!(%connection, %message, "Duplex link could not connect");
                self.on_link_down();
                self.raise_error(format!("Connection error: {message}"));
                self.attempt_reconnect();
            }

            LinkEvent::Error { message } => {
                warn!(%connection, %message, "Duplex link error");
                self.raise_error(format!("Socket connection error occurred: {message}"));
                self.attempt_reconnect();
            }

            LinkEvent::Event { name, payload } => {
                let Some(handle) = self.socket.handle else {
                    trace!(%name, "Socket stream not running; event ignored");
                    return;
                };
                if let Some(event) = SocketStream::translate(&name, &payload) {
                    self.on_transport_event(StreamKind::Socket, handle, event);
                }
            }
        }
    }

    fn on_connected(&mut self, connection: ConnectionId) {
        info!(%connection, "Duplex link connected");

        self.set_connected(true);
        self.connectivity.reconnect_attempts = 0;
        self.reconnect_timer = None;
        self.clear_last_error();

        if self.socket.desired {
            self.subscribe_socket();
        }
    }

    fn on_link_down(&mut self) {
        self.link.close();
        self.set_connected(false);
        if self.socket.desired {
            self.set_state(StreamKind::Socket, TransportState::Erroring);
        }
    }

    /// Asks the server to stream on the current link.
    fn subscribe_socket(&mut self) {
        let sent = match self.link.sender() {
            Some(sender) => SocketStream::start(sender),
            None => Err(Error::ConnectionClosed),
        };

        match sent {
            Ok(()) => {
                debug!("Socket stream subscribed");
                self.set_state(StreamKind::Socket, TransportState::Connecting);
            }
            Err(e) => warn!(error = %e, "Could not send startStream"),
        }
    }

    // ========================================================================
    // Reconnection
    // ========================================================================

    fn attempt_reconnect(&mut self) {
        if self.connectivity.connected || self.link_in_flight() || !self.any_desired() {
            trace!("Reconnect not needed");
            return;
        }

        let attempt = self.connectivity.reconnect_attempts.saturating_add(1);
        self.connectivity.reconnect_attempts = attempt;

        if !self.retry.should_retry(attempt) {
            let max = self.retry.max_attempts();
            error!(attempts = max, "Giving up on duplex reconnection");

            self.reconnect_timer = None;
            self.stop_all();
            self.raise_error(Error::max_retries_exceeded(max).to_string());
            self.emit(SessionEvent::RetriesExhausted { attempts: max });
            return;
        }

        let delay = self.retry.next_delay(attempt);
        info!(
            attempt,
            max = self.retry.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        self.reconnect_timer = Some(Box::pin(sleep(delay)));
        self.emit(SessionEvent::ReconnectScheduled { attempt, delay });
    }

    fn on_reconnect_timer(&mut self) {
        if self.connectivity.connected || self.link_in_flight() {
            debug!("Reconnect timer fired while link is busy");
            return;
        }

        info!(
            attempt = self.connectivity.reconnect_attempts,
            "Reconnecting duplex link"
        );
        self.open_link();
    }

    /// Restores the retry budget after it was exhausted.
    fn rearm_retries(&mut self) {
        if self.connectivity.reconnect_attempts > self.retry.max_attempts() {
            debug!("Retry budget re-armed");
            self.connectivity.reconnect_attempts = 0;
        }
    }

    /// Opens a new duplex link, superseding any existing one.
    fn open_link(&mut self) {
        self.link.close();

        let id = ConnectionId::next();
        debug!(connection = %id, "Opening duplex link");

        let task = tokio::spawn(run_link(
            Arc::clone(&self.duplex),
            id,
            self.inbound_tx.clone(),
        ));
        self.link = LinkSlot::Connecting { id, task };
    }

    fn link_in_flight(&self) -> bool {
        match self.link {
            LinkSlot::Down => false,
            LinkSlot::Connecting { .. } => true,
            LinkSlot::Up { .. } => !self.connectivity.connected,
        }
    }

    fn any_desired(&self) -> bool {
        self.sse.desired || self.socket.desired
    }

    // ========================================================================
    // Rate Sampling
    // ========================================================================

    fn sample_rate(&mut self) {
        let now = self.clock.now();
        let rate = windowed_rate([&self.sse.tracker, &self.socket.tracker], self.rate_window, now);

        if rate != self.message_rate {
            self.message_rate = rate;
            self.emit(SessionEvent::RateSampled { rate });
        }
    }

    // ========================================================================
    // State Helpers
    // ========================================================================

    fn slot(&self, kind: StreamKind) -> &StreamSlot {
        match kind {
            StreamKind::Sse => &self.sse,
            StreamKind::Socket => &self.socket,
        }
    }

    fn slot_mut(&mut self, kind: StreamKind) -> &mut StreamSlot {
        match kind {
            StreamKind::Sse => &mut self.sse,
            StreamKind::Socket => &mut self.socket,
        }
    }

    fn set_state(&mut self, kind: StreamKind, to: TransportState) {
        let slot = self.slot_mut(kind);
        let from = slot.state;
        if from == to {
            return;
        }
        slot.state = to;

        debug!(%kind, %from, %to, "Stream state changed");
        self.emit(SessionEvent::StateChanged { kind, from, to });
    }

    fn set_connected(&mut self, connected: bool) {
        if self.connectivity.connected == connected {
            return;
        }
        self.connectivity.connected = connected;
        self.emit(SessionEvent::ConnectivityChanged { connected });
    }

    fn raise_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.connectivity.last_error = Some(message.clone());
        self.emit(SessionEvent::ErrorRaised { message });
    }

    fn clear_last_error(&mut self) {
        if self.connectivity.last_error.take().is_some() {
            self.emit(SessionEvent::ErrorCleared);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.outlets.events.send(event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connectivity: self.connectivity.clone(),
            message_count: self.message_count,
            message_rate: self.message_rate,
            parse_failures: self.parse_failures,
            sse: self.sse.snapshot(),
            socket: self.socket.snapshot(),
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.outlets.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

// ============================================================================
// Spawned Tasks
// ============================================================================

/// Resolves when the reconnect timer fires; pending while none is set.
async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(deadline) => deadline.as_mut().await,
        None => future::pending().await,
    }
}

/// Forwards one pull handle's events to the actor.
async fn run_pull(
    connector: Arc<dyn PullConnector>,
    handle: HandleId,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let deliver = |event| {
        inbound
            .send(Inbound::Stream {
                kind: StreamKind::Sse,
                handle,
                event,
            })
            .is_ok()
    };

    let mut stream = match connector.open().await {
        Ok(stream) => stream,
        Err(e) => {
            if e.is_connection_error() {
                warn!(%handle, error = %e, "Failed to open event stream");
            } else {
                error!(%handle, error = %e, "Event stream request is invalid");
            }
            deliver(TransportEvent::Error(StreamFault::from(e)));
            return;
        }
    };

    while let Some(event) = stream.next().await {
        if !deliver(event) {
            break;
        }
    }

    trace!(%handle, "Pull pump finished");
}

/// Connects one duplex link and forwards its events to the actor.
async fn run_link(
    connector: Arc<dyn DuplexConnector>,
    connection: ConnectionId,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    let link: Result<DuplexLink> = connector.connect().await;
    let DuplexLink { sender, mut events } = match link {
        Ok(link) => link,
        Err(e) => {
            let _ = inbound.send(Inbound::Link {
                connection,
                event: LinkEvent::ConnectError {
                    message: e.to_string(),
                },
            });
            return;
        }
    };

    if inbound
        .send(Inbound::LinkOpened { connection, sender })
        .is_err()
    {
        return;
    }

    while let Some(event) = events.recv().await {
        let terminal = matches!(
            event,
            LinkEvent::Disconnected { .. } | LinkEvent::ConnectError { .. }
        );
        if inbound.send(Inbound::Link { connection, event }).is_err() || terminal {
            return;
        }
    }

    let _ = inbound.send(Inbound::Link {
        connection,
        event: LinkEvent::Disconnected {
            reason: LINK_CLOSED_REASON.to_string(),
        },
    });
}
