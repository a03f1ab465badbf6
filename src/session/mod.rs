//! Dual-stream session management.
//!
//! [`SessionManager`] coordinates the SSE pull stream and the Socket.IO
//! push stream, tracks their statistics, keeps the shared duplex link
//! alive with capped exponential backoff and feeds received messages into
//! the [`MessageLedger`](crate::MessageLedger).
//!
//! # Example
//!
//! ```no_run
//! use dual_stream_session::{SessionConfig, SessionManager, StreamKind};
//!
//! # async fn example() -> dual_stream_session::Result<()> {
//! let config = SessionConfig::builder()
//!     .base_url("http://localhost:3000")
//!     .build()?;
//! let manager = SessionManager::new(config)?;
//!
//! manager.start_stream(StreamKind::Sse).await?;
//! manager.start_stream(StreamKind::Socket).await?;
//!
//! let mut events = manager.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Observing State
//!
//! | Method | Delivers |
//! |--------|----------|
//! | [`SessionManager::snapshot`] | Current [`SessionSnapshot`] |
//! | [`SessionManager::watch`] | Latest snapshot on every change |
//! | [`SessionManager::subscribe`] | Each [`SessionEvent`] as it happens |

// ============================================================================
// Submodules
// ============================================================================

mod actor;

/// Change notifications.
pub mod event;

/// Published state values.
pub mod state;

#[cfg(test)]
mod tests;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::ledger::{
    GroupMode, LedgerExport, Message, MessageFilter, MessageGroup, MessageLedger, group_by,
};
use crate::stats::StreamStats;
use crate::transport::{
    DuplexConnector, EventSourceConnector, PullConnector, SocketIoConnector, StreamKind,
};

use actor::{Command, Connectors, Operation, Outlets, SessionActor};

pub use actor::SharedLedger;
pub use event::SessionEvent;
pub use state::{
    ConnectionStatus, ConnectivityState, SessionSnapshot, StatsReport, StreamSnapshot,
    TotalStats, TransportState,
};

// ============================================================================
// SessionManager
// ============================================================================

/// Handle to a running session.
///
/// Cheap to clone; all clones drive the same session. The session task
/// stops on [`shutdown`](Self::shutdown) or when the last handle is
/// dropped.
///
/// Every operation resolves only after the session has applied it, so a
/// read immediately afterwards observes the result.
pub struct SessionManager {
    /// Channel to the session actor.
    command_tx: mpsc::UnboundedSender<Command>,
    /// Latest published state.
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    /// Event fan-out.
    events_tx: broadcast::Sender<SessionEvent>,
    /// Shared message store.
    ledger: SharedLedger,
    /// Time source for derived values.
    clock: Arc<dyn Clock>,
    /// Identity of this session.
    session_id: SessionId,
}

impl Clone for SessionManager {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            snapshot_rx: self.snapshot_rx.clone(),
            events_tx: self.events_tx.clone(),
            ledger: Arc::clone(&self.ledger),
            clock: Arc::clone(&self.clock),
            session_id: self.session_id,
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("session_id", &self.session_id)
            .field("closed", &self.command_tx.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SessionManager - Construction
// ============================================================================

impl SessionManager {
    /// Starts a session against the configured server.
    ///
    /// Opens the duplex link immediately. Must be called within a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URLs cannot be derived or the HTTP
    /// client cannot be built.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let pull = EventSourceConnector::from_config(&config)?;
        let duplex = SocketIoConnector::from_config(&config)?;

        Ok(Self::with_connectors(
            &config,
            Arc::new(pull),
            Arc::new(duplex),
            Arc::new(SystemClock),
        ))
    }

    /// Starts a session with custom transports and clock.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn with_connectors(
        config: &SessionConfig,
        pull: Arc<dyn PullConnector>,
        duplex: Arc<dyn DuplexConnector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let (events_tx, _) = broadcast::channel(config.event_capacity());
        let ledger: SharedLedger = Arc::new(RwLock::new(MessageLedger::new(clock.now())));
        let session_id = SessionId::generate();

        debug!(%session_id, base_url = %config.base_url(), "Spawning session");

        SessionActor::spawn(
            config,
            Connectors {
                pull,
                duplex,
                clock: Arc::clone(&clock),
            },
            Outlets {
                snapshot: snapshot_tx,
                events: events_tx.clone(),
                ledger: Arc::clone(&ledger),
            },
            command_rx,
        );

        Self {
            command_tx,
            snapshot_rx,
            events_tx,
            ledger,
            clock,
            session_id,
        }
    }
}

// ============================================================================
// SessionManager - Operations
// ============================================================================

impl SessionManager {
    /// Starts (or restarts) the `kind` stream.
    ///
    /// Resets the stream's statistics and accumulated content and clears
    /// the last error. The stream becomes active on its first message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has terminated.
    pub async fn start_stream(&self, kind: StreamKind) -> Result<()> {
        self.request(Operation::StartStream(kind)).await
    }

    /// Stops the `kind` stream. Stopping an idle stream is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has terminated.
    pub async fn stop_stream(&self, kind: StreamKind) -> Result<()> {
        self.request(Operation::StopStream(kind)).await
    }

    /// Reconnects the duplex link now, bypassing backoff.
    ///
    /// Does nothing while connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has terminated.
    pub async fn manual_reconnect(&self) -> Result<()> {
        self.request(Operation::ManualReconnect).await
    }

    /// Clears the last error. Stream states are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has terminated.
    pub async fn clear_error(&self) -> Result<()> {
        self.request(Operation::ClearError).await
    }

    /// Stops both streams and zeroes counters, rates and content.
    ///
    /// The message ledger is not affected; see
    /// [`clear_messages`](Self::clear_messages).
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has terminated.
    pub async fn clear_all_data(&self) -> Result<()> {
        self.request(Operation::ClearAllData).await
    }

    /// Stops both streams, cancels pending reconnects and closes the link.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has terminated.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Operation::Disconnect).await
    }

    /// Terminates the session task. Later operations fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session had already
    /// terminated.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Operation::Shutdown).await
    }

    async fn request(&self, op: Operation) -> Result<()> {
        let (reply, done) = oneshot::channel();

        self.command_tx
            .send(Command { op, reply })
            .map_err(|_| Error::SessionClosed)?;

        done.await.map_err(|_| Error::SessionClosed)
    }
}

// ============================================================================
// SessionManager - Published State
// ============================================================================

impl SessionManager {
    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that observes every published state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Receiver for change events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Returns `true` while the duplex link is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.snapshot_rx.borrow().connectivity.connected
    }

    /// Messages received on both streams.
    #[inline]
    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.snapshot_rx.borrow().message_count
    }

    /// Combined messages per second.
    #[inline]
    #[must_use]
    pub fn message_rate(&self) -> u32 {
        self.snapshot_rx.borrow().message_rate
    }

    /// The last error, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.snapshot_rx.borrow().connectivity.last_error.clone()
    }

    /// Lifecycle state of the `kind` stream.
    #[must_use]
    pub fn state(&self, kind: StreamKind) -> TransportState {
        self.snapshot_rx.borrow().stream(kind).state
    }

    /// Statistics of the `kind` stream.
    #[must_use]
    pub fn stats(&self, kind: StreamKind) -> StreamStats {
        self.snapshot_rx.borrow().stream(kind).stats.clone()
    }

    /// Most recent message text of the `kind` stream.
    #[must_use]
    pub fn last_message(&self, kind: StreamKind) -> Option<String> {
        self.snapshot_rx.borrow().stream(kind).last_message.clone()
    }

    /// Accumulated text of the `kind` stream.
    #[must_use]
    pub fn content(&self, kind: StreamKind) -> String {
        self.snapshot_rx.borrow().stream(kind).content.clone()
    }

    /// Display status of the `kind` stream.
    #[must_use]
    pub fn status(&self, kind: StreamKind) -> String {
        self.snapshot_rx.borrow().status(kind, self.clock.now())
    }

    /// Serializable statistics report.
    #[must_use]
    pub fn stats_report(&self) -> StatsReport {
        self.snapshot_rx.borrow().stats_report()
    }

    /// Serializable connection summary.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.snapshot_rx.borrow().connection_status()
    }

    /// Identity of this session.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }
}

// ============================================================================
// SessionManager - Ledger
// ============================================================================

impl SessionManager {
    /// The shared message ledger.
    #[must_use]
    pub fn ledger(&self) -> SharedLedger {
        Arc::clone(&self.ledger)
    }

    /// Ledger messages matching `filter`, newest first.
    #[must_use]
    pub fn messages(&self, filter: &MessageFilter) -> Vec<Message> {
        self.ledger.read().filter_with(filter)
    }

    /// Ledger messages matching `filter`, grouped by `mode`.
    #[must_use]
    pub fn grouped_messages(&self, filter: &MessageFilter, mode: GroupMode) -> Vec<MessageGroup> {
        group_by(&self.messages(filter), mode)
    }

    /// Export of the ledger messages matching `filter`.
    #[must_use]
    pub fn export(&self, filter: &MessageFilter) -> LedgerExport {
        self.ledger.read().export(filter, self.clock.now())
    }

    /// Removes every ledger message.
    pub fn clear_messages(&self) {
        self.ledger.write().clear();
    }
}
