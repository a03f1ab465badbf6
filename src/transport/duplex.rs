//! Push-duplex transport (Socket.IO over WebSocket).
//!
//! A [`DuplexLink`] is one live duplex connection: a [`DuplexSender`] for
//! outgoing events plus a channel of [`LinkEvent`]s. Only the session
//! manager opens and closes links; stream adapters borrow the sender.
//!
//! # Event Loop
//!
//! [`SocketIoConnector`] spawns one tokio task per link that handles:
//!
//! - The Engine.IO handshake and namespace `CONNECT`
//! - Ping/pong heartbeats and the liveness deadline
//! - Outgoing events from the session manager
//! - Translation of incoming packets into [`LinkEvent`]s
//!
//! ```text
//! ┌──────────────────┐   LinkCommand    ┌─────────────┐   WebSocket   ┌────────┐
//! │  SessionManager  │ ───────────────► │  link task  │ ◄───────────► │ server │
//! │                  │ ◄─────────────── │             │               │        │
//! └──────────────────┘    LinkEvent     └─────────────┘               └────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::protocol::{EnginePacket, SocketPacket};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// LinkEvent
// ============================================================================

/// Lifecycle and data events of one duplex link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The namespace handshake completed.
    Connected,
    /// An established link went away.
    Disconnected {
        /// Why the link ended.
        reason: String,
    },
    /// The link could not be established.
    ConnectError {
        /// Why the attempt failed.
        message: String,
    },
    /// A non-fatal link error.
    Error {
        /// Error description.
        message: String,
    },
    /// A named event from the server.
    Event {
        /// Event name.
        name: String,
        /// First event argument, or `null`.
        payload: Value,
    },
}

// ============================================================================
// LinkCommand
// ============================================================================

/// Commands from the session manager to a link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkCommand {
    /// Emit a named event.
    Emit {
        /// Event name.
        name: String,
        /// Event arguments.
        args: Vec<Value>,
    },
    /// Disconnect and close the transport.
    Close,
}

// ============================================================================
// DuplexSender
// ============================================================================

/// Handle for sending on a duplex link.
#[derive(Debug, Clone)]
pub struct DuplexSender {
    command_tx: mpsc::UnboundedSender<LinkCommand>,
}

impl DuplexSender {
    /// Emits a named event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the link task has ended.
    pub fn emit(&self, name: impl Into<String>, args: Vec<Value>) -> Result<()> {
        self.command_tx
            .send(LinkCommand::Emit {
                name: name.into(),
                args,
            })
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Asks the link to disconnect. Closing a finished link is a no-op.
    pub fn close(&self) {
        let _ = self.command_tx.send(LinkCommand::Close);
    }

    /// Returns `true` once the link task has gone away.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

// ============================================================================
// DuplexLink
// ============================================================================

/// An open duplex connection as seen by the session manager.
#[derive(Debug)]
pub struct DuplexLink {
    /// Outgoing side.
    pub sender: DuplexSender,
    /// Incoming events; ends when the link is gone.
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// The other side of a [`DuplexLink`], driven by a connector's task.
#[derive(Debug)]
pub struct LinkEndpoint {
    /// Commands sent by the session manager.
    pub commands: mpsc::UnboundedReceiver<LinkCommand>,
    /// Events delivered to the session manager.
    pub events: mpsc::UnboundedSender<LinkEvent>,
}

impl DuplexLink {
    /// Creates a connected link/endpoint pair.
    #[must_use]
    pub fn pair() -> (Self, LinkEndpoint) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                sender: DuplexSender { command_tx },
                events: event_rx,
            },
            LinkEndpoint {
                commands: command_rx,
                events: event_tx,
            },
        )
    }
}

// ============================================================================
// DuplexConnector
// ============================================================================

/// Opens duplex links.
#[async_trait]
pub trait DuplexConnector: Send + Sync + 'static {
    /// Establishes the transport and returns the link.
    ///
    /// Returning `Ok` does not mean the namespace is connected yet; that
    /// is signalled by [`LinkEvent::Connected`].
    ///
    /// # Errors
    ///
    /// Connection-level failures.
    async fn connect(&self) -> Result<DuplexLink>;
}

// ============================================================================
// SocketIoConnector
// ============================================================================

/// Socket.IO client connector over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    url: Url,
    connect_timeout: Duration,
}

impl SocketIoConnector {
    /// Creates a connector for a full `ws://…/socket.io/?EIO=4&transport=websocket` URL.
    #[inline]
    #[must_use]
    pub fn new(url: Url, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
        }
    }

    /// Creates a connector for the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket URL cannot be derived.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        Ok(Self::new(config.socket_url()?, config.connect_timeout()))
    }

    /// Endpoint this connector dials.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl DuplexConnector for SocketIoConnector {
    async fn connect(&self) -> Result<DuplexLink> {
        debug!(url = %self.url, "Connecting duplex link");

        let (ws_stream, _response) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| Error::connection_timeout(self.connect_timeout.as_millis() as u64))??;

        info!(url = %self.url, "WebSocket connection established");

        let (link, endpoint) = DuplexLink::pair();
        tokio::spawn(run_event_loop(ws_stream, endpoint, self.connect_timeout));

        Ok(link)
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// What the event loop should do after an incoming frame.
enum Flow {
    Continue,
    Reply(String),
    End(Option<LinkEvent>),
}

/// Per-link protocol state.
struct LinkState {
    events: mpsc::UnboundedSender<LinkEvent>,
    connected: bool,
    liveness: Duration,
}

impl LinkState {
    /// Terminal event for a link that ends with `reason`.
    fn ending(&self, reason: impl Into<String>) -> LinkEvent {
        let reason = reason.into();
        if self.connected {
            LinkEvent::Disconnected { reason }
        } else {
            LinkEvent::ConnectError { message: reason }
        }
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }

    /// Handles one text frame from the server.
    fn on_frame(&mut self, text: &str) -> Flow {
        let packet = match EnginePacket::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, frame = %text, "Failed to decode frame");
                self.emit(LinkEvent::Error {
                    message: e.to_string(),
                });
                return Flow::Continue;
            }
        };

        match packet {
            EnginePacket::Open(handshake) => {
                debug!(sid = %handshake.sid, "Engine.IO handshake received");
                self.liveness = handshake.liveness_timeout();
                Flow::Reply(EnginePacket::Message(SocketPacket::connect()).encode())
            }
            EnginePacket::Ping(data) => Flow::Reply(EnginePacket::Pong(data).encode()),
            EnginePacket::Close => Flow::End(Some(self.ending("transport close"))),
            EnginePacket::Message(packet) => self.on_packet(packet),
            EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => Flow::Continue,
        }
    }

    fn on_packet(&mut self, packet: SocketPacket) -> Flow {
        match packet {
            SocketPacket::Connect { .. } => {
                if !self.connected {
                    self.connected = true;
                    info!("Socket.IO namespace connected");
                    self.emit(LinkEvent::Connected);
                }
                Flow::Continue
            }
            SocketPacket::ConnectError { message, .. } => {
                warn!(%message, "Socket.IO connect refused");
                Flow::End(Some(LinkEvent::ConnectError { message }))
            }
            SocketPacket::Disconnect { .. } => {
                Flow::End(Some(self.ending("io server disconnect")))
            }
            SocketPacket::Event { name, args, .. } => {
                let payload = args.into_iter().next().unwrap_or(Value::Null);
                trace!(%name, "Socket.IO event");
                self.emit(LinkEvent::Event { name, payload });
                Flow::Continue
            }
            SocketPacket::Ack { id, .. } => {
                trace!(id, "Ignoring ack");
                Flow::Continue
            }
        }
    }
}

/// Event loop that handles WebSocket I/O for one link.
async fn run_event_loop(ws_stream: WsStream, endpoint: LinkEndpoint, handshake_timeout: Duration) {
    let LinkEndpoint {
        mut commands,
        events,
    } = endpoint;
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let mut state = LinkState {
        events,
        connected: false,
        liveness: handshake_timeout,
    };

    let deadline = sleep(handshake_timeout);
    tokio::pin!(deadline);

    let last_event = loop {
        tokio::select! {
            // Incoming frames from server
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        deadline.as_mut().reset(Instant::now() + state.liveness);

                        match state.on_frame(&text) {
                            Flow::Continue => {}
                            Flow::Reply(reply) => {
                                if let Err(e) = ws_write.send(Message::Text(reply.into())).await {
                                    warn!(error = %e, "Failed to send reply");
                                    break Some(state.ending(format!("transport error: {e}")));
                                }
                            }
                            Flow::End(event) => break event,
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break Some(state.ending("transport close"));
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break Some(state.ending(format!("transport error: {e}")));
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break Some(state.ending("transport close"));
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            // Commands from session manager
            command = commands.recv() => {
                match command {
                    Some(LinkCommand::Emit { name, args }) => {
                        let frame = EnginePacket::Message(SocketPacket::event(name, args)).encode();
                        if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                            warn!(error = %e, "Failed to emit event");
                            break Some(state.ending(format!("transport error: {e}")));
                        }
                    }

                    Some(LinkCommand::Close) | None => {
                        debug!("Closing duplex link");
                        let farewell = EnginePacket::Message(SocketPacket::disconnect()).encode();
                        let _ = ws_write.send(Message::Text(farewell.into())).await;
                        let _ = ws_write.close().await;
                        break Some(state.ending("io client disconnect"));
                    }
                }
            }

            // Missed heartbeat
            () = &mut deadline => {
                warn!(timeout_ms = state.liveness.as_millis() as u64, "Duplex link liveness timeout");
                break Some(state.ending("ping timeout"));
            }
        }
    };

    if let Some(event) = last_event {
        state.emit(event);
    }

    debug!("Duplex link event loop terminated");
}

// ============================================================================
// Tests
// ============================================================================
