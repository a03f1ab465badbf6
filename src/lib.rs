//! Dual-stream session manager.
//!
//! Consumes one text stream over two transports at once, a Server-Sent
//! Events pull stream and a Socket.IO push stream, and keeps them running
//! as a single session.
//!
//! # Architecture
//!
//! One tokio task owns all session state. Handles send it operations and
//! observe it through a watch channel and a broadcast channel:
//!
//! - **Pull stream**: `GET {base}/stream`, one HTTP body per start
//! - **Push stream**: `startStream` / `streamData` / `streamEnd` over a
//!   shared Socket.IO link that is recovered with capped exponential backoff
//! - **Ledger**: every message is recorded once for search, grouping and
//!   export
//!
//! # Quick Start
//!
//! ```no_run
//! use dual_stream_session::{Result, SessionConfig, SessionManager, StreamKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SessionConfig::builder()
//!         .base_url("http://localhost:3000")
//!         .max_retries(3)
//!         .build()?;
//!
//!     let manager = SessionManager::new(config)?;
//!     manager.start_stream(StreamKind::Sse).await?;
//!     manager.start_stream(StreamKind::Socket).await?;
//!
//!     let mut state = manager.watch();
//!     while state.changed().await.is_ok() {
//!         println!("{}", manager.status(StreamKind::Sse));
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`session`] | [`SessionManager`] and its published state |
//! | [`transport`] | SSE and Socket.IO adapters |
//! | [`protocol`] | Wire formats of both transports |
//! | [`ledger`] | Deduplicated message store, filters, grouping, export |
//! | [`retry`] | Reconnect backoff policy |
//! | [`stats`] | Per-stream counters and message rate |
//! | [`config`] | Session configuration and builder |
//! | [`clock`] | Injectable time source |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Injectable wall-clock time.
pub mod clock;

/// Session configuration.
///
/// Use [`SessionConfig::builder()`] to create a validated configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for messages, handles and connections.
pub mod identifiers;

/// Message ledger.
pub mod ledger;

/// Wire formats.
///
/// Pull payload decoding and the Engine.IO / Socket.IO packet codec.
pub mod protocol;

/// Reconnect backoff.
pub mod retry;

/// Session manager.
pub mod session;

/// Stream statistics.
pub mod stats;

/// Transport adapters.
///
/// Both transports surface the same `Data` / `Error` / `Closed` events.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Session types
pub use session::{
    ConnectionStatus, ConnectivityState, SessionEvent, SessionManager, SessionSnapshot,
    SharedLedger, StatsReport, StreamSnapshot, TotalStats, TransportState,
};

// Configuration types
pub use config::{SessionConfig, SessionConfigBuilder};

// Transport types
pub use transport::{
    DuplexConnector, EventSourceConnector, PullConnector, SocketIoConnector, StreamFault,
    StreamKind, TransportEvent,
};

// Ledger types
pub use ledger::{
    GroupMode, LedgerExport, Message, MessageFilter, MessageGroup, MessageLedger, group_by,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, HandleId, MessageId, SessionId};

// Supporting types
pub use clock::{Clock, ManualClock, SystemClock};
pub use retry::RetryPolicy;
pub use stats::{StatsTracker, StreamStats};
