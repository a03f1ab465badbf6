//! Stream transport adapters.
//!
//! Both transports are wrapped so that the session manager sees one
//! uniform event sequence per stream: `Data`, `Error`, `Closed`.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   GET /stream (SSE)       ┌──────────┐
//! │                  │◄──────────────────────────│          │
//! │  SessionManager  │                           │  Server  │
//! │                  │   Socket.IO / WebSocket   │          │
//! │                  │◄─────────────────────────►│          │
//! └──────────────────┘                           └──────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | `StreamKind`, `TransportEvent`, `StreamFault` |
//! | `sse` | Pull adapter and `PullConnector` |
//! | `duplex` | Shared duplex link and `DuplexConnector` |
//! | `socket` | Socket stream adapter over the duplex link |

// ============================================================================
// Submodules
// ============================================================================

/// Uniform transport events.
pub mod event;

/// Pull transport adapter.
pub mod sse;

/// Push-duplex link.
pub mod duplex;

/// Socket stream adapter.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use duplex::{
    DuplexConnector, DuplexLink, DuplexSender, LinkCommand, LinkEndpoint, LinkEvent,
    SocketIoConnector,
};
pub use event::{Payload, StreamFault, StreamKind, TransportEvent};
pub use socket::SocketStream;
pub use sse::{EventSourceConnector, EventStream, PullConnector, event_stream};
