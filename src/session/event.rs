//! Change notifications broadcast by the session manager.

use std::time::Duration;

use crate::transport::StreamKind;

use super::state::TransportState;

/// A change in session state.
///
/// Delivered through [`SessionManager::subscribe`](super::SessionManager::subscribe).
/// Slow subscribers may miss events; the latest full state is always
/// available from [`SessionManager::watch`](super::SessionManager::watch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A stream moved between lifecycle states.
    StateChanged {
        /// Stream.
        kind: StreamKind,
        /// Previous state.
        from: TransportState,
        /// New state.
        to: TransportState,
    },
    /// A data message was ingested.
    MessageReceived {
        /// Stream.
        kind: StreamKind,
        /// Message text.
        content: String,
        /// Size counted toward stats.
        size: u32,
    },
    /// The duplex link connected or disconnected.
    ConnectivityChanged {
        /// New connectivity.
        connected: bool,
    },
    /// The last error was set.
    ErrorRaised {
        /// Error text.
        message: String,
    },
    /// The last error was cleared.
    ErrorCleared,
    /// A reconnect attempt was scheduled.
    ReconnectScheduled {
        /// 1-based attempt number.
        attempt: u8,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Automatic reconnection gave up and both streams were stopped.
    RetriesExhausted {
        /// Attempts that were allowed.
        attempts: u8,
    },
    /// The combined message rate changed.
    RateSampled {
        /// Messages per second.
        rate: u32,
    },
}
