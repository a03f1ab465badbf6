//! Published session state.
//!
//! Everything here is a plain value: the actor builds a fresh
//! [`SessionSnapshot`] after every change and publishes it on a watch
//! channel. Derived values such as status strings and reports are
//! computed from a snapshot, never from live state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::stats::StreamStats;
use crate::transport::StreamKind;

// ============================================================================
// TransportState
// ============================================================================

/// Lifecycle of one logical stream.
///
/// `Idle → Connecting → Active → {Erroring → Connecting | Idle} → Closed → Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// Not running.
    #[default]
    Idle,
    /// Started, waiting for the first message.
    Connecting,
    /// Receiving messages.
    Active,
    /// Failed; waiting for the duplex link to recover.
    Erroring,
    /// Ended gracefully.
    Closed,
}

impl TransportState {
    /// Returns `true` for [`TransportState::Active`].
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Erroring => "erroring",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ConnectivityState
// ============================================================================

/// Duplex link connectivity, orthogonal to stream states.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    /// Namespace handshake completed and link not lost since.
    pub connected: bool,
    /// Automatic reconnect attempts since the last successful connect.
    pub reconnect_attempts: u8,
    /// Last error shown to the user, held until cleared or superseded.
    pub last_error: Option<String>,
}

// ============================================================================
// Snapshots
// ============================================================================

/// Published state of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamSnapshot {
    /// Lifecycle state.
    pub state: TransportState,
    /// Whether the user wants this stream running.
    pub desired: bool,
    /// Counters for the current session.
    pub stats: StreamStats,
    /// Text of the most recent message.
    pub last_message: Option<String>,
    /// All message text of the current session, concatenated.
    pub content: String,
}

/// Everything the session manager publishes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    /// Duplex connectivity.
    pub connectivity: ConnectivityState,
    /// Messages received on both streams since the last clear.
    pub message_count: u64,
    /// Combined messages per second over the rate window.
    pub message_rate: u32,
    /// Messages that failed to decode.
    pub parse_failures: u64,
    /// SSE stream.
    pub sse: StreamSnapshot,
    /// Socket stream.
    pub socket: StreamSnapshot,
}

impl SessionSnapshot {
    /// State of the `kind` stream.
    #[inline]
    #[must_use]
    pub fn stream(&self, kind: StreamKind) -> &StreamSnapshot {
        match kind {
            StreamKind::Sse => &self.sse,
            StreamKind::Socket => &self.socket,
        }
    }

    /// Display status of the `kind` stream at `now`.
    ///
    /// `"Active (<s>s, <n> msgs)"`, `"Connecting..."` or `"Inactive"`.
    #[must_use]
    pub fn status(&self, kind: StreamKind, now: DateTime<Utc>) -> String {
        let stream = self.stream(kind);
        match stream.state {
            TransportState::Active => {
                let seconds = now
                    .signed_duration_since(stream.stats.start_time)
                    .num_seconds()
                    .max(0);
                format!("Active ({seconds}s, {} msgs)", stream.stats.message_count)
            }
            TransportState::Connecting => "Connecting...".to_string(),
            TransportState::Idle | TransportState::Erroring | TransportState::Closed => {
                "Inactive".to_string()
            }
        }
    }

    /// Serializable statistics report.
    #[must_use]
    pub fn stats_report(&self) -> StatsReport {
        StatsReport {
            sse: self.sse.stats.clone(),
            socket: self.socket.stats.clone(),
            total: TotalStats {
                message_count: self.message_count,
                message_rate: self.message_rate,
                sse_active: self.sse.desired,
                socket_active: self.socket.desired,
                is_connected: self.connectivity.connected,
            },
        }
    }

    /// Serializable connection summary.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.connectivity.connected,
            sse_active: self.sse.desired,
            socket_active: self.socket.desired,
            reconnect_attempts: self.connectivity.reconnect_attempts,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Per-stream and combined statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    /// SSE counters.
    pub sse: StreamStats,
    /// Socket counters.
    pub socket: StreamStats,
    /// Combined values.
    pub total: TotalStats,
}

/// Combined values of a [`StatsReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalStats {
    /// Global message count.
    pub message_count: u64,
    /// Global message rate.
    pub message_rate: u32,
    /// SSE stream is running.
    pub sse_active: bool,
    /// Socket stream is running.
    pub socket_active: bool,
    /// Duplex link is connected.
    pub is_connected: bool,
}

/// Connection summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Duplex link is connected.
    pub connected: bool,
    /// SSE stream is running.
    pub sse_active: bool,
    /// Socket stream is running.
    pub socket_active: bool,
    /// Automatic reconnect attempts so far.
    pub reconnect_attempts: u8,
}

// ============================================================================
// Tests
// ============================================================================
