//! Uniform events emitted by both transport adapters.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// StreamKind
// ============================================================================

/// Which transport a record or statistic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Server-Sent-Events pull stream.
    Sse,
    /// Socket.IO push stream.
    Socket,
}

impl StreamKind {
    /// Both kinds, SSE first.
    pub const ALL: [StreamKind; 2] = [StreamKind::Sse, StreamKind::Socket];

    /// Short lowercase tag, as used on the wire and in exports.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::Socket => "socket",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sse => f.write_str("SSE"),
            Self::Socket => f.write_str("Socket.io"),
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

/// One data chunk and the byte size it counts for in stats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Text content of the chunk.
    pub text: String,
    /// Size of the raw frame the chunk arrived in.
    pub size: u32,
}

impl Payload {
    /// Creates a payload whose size is measured from `raw`.
    ///
    /// Size is counted in UTF-16 code units, so characters outside the
    /// Basic Multilingual Plane count twice.
    #[must_use]
    pub fn measured(text: impl Into<String>, raw: &str) -> Self {
        Self {
            text: text.into(),
            size: utf16_len(raw),
        }
    }
}

/// Length of `text` in UTF-16 code units.
#[must_use]
pub fn utf16_len(text: &str) -> u32 {
    u32::try_from(text.encode_utf16().count()).unwrap_or(u32::MAX)
}

// ============================================================================
// StreamFault
// ============================================================================

/// Adapter-level failure, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFault {
    /// Connection-level failure; the handle is gone.
    Transport(String),
    /// One message could not be decoded; the stream continues.
    Parse(String),
    /// The server reported an error in-band.
    Remote(String),
}

impl StreamFault {
    /// Human-readable reason.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transport(message) | Self::Parse(message) | Self::Remote(message) => message,
        }
    }

    /// Returns `true` for per-message decode failures.
    #[inline]
    #[must_use]
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}

impl From<Error> for StreamFault {
    fn from(err: Error) -> Self {
        match err {
            Error::MessageParse { message } => Self::Parse(message),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl fmt::Display for StreamFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Event produced by a transport adapter.
///
/// Ordered within one adapter; unordered across adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A data chunk arrived.
    Data(Payload),
    /// Something went wrong.
    Error(StreamFault),
    /// The stream ended gracefully.
    Closed,
}

impl TransportEvent {
    /// Shorthand for a data event.
    #[must_use]
    pub fn data(text: impl Into<String>, size: u32) -> Self {
        Self::Data(Payload {
            text: text.into(),
            size,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
