//! Wire formats of the two transports.
//!
//! # Protocol Overview
//!
//! | Transport | Direction | Format |
//! |-----------|-----------|--------|
//! | Pull (`GET /stream`) | Server → Client | SSE `data:` lines or bare JSON lines, `{text?, done?, error?}` |
//! | Duplex (Socket.IO) | Both | Engine.IO v4 text packets carrying Socket.IO v5 packets |
//!
//! # Duplex Events
//!
//! | Event | Direction | Payload |
//! |-------|-----------|---------|
//! | `startStream` | Client → Server | none |
//! | `stopStream` | Client → Server | none |
//! | `streamData` | Server → Client | `{text: string}` |
//! | `streamEnd` | Server → Client | none |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `pull` | Pull payload decoding |
//! | `socketio` | Engine.IO / Socket.IO packet codec |

// ============================================================================
// Submodules
// ============================================================================

/// Pull-stream payload decoding.
pub mod pull;

/// Engine.IO / Socket.IO text packet codec.
pub mod socketio;

// ============================================================================
// Re-exports
// ============================================================================

pub use pull::{PullFrame, PullPayload};
pub use socketio::{EnginePacket, OpenHandshake, SocketPacket};

// ============================================================================
// Event Names
// ============================================================================

/// Client request to begin streaming.
pub const START_STREAM_EVENT: &str = "startStream";

/// Client request to stop streaming.
pub const STOP_STREAM_EVENT: &str = "stopStream";

/// Server data chunk.
pub const STREAM_DATA_EVENT: &str = "streamData";

/// Server end-of-stream notice.
pub const STREAM_END_EVENT: &str = "streamEnd";
