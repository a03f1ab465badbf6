//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Only the text encoding is supported; binary attachments are rejected.
//!
//! # Engine.IO Packets
//!
//! | Code | Packet | Payload |
//! |------|--------|---------|
//! | `0` | open | JSON handshake |
//! | `1` | close | none |
//! | `2` | ping | optional text |
//! | `3` | pong | optional text |
//! | `4` | message | Socket.IO packet |
//! | `5` | upgrade | none |
//! | `6` | noop | none |
//!
//! # Socket.IO Packets
//!
//! `<type>[<namespace>,][<ack id>][<json>]`
//!
//! ```text
//! 40                      CONNECT to "/"
//! 42["streamData",{...}]  EVENT
//! 44{"message":"denied"}  CONNECT_ERROR
//! 41                      DISCONNECT
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Namespace used when a packet names none.
pub const DEFAULT_NAMESPACE: &str = "/";

// ============================================================================
// OpenHandshake
// ============================================================================

/// Payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine.IO session id.
    pub sid: String,

    /// Server ping period in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,

    /// Grace period after a missed ping in milliseconds.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl OpenHandshake {
    /// Longest silence tolerated before the link is considered dead.
    #[inline]
    #[must_use]
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

// ============================================================================
// EnginePacket
// ============================================================================

/// A decoded Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Session handshake.
    Open(OpenHandshake),
    /// Transport close.
    Close,
    /// Server heartbeat.
    Ping(String),
    /// Heartbeat reply.
    Pong(String),
    /// Socket.IO packet.
    Message(SocketPacket),
    /// Transport upgrade.
    Upgrade,
    /// No-op.
    Noop,
}

impl EnginePacket {
    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for an empty frame, an unknown packet
    /// type or a malformed payload.
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let code = chars
            .next()
            .ok_or_else(|| Error::protocol("empty Engine.IO frame"))?;
        let rest = chars.as_str();

        match code {
            '0' => {
                let handshake = serde_json::from_str(rest)
                    .map_err(|e| Error::protocol(format!("invalid open handshake: {e}")))?;
                Ok(Self::Open(handshake))
            }
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(rest.to_string())),
            '3' => Ok(Self::Pong(rest.to_string())),
            '4' => SocketPacket::decode(rest).map(Self::Message),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(Error::protocol(format!(
                "unknown Engine.IO packet type '{other}'"
            ))),
        }
    }

    /// Encodes a client-side packet.
    ///
    /// `Open` is server-only and encodes as a bare `0`.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open(_) => "0".to_string(),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(packet) => format!("4{}", packet.encode()),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

// ============================================================================
// SocketPacket
// ============================================================================

/// A decoded Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace connect request (client) or acknowledgement (server).
    Connect {
        /// Target namespace.
        namespace: String,
        /// Auth payload or server handshake.
        data: Option<Value>,
    },

    /// Namespace disconnect.
    Disconnect {
        /// Target namespace.
        namespace: String,
    },

    /// Named event.
    Event {
        /// Target namespace.
        namespace: String,
        /// Acknowledgement id, if an ack is requested.
        id: Option<u64>,
        /// Event name.
        name: String,
        /// Event arguments.
        args: Vec<Value>,
    },

    /// Acknowledgement of an event.
    Ack {
        /// Target namespace.
        namespace: String,
        /// Acknowledged id.
        id: u64,
        /// Ack arguments.
        args: Vec<Value>,
    },

    /// Namespace connect refused.
    ConnectError {
        /// Target namespace.
        namespace: String,
        /// Refusal reason.
        message: String,
    },
}

impl SocketPacket {
    /// Connect to the default namespace.
    #[inline]
    #[must_use]
    pub fn connect() -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    /// Disconnect from the default namespace.
    #[inline]
    #[must_use]
    pub fn disconnect() -> Self {
        Self::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Event on the default namespace.
    #[must_use]
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            name: name.into(),
            args,
        }
    }

    /// Decodes the body of an Engine.IO `message` packet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for unknown or binary packet types and
    /// malformed JSON.
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let code = chars
            .next()
            .ok_or_else(|| Error::protocol("empty Socket.IO packet"))?;
        let rest = chars.as_str();

        if matches!(code, '5' | '6') {
            return Err(Error::protocol("binary Socket.IO packets are not supported"));
        }

        let (namespace, rest) = split_namespace(rest);
        let (id, body) = split_ack_id(rest);

        match code {
            '0' => Ok(Self::Connect {
                namespace,
                data: parse_optional_json(body)?,
            }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let mut args = parse_array(body)?;
                if args.is_empty() {
                    return Err(Error::protocol("event packet without a name"));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(Error::protocol(format!(
                            "event name must be a string, got {other}"
                        )));
                    }
                };
                Ok(Self::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            '3' => {
                let id = id.ok_or_else(|| Error::protocol("ack packet without an id"))?;
                Ok(Self::Ack {
                    namespace,
                    id,
                    args: parse_array(body)?,
                })
            }
            '4' => Ok(Self::ConnectError {
                namespace,
                message: connect_error_message(parse_optional_json(body)?),
            }),
            other => Err(Error::protocol(format!(
                "unknown Socket.IO packet type '{other}'"
            ))),
        }
    }

    /// Encodes the packet (without the Engine.IO `4` prefix).
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Connect { namespace, data } => {
                let mut out = format!("0{}", namespace_prefix(namespace));
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
                out
            }
            Self::Disconnect { namespace } => format!("1{}", namespace_prefix(namespace)),
            Self::Event {
                namespace,
                id,
                name,
                args,
            } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                format!(
                    "2{}{}{}",
                    namespace_prefix(namespace),
                    id.map(|id| id.to_string()).unwrap_or_default(),
                    Value::Array(array)
                )
            }
            Self::Ack {
                namespace,
                id,
                args,
            } => format!(
                "3{}{}{}",
                namespace_prefix(namespace),
                id,
                Value::Array(args.clone())
            ),
            Self::ConnectError { namespace, message } => format!(
                "4{}{}",
                namespace_prefix(namespace),
                serde_json::json!({ "message": message })
            ),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Splits `/ns,rest` into namespace and rest; defaults to `/`.
fn split_namespace(text: &str) -> (String, &str) {
    if text.starts_with('/')
        && let Some(comma) = text.find(',')
    {
        return (text[..comma].to_string(), &text[comma + 1..]);
    }
    if text.starts_with('/') {
        return (text.to_string(), "");
    }
    (DEFAULT_NAMESPACE.to_string(), text)
}

/// Splits leading ack id digits.
fn split_ack_id(text: &str) -> (Option<u64>, &str) {
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (None, text);
    }
    (text[..digits].parse().ok(), &text[digits..])
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        String::new()
    } else {
        format!("{namespace},")
    }
}

fn parse_optional_json(body: &str) -> Result<Option<Value>> {
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| Error::protocol(format!("invalid packet payload: {e}")))
}

fn parse_array(body: &str) -> Result<Vec<Value>> {
    match parse_optional_json(body)? {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(Error::protocol(format!(
            "expected JSON array payload, got {other}"
        ))),
        None => Ok(Vec::new()),
    }
}

/// Socket.IO v5 sends `{"message": ..}`, v4 a bare string.
fn connect_error_message(data: Option<Value>) -> String {
    match data {
        Some(Value::String(message)) => message,
        Some(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("connection refused")
            .to_string(),
        _ => "connection refused".to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
