//! Pull-stream payload decoding.
//!
//! Each event on `GET /stream` carries one JSON object:
//!
//! ```json
//! { "text": "chunk" }
//! { "done": true }
//! { "error": "upstream failed" }
//! ```
//!
//! An object with none of these fields is a keep-alive.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;

use crate::error::{Error, Result};

// ============================================================================
// PullPayload
// ============================================================================

/// Raw payload as sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PullPayload {
    /// Data chunk.
    #[serde(default)]
    pub text: Option<String>,

    /// Graceful end-of-stream marker.
    #[serde(default)]
    pub done: Option<bool>,

    /// Server-reported failure.
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// PullFrame
// ============================================================================

/// Interpreted pull payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullFrame {
    /// A data chunk.
    Text(String),
    /// The stream finished gracefully.
    Done,
    /// The server reported an error in-band.
    Failed(String),
    /// Nothing to deliver.
    KeepAlive,
}

impl PullFrame {
    /// Decodes one `data` field.
    ///
    /// `done` wins over `text`, `text` wins over `error`. Empty text is a
    /// keep-alive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageParse`] if `data` is not a JSON object of the
    /// expected shape.
    pub fn decode(data: &str) -> Result<Self> {
        let payload: PullPayload = serde_json::from_str(data)
            .map_err(|e| Error::message_parse(format!("parse failure: {e}")))?;

        Ok(Self::from(payload))
    }
}

impl From<PullPayload> for PullFrame {
    fn from(payload: PullPayload) -> Self {
        if payload.done == Some(true) {
            return Self::Done;
        }

        match (payload.text, payload.error) {
            (Some(text), _) if !text.is_empty() => Self::Text(text),
            (_, Some(error)) => Self::Failed(error),
            _ => Self::KeepAlive,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
