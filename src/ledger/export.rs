//! JSON export of the ledger.
//!
//! ```text
//! {
//!   "timestamp": "2024-05-01T10:00:00.000Z",
//!   "sessionInfo": {
//!     "start": "...", "duration": "0h 5m 3s",
//!     "totalMessages": 12, "sseCount": 4, "socketCount": 3, "averageSize": 17
//!   },
//!   "messages": [{ "id": 7, "type": "sse", "content": "...", "timestamp": "..." }]
//! }
//! ```
//!
//! `totalMessages` counts the whole ledger; the per-kind counts, the
//! average and the message list cover only the filtered selection.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::identifiers::MessageId;
use crate::transport::StreamKind;

use super::{Message, MessageFilter, MessageLedger};

/// Export document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerExport {
    /// When the export was taken.
    pub timestamp: String,
    /// Session summary.
    pub session_info: SessionInfo,
    /// Filtered messages, newest first.
    pub messages: Vec<ExportedMessage>,
}

/// Session summary inside an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session start.
    pub start: String,
    /// Elapsed time as `"<h>h <m>m <s>s"`.
    pub duration: String,
    /// Messages in the ledger.
    pub total_messages: usize,
    /// Filtered SSE messages.
    pub sse_count: usize,
    /// Filtered Socket messages.
    pub socket_count: usize,
    /// Rounded mean content length of the filtered messages.
    pub average_size: usize,
}

/// One message inside an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedMessage {
    /// Message id.
    pub id: MessageId,
    /// Stream tag.
    #[serde(rename = "type")]
    pub kind: StreamKind,
    /// Message text.
    pub content: String,
    /// Arrival time.
    pub timestamp: String,
}

impl From<Message> for ExportedMessage {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            kind: message.kind,
            content: message.content,
            timestamp: iso8601(message.timestamp),
        }
    }
}

impl LedgerExport {
    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl MessageLedger {
    /// Builds an export of the messages selected by `filter`.
    #[must_use]
    pub fn export(&self, filter: &MessageFilter, now: DateTime<Utc>) -> LedgerExport {
        let selected = self.filter_with(filter);

        let sse_count = selected.iter().filter(|m| m.kind == StreamKind::Sse).count();
        let socket_count = selected.len() - sse_count;
        let total_units: usize = selected
            .iter()
            .map(|m| m.content.encode_utf16().count())
            .sum();
        let average_size = if selected.is_empty() {
            0
        } else {
            (total_units * 2 + selected.len()) / (selected.len() * 2)
        };

        LedgerExport {
            timestamp: iso8601(now),
            session_info: SessionInfo {
                start: iso8601(self.session_start()),
                duration: format_duration(self.session_start(), now),
                total_messages: self.len(),
                sse_count,
                socket_count,
                average_size,
            },
            messages: selected.into_iter().map(ExportedMessage::from).collect(),
        }
    }
}

/// ISO-8601 UTC with millisecond precision.
fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `"<h>h <m>m <s>s"` between `start` and `now`, floored to whole seconds.
fn format_duration(start: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(start).num_seconds().max(0);
    let minutes = seconds / 60;
    let hours = minutes / 60;
    format!("{hours}h {}m {}s", minutes % 60, seconds % 60)
}
