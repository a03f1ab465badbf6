//! Received-message ledger.
//!
//! The ledger keeps every distinct message seen by the session in arrival
//! order and answers display queries over them: filtering, grouping and
//! JSON export.
//!
//! Deduplication is by content. Two messages with identical text are
//! collapsed into the first one even if they arrived on different streams
//! or at different times.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use dual_stream_session::{MessageFilter, MessageLedger, StreamKind};
//!
//! let now = Utc::now();
//! let mut ledger = MessageLedger::new(now);
//!
//! assert!(ledger.append(StreamKind::Sse, "hello", now).is_some());
//! assert!(ledger.append(StreamKind::Socket, "hello", now).is_none());
//!
//! let visible = ledger.filter_with(&MessageFilter::default());
//! assert_eq!(visible.len(), 1);
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `filter` | `MessageFilter` criteria |
//! | `group` | `GroupMode` and `group_by` |
//! | `export` | JSON export document |

// ============================================================================
// Submodules
// ============================================================================

/// Filter criteria.
pub mod filter;

/// Display grouping.
pub mod group;

/// JSON export.
pub mod export;

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::trace;

use crate::identifiers::MessageId;
use crate::transport::StreamKind;

pub use export::{ExportedMessage, LedgerExport, SessionInfo};
pub use filter::MessageFilter;
pub use group::{GroupMode, MessageGroup, group_by};

// ============================================================================
// Message
// ============================================================================

/// One received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Monotonic identifier.
    pub id: MessageId,
    /// Stream the message arrived on.
    #[serde(rename = "type")]
    pub kind: StreamKind,
    /// Message text.
    pub content: String,
    /// Arrival time.
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// MessageLedger
// ============================================================================

/// Ordered, content-deduplicated message store.
#[derive(Debug, Clone)]
pub struct MessageLedger {
    messages: Vec<Message>,
    contents: FxHashSet<String>,
    session_start: DateTime<Utc>,
}

impl MessageLedger {
    /// Creates an empty ledger for a session starting at `session_start`.
    #[must_use]
    pub fn new(session_start: DateTime<Utc>) -> Self {
        Self {
            messages: Vec::new(),
            contents: FxHashSet::default(),
            session_start,
        }
    }

    /// Appends a message unless one with identical content is present.
    ///
    /// Returns the new id, or `None` if the content was a duplicate.
    pub fn append(
        &mut self,
        kind: StreamKind,
        content: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Option<MessageId> {
        let content = content.into();
        if self.contents.contains(&content) {
            trace!(%kind, "Duplicate message content ignored");
            return None;
        }

        let id = MessageId::next();
        self.contents.insert(content.clone());
        self.messages.push(Message {
            id,
            kind,
            content,
            timestamp: at,
        });
        Some(id)
    }

    /// Messages matching `predicate`, newest first.
    ///
    /// Messages with equal timestamps keep reverse arrival order.
    pub fn filter<F>(&self, predicate: F) -> Vec<Message>
    where
        F: Fn(&Message) -> bool,
    {
        let mut matched: Vec<Message> = self
            .messages
            .iter()
            .rev()
            .filter(|message| predicate(message))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched
    }

    /// Messages matching `filter`, newest first.
    #[must_use]
    pub fn filter_with(&self, filter: &MessageFilter) -> Vec<Message> {
        let search = filter.normalized_search();
        self.filter(|message| filter.matches_normalized(message, search.as_deref()))
    }

    /// Removes every message. The session start is kept.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.contents.clear();
    }

    /// All messages in arrival order.
    #[inline]
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of stored messages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if no message is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// When the session started.
    #[inline]
    #[must_use]
    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }
}

// ============================================================================
// Tests
// ============================================================================
