//! Message filter criteria.

use chrono::{DateTime, Utc};

use crate::transport::StreamKind;

use super::Message;

/// Criteria for selecting ledger messages.
///
/// The default filter matches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFilter {
    /// Case-insensitive substring the content must contain.
    pub search: String,
    /// Include SSE messages.
    pub show_sse: bool,
    /// Include Socket messages.
    pub show_socket: bool,
    /// Earliest timestamp, inclusive.
    pub since: Option<DateTime<Utc>>,
    /// Latest timestamp, inclusive.
    pub until: Option<DateTime<Utc>>,
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self {
            search: String::new(),
            show_sse: true,
            show_socket: true,
            since: None,
            until: None,
        }
    }
}

impl MessageFilter {
    /// Sets the search term.
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    /// Shows only messages of `kind`.
    #[must_use]
    pub fn only(mut self, kind: StreamKind) -> Self {
        self.show_sse = kind == StreamKind::Sse;
        self.show_socket = kind == StreamKind::Socket;
        self
    }

    /// Restricts to `[since, until]`.
    #[must_use]
    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// Returns `true` if `message` passes every criterion.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        self.matches_normalized(message, self.normalized_search().as_deref())
    }

    /// Lowercased search term, or `None` when empty.
    pub(crate) fn normalized_search(&self) -> Option<String> {
        (!self.search.is_empty()).then(|| self.search.to_lowercase())
    }

    pub(crate) fn matches_normalized(&self, message: &Message, search: Option<&str>) -> bool {
        let kind_shown = match message.kind {
            StreamKind::Sse => self.show_sse,
            StreamKind::Socket => self.show_socket,
        };
        if !kind_shown {
            return false;
        }

        if let Some(since) = self.since
            && message.timestamp < since
        {
            return false;
        }
        if let Some(until) = self.until
            && message.timestamp > until
        {
            return false;
        }

        search.is_none_or(|term| message.content.to_lowercase().contains(term))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::MessageId;

    fn message(kind: StreamKind, content: &str, secs: i64) -> Message {
        Message {
            id: MessageId::next(),
            kind,
            content: content.to_string(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(secs),
        }
    }

    #[test]
    fn test_default_matches_everything() {
        let filter = MessageFilter::default();
        assert!(filter.matches(&message(StreamKind::Sse, "x", 0)));
        assert!(filter.matches(&message(StreamKind::Socket, "y", 0)));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let filter = MessageFilter::default().with_search("HeLLo");
        assert!(filter.matches(&message(StreamKind::Sse, "say hello world", 0)));
        assert!(!filter.matches(&message(StreamKind::Sse, "goodbye", 0)));
    }

    #[test]
    fn test_only_kind() {
        let filter = MessageFilter::default().only(StreamKind::Socket);
        assert!(!filter.matches(&message(StreamKind::Sse, "x", 0)));
        assert!(filter.matches(&message(StreamKind::Socket, "x", 0)));
    }

    #[test]
    fn test_time_range_is_inclusive() {
        let start = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(10);
        let end = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(20);
        let filter = MessageFilter::default().between(start, end);

        assert!(!filter.matches(&message(StreamKind::Sse, "x", 9)));
        assert!(filter.matches(&message(StreamKind::Sse, "x", 10)));
        assert!(filter.matches(&message(StreamKind::Sse, "x", 20)));
        assert!(!filter.matches(&message(StreamKind::Sse, "x", 21)));
    }

    #[test]
    fn test_both_kinds_hidden_matches_nothing() {
        let filter = MessageFilter {
            show_sse: false,
            show_socket: false,
            ..MessageFilter::default()
        };
        assert!(!filter.matches(&message(StreamKind::Sse, "x", 0)));
    }
}
