//! Display grouping of messages.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::Message;

/// How messages are grouped for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupMode {
    /// One group holding everything.
    #[default]
    None,
    /// One group per stream kind.
    ByKind,
    /// One group per calendar minute (UTC).
    ByMinute,
    /// One group per calendar hour (UTC).
    ByHour,
}

impl GroupMode {
    /// Label of the group `message` belongs to.
    #[must_use]
    pub fn label(self, message: &Message) -> String {
        match self {
            Self::None => "All Messages".to_string(),
            Self::ByKind => message.kind.to_string(),
            Self::ByMinute => message.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            Self::ByHour => message.timestamp.format("%Y-%m-%d %H:00").to_string(),
        }
    }
}

/// A labelled run of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageGroup {
    /// Group label.
    pub label: String,
    /// Members, in input order.
    pub messages: Vec<Message>,
    /// Number of members.
    pub count: usize,
}

/// Groups `messages` by `mode`.
///
/// Groups appear in the order their first member appears in the input,
/// and members keep input order. Empty input yields no groups.
#[must_use]
pub fn group_by(messages: &[Message], mode: GroupMode) -> Vec<MessageGroup> {
    let mut groups: Vec<MessageGroup> = Vec::new();
    let mut index: FxHashMap<String, usize> = FxHashMap::default();

    for message in messages {
        let label = mode.label(message);
        let slot = match index.get(&label) {
            Some(&slot) => slot,
            None => {
                index.insert(label.clone(), groups.len());
                groups.push(MessageGroup {
                    label,
                    messages: Vec::new(),
                    count: 0,
                });
                groups.len() - 1
            }
        };

        let group = &mut groups[slot];
        group.messages.push(message.clone());
        group.count += 1;
    }

    groups
}
