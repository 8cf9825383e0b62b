//! In-memory conversation history.
//!
//! [`ConversationStore`] keeps one append-only list per conversation, capped
//! at a configurable length; once over the cap the oldest record is evicted.

use std::collections::{HashMap, VecDeque};

use carechat_proto::conversation::ConversationKey;
use carechat_proto::message::MessageRecord;
use tokio::sync::RwLock;

/// Default maximum number of records kept per conversation.
pub const DEFAULT_MAX_HISTORY: usize = 10_000;

/// Per-conversation message history.
pub struct ConversationStore {
    conversations: RwLock<HashMap<ConversationKey, VecDeque<MessageRecord>>>,
    max_per_conversation: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Creates an empty store with the default cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    /// Creates an empty store keeping at most `max_per_conversation` records each.
    #[must_use]
    pub fn with_max_history(max_per_conversation: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_per_conversation: max_per_conversation.max(1),
        }
    }

    /// Appends a record, returning the conversation's new length.
    pub async fn append(&self, key: ConversationKey, record: MessageRecord) -> usize {
        let mut conversations = self.conversations.write().await;
        let history = conversations.entry(key).or_default();
        history.push_back(record);
        if history.len() > self.max_per_conversation {
            history.pop_front();
        }
        history.len()
    }

    /// Returns the conversation ordered by timestamp, insertion order breaking ties.
    pub async fn conversation(&self, key: &ConversationKey) -> Vec<MessageRecord> {
        let conversations = self.conversations.read().await;
        let mut records: Vec<MessageRecord> = conversations
            .get(key)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default();
        drop(conversations);
        records.sort_by_key(|r| r.timestamp);
        records
    }

    /// Number of records stored for `key`.
    pub async fn len(&self, key: &ConversationKey) -> usize {
        self.conversations.read().await.get(key).map_or(0, VecDeque::len)
    }
}
