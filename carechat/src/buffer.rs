//! Reconciliation buffer: the single ordered sequence shown for a conversation.
//!
//! History seeds the buffer; accepted live messages are appended at the
//! tail. A live message whose [`DedupKey`] was already seen (overlap
//! between a history fetch and the stream, or a redelivery) is dropped.

use std::collections::{HashSet, VecDeque};

use carechat_proto::message::{DedupKey, Message};

/// Default number of keys remembered for duplicate detection.
pub const DEFAULT_MAX_DUPLICATE_TRACKING: usize = 10_000;

/// Result of offering a live message to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Appended at the tail.
    Appended,
    /// Already present; dropped.
    Duplicate,
}

/// Ordered, duplicate-free message sequence for the active conversation.
#[derive(Debug)]
pub struct ReconciliationBuffer {
    messages: Vec<Message>,
    seen: HashSet<DedupKey>,
    seen_order: VecDeque<DedupKey>,
    max_tracking: usize,
}

impl Default for ReconciliationBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DUPLICATE_TRACKING)
    }
}

impl ReconciliationBuffer {
    /// Creates an empty buffer remembering at most `max_tracking` keys.
    #[must_use]
    pub fn new(max_tracking: usize) -> Self {
        Self {
            messages: Vec::new(),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            max_tracking: max_tracking.max(1),
        }
    }

    /// Builds the merged sequence of `history` followed by `live`.
    pub fn merge(&mut self, history: Vec<Message>, live: impl IntoIterator<Item = Message>) {
        self.seed(history);
        for message in live {
            self.append_live(message);
        }
    }

    /// Replaces the contents with `history`, kept in server order.
    pub fn seed(&mut self, history: Vec<Message>) {
        self.clear();
        for message in &history {
            self.remember(message.dedup_key());
        }
        self.messages = history;
    }

    /// Appends a live message unless it was already seen.
    pub fn append_live(&mut self, message: Message) -> MergeOutcome {
        let key = message.dedup_key();
        if self.seen.contains(&key) {
            tracing::debug!(sender = %message.sender.id, "duplicate live message dropped");
            return MergeOutcome::Duplicate;
        }
        self.remember(key);
        self.messages.push(message);
        MergeOutcome::Appended
    }

    /// Empties the buffer and forgets every key.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.seen.clear();
        self.seen_order.clear();
    }

    /// The current sequence.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages in the sequence.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the sequence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn remember(&mut self, key: DedupKey) {
        if !self.seen.insert(key.clone()) {
            return;
        }
        self.seen_order.push_back(key);
        while self.seen_order.len() > self.max_tracking {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }
}
