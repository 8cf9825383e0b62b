//! Message types: the wire record, the normalized message, and outbound sends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::ConversationKey;
use crate::participant::{IdentityError, Participant, ParticipantId, RawParticipant, Role};

/// Maximum allowed message body size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Server-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generates a new time-ordered identifier (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as carried by the history endpoint and `receive_message` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Server-assigned identifier, when the server provides one.
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Who sent the message.
    pub sender: RawParticipant,
    /// Who the message is addressed to.
    pub receiver: RawParticipant,
    /// Message text.
    pub message: String,
    /// When the server accepted the message.
    pub timestamp: DateTime<Utc>,
}

/// Where a message entered the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Fetched from the conversation history endpoint.
    Historical,
    /// Delivered over the streaming transport.
    Live,
}

/// An immutable, normalized chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned identifier, if any.
    pub id: Option<MessageId>,
    /// Sender.
    pub sender: Participant,
    /// Receiver.
    pub receiver: Participant,
    /// Message text.
    pub body: String,
    /// Ordering timestamp.
    pub sent_at: DateTime<Utc>,
    /// Whether this came from history or the live stream.
    pub origin: Origin,
}

/// Key used to recognize a message delivered more than once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// The server-assigned identifier.
    Id(MessageId),
    /// Natural identity when no identifier is available.
    Content {
        /// Sender identifier.
        sender: ParticipantId,
        /// Receiver identifier.
        receiver: ParticipantId,
        /// Timestamp.
        sent_at: DateTime<Utc>,
        /// Message text.
        body: String,
    },
}

impl Message {
    /// Normalizes a wire record, resolving both participants' identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MissingIdentifier`] if either participant
    /// record carries no identifier.
    pub fn from_record(record: MessageRecord, origin: Origin) -> Result<Self, IdentityError> {
        Ok(Self {
            id: record.id,
            sender: Participant::try_from(&record.sender)?,
            receiver: Participant::try_from(&record.receiver)?,
            body: record.message,
            sent_at: record.timestamp,
            origin,
        })
    }

    /// Converts back into the wire record.
    #[must_use]
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: self.id.clone(),
            sender: self.sender.to_raw(),
            receiver: self.receiver.to_raw(),
            message: self.body.clone(),
            timestamp: self.sent_at,
        }
    }

    /// Returns the conversation this message belongs to.
    #[must_use]
    pub fn conversation(&self) -> ConversationKey {
        ConversationKey::between(&self.sender, &self.receiver)
    }

    /// Returns whether this message belongs to `key`.
    #[must_use]
    pub fn belongs_to(&self, key: &ConversationKey) -> bool {
        key.matches(&self.sender.id, &self.receiver.id)
    }

    /// Returns the key used to detect repeated delivery.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        self.id.clone().map_or_else(
            || DedupKey::Content {
                sender: self.sender.id.clone(),
                receiver: self.receiver.id.clone(),
                sent_at: self.sent_at,
                body: self.body.clone(),
            },
            DedupKey::Id,
        )
    }
}

/// Validation errors for outbound message bodies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message body is empty or whitespace.
    #[error("message body is empty")]
    Empty,
    /// Message body exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the body in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Checks a message body against the emptiness and size limits.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank bodies and
/// [`ValidationError::TooLarge`] for bodies over `max` bytes.
pub fn validate_body(body: &str, max: usize) -> Result<(), ValidationError> {
    if body.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    if body.len() > max {
        return Err(ValidationError::TooLarge {
            size: body.len(),
            max,
        });
    }
    Ok(())
}

/// A message the local participant wants to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Receiver identifier.
    pub receiver_id: ParticipantId,
    /// Receiver role.
    pub receiver_role: Role,
    /// Message text, trimmed.
    pub body: String,
}

impl OutboundMessage {
    /// Builds an outbound message to `receiver`, trimming and validating the body.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the body is blank or too large.
    pub fn new(receiver: &Participant, body: &str) -> Result<Self, ValidationError> {
        let body = body.trim();
        validate_body(body, MAX_MESSAGE_SIZE)?;
        Ok(Self {
            receiver_id: receiver.id.clone(),
            receiver_role: receiver.role,
            body: body.to_string(),
        })
    }
}
