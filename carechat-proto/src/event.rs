//! Streaming transport events.
//!
//! Every WebSocket text frame carries one event, adjacently tagged as
//! `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::message::{MessageRecord, OutboundMessage};
use crate::participant::{RawParticipant, Role};

/// Events sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Connect-time authentication. Must be the first frame on a connection.
    Authenticate {
        /// Bearer session token.
        token: String,
    },
    /// Request delivery of a message.
    SendMessage {
        /// Receiver identifier.
        #[serde(rename = "receiverId")]
        receiver_id: String,
        /// Receiver role.
        #[serde(rename = "receiverRole")]
        receiver_role: Role,
        /// Message text.
        message: String,
    },
}

impl From<&OutboundMessage> for ClientEvent {
    fn from(out: &OutboundMessage) -> Self {
        Self::SendMessage {
            receiver_id: out.receiver_id.as_str().to_string(),
            receiver_role: out.receiver_role,
            message: out.body.clone(),
        }
    }
}

/// Events sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Authentication succeeded; carries the session's participant.
    Authenticated {
        /// The authenticated participant.
        participant: RawParticipant,
    },
    /// Authentication failed. The relay closes the connection afterwards.
    Unauthorized {
        /// Human-readable cause.
        message: String,
    },
    /// A connection-level failure.
    ConnectError {
        /// Human-readable cause.
        message: String,
    },
    /// A message addressed to, or sent by, this participant.
    ReceiveMessage(MessageRecord),
    /// A send request was rejected. The connection stays open.
    Error {
        /// Human-readable cause.
        message: String,
    },
}
