//! Conversation keys: the unordered pair of participants in a two-party chat.

use std::fmt;

use crate::participant::{Participant, ParticipantId, Role};

/// Identifies one two-party conversation.
///
/// The pair is stored sorted, so `ConversationKey::new(a, b)` and
/// `ConversationKey::new(b, a)` are equal and hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    low: ParticipantId,
    high: ParticipantId,
}

impl ConversationKey {
    /// Builds the key for the conversation between `a` and `b`.
    #[must_use]
    pub fn new(a: ParticipantId, b: ParticipantId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Builds the key for the conversation between two participants.
    #[must_use]
    pub fn between(a: &Participant, b: &Participant) -> Self {
        Self::new(a.id.clone(), b.id.clone())
    }

    /// Returns whether `{sender, receiver}` equals this key as a set.
    #[must_use]
    pub fn matches(&self, sender: &ParticipantId, receiver: &ParticipantId) -> bool {
        (sender == &self.low && receiver == &self.high)
            || (sender == &self.high && receiver == &self.low)
    }

    /// Returns whether `id` is one of the two members.
    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        id == &self.low || id == &self.high
    }

    /// Returns the other member, if `id` is a member.
    #[must_use]
    pub fn partner_of(&self, id: &ParticipantId) -> Option<&ParticipantId> {
        if id == &self.low {
            Some(&self.high)
        } else if id == &self.high {
            Some(&self.low)
        } else {
            None
        }
    }

    /// Returns both members in sorted order.
    #[must_use]
    pub const fn members(&self) -> (&ParticipantId, &ParticipantId) {
        (&self.low, &self.high)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

/// Parameters of a history request, in the endpoint's client/counselor shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Identifier of the client side of the conversation.
    pub client_id: ParticipantId,
    /// Identifier of the counselor (or assistant) side of the conversation.
    pub counselor_id: ParticipantId,
}

impl HistoryQuery {
    /// Assigns the two members to the endpoint's slots by role.
    ///
    /// Whichever member is a [`Role::Client`] fills the client slot. When
    /// neither or both are clients, `owner` fills it.
    #[must_use]
    pub fn for_pair(owner: &Participant, partner: &Participant) -> Self {
        if partner.role == Role::Client && owner.role != Role::Client {
            Self {
                client_id: partner.id.clone(),
                counselor_id: owner.id.clone(),
            }
        } else {
            Self {
                client_id: owner.id.clone(),
                counselor_id: partner.id.clone(),
            }
        }
    }

    /// Returns the conversation this query addresses.
    #[must_use]
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.client_id.clone(), self.counselor_id.clone())
    }
}
