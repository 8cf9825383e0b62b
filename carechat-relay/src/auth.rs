//! Participant directory and bearer-token authentication.

use std::collections::HashMap;

use carechat_proto::participant::{Participant, ParticipantId, Role};

/// A login known to the relay.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Account {
    /// Bearer token presented by the participant's sessions.
    pub token: String,
    /// Participant identifier.
    pub id: String,
    /// Participant role.
    pub role: Role,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// Known participants, addressable by token and by identifier.
#[derive(Debug, Default)]
pub struct Directory {
    by_token: HashMap<String, ParticipantId>,
    by_id: HashMap<ParticipantId, Participant>,
}

impl Directory {
    /// Builds a directory from configured accounts.
    ///
    /// Accounts with a blank token or identifier are skipped.
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        let mut directory = Self::default();
        for account in accounts {
            if account.token.is_empty() || account.id.trim().is_empty() {
                tracing::warn!(id = %account.id, "skipping account without token or id");
                continue;
            }
            let participant = Participant::new(account.id.trim(), account.role, account.name);
            directory
                .by_token
                .insert(account.token, participant.id.clone());
            directory.insert(participant);
        }
        directory
    }

    /// Adds a participant that can be addressed but cannot log in.
    pub fn insert(&mut self, participant: Participant) {
        self.by_id.insert(participant.id.clone(), participant);
    }

    /// Returns the participant owning `token`.
    #[must_use]
    pub fn authenticate(&self, token: &str) -> Option<&Participant> {
        self.by_token.get(token).and_then(|id| self.by_id.get(id))
    }

    /// Looks up a participant by identifier.
    #[must_use]
    pub fn lookup(&self, id: &ParticipantId) -> Option<&Participant> {
        self.by_id.get(id)
    }

    /// Number of known participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
