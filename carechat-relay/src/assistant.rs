//! Rule-based assistant participant.
//!
//! When a client messages the assistant, the relay answers on its behalf.
//! Escalation keywords take precedence over reply rules and produce an
//! escalation notice; otherwise the first matching rule wins, and the
//! default reply covers everything else. Matching is case-insensitive
//! substring search.

use carechat_proto::participant::{Participant, ParticipantId, Role};

/// One keyword → reply rule.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Rule {
    /// Keyword searched for in the incoming message.
    pub keyword: String,
    /// Reply sent when the keyword matches.
    pub reply: String,
}

/// `[assistant]` configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Participant identifier of the assistant.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Reply when nothing matches.
    pub default_reply: String,
    /// Keywords that escalate the conversation to a counselor.
    pub escalation_keywords: Vec<String>,
    /// Reply sent on escalation.
    pub escalation_reply: String,
    /// Reply rules, evaluated in order.
    pub rules: Vec<Rule>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            id: "assistant".to_string(),
            name: "Assistant".to_string(),
            default_reply: "Thanks for reaching out. Could you tell me a bit more?".to_string(),
            escalation_keywords: Vec::new(),
            escalation_reply:
                "Your message has been escalated to a counselor. They will contact you soon."
                    .to_string(),
            rules: Vec::new(),
        }
    }
}

/// A composed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    /// Reply text.
    pub body: String,
    /// Whether the message requires a counselor.
    pub escalate: bool,
}

/// The assistant participant and its reply rules.
#[derive(Debug, Clone)]
pub struct Assistant {
    participant: Participant,
    rules: Vec<Rule>,
    escalation_keywords: Vec<String>,
    default_reply: String,
    escalation_reply: String,
}

impl Assistant {
    /// Builds the assistant from configuration. Keywords are lowercased once here.
    #[must_use]
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            participant: Participant::new(config.id, Role::Assistant, config.name),
            rules: config
                .rules
                .into_iter()
                .filter(|r| !r.keyword.trim().is_empty())
                .map(|r| Rule {
                    keyword: r.keyword.to_lowercase(),
                    reply: r.reply,
                })
                .collect(),
            escalation_keywords: config
                .escalation_keywords
                .into_iter()
                .filter(|k| !k.trim().is_empty())
                .map(|k| k.to_lowercase())
                .collect(),
            default_reply: config.default_reply,
            escalation_reply: config.escalation_reply,
        }
    }

    /// The assistant's participant record.
    #[must_use]
    pub const fn participant(&self) -> &Participant {
        &self.participant
    }

    /// The assistant's identifier.
    #[must_use]
    pub const fn id(&self) -> &ParticipantId {
        &self.participant.id
    }

    /// Composes the reply to `body`.
    #[must_use]
    pub fn reply_to(&self, body: &str) -> AssistantReply {
        let text = body.to_lowercase();
        if self.escalation_keywords.iter().any(|k| text.contains(k.as_str())) {
            return AssistantReply {
                body: self.escalation_reply.clone(),
                escalate: true,
            };
        }
        let reply = self
            .rules
            .iter()
            .find(|r| text.contains(r.keyword.as_str()))
            .map_or_else(|| self.default_reply.clone(), |r| r.reply.clone());
        AssistantReply {
            body: reply,
            escalate: false,
        }
    }
}
