//! Participant identity and the identity resolver.
//!
//! Upstream records expose a participant's identifier under either `id` or
//! `_id`. [`resolve`] picks one canonical value and [`Participant`] is the
//! normalized form used everywhere past the wire boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors produced while normalizing a participant record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// Neither identifier field carried a non-empty value.
    #[error("participant record has no identifier")]
    MissingIdentifier,
}

/// Canonical, opaque participant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Creates an identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The part a participant plays in a conversation.
///
/// Legacy role names (`user`, `therapist`, `bot`, `admin`) are accepted on
/// input and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A person seeking support.
    #[serde(alias = "user")]
    Client,
    /// A human counselor.
    #[serde(alias = "therapist")]
    Counselor,
    /// The automated assistant.
    #[serde(alias = "bot")]
    Assistant,
    /// An administrator who may read conversations but never send.
    #[serde(alias = "admin")]
    AdminObserver,
}

impl Role {
    /// Returns whether a participant with this role may send messages.
    #[must_use]
    pub const fn can_send(self) -> bool {
        !matches!(self, Self::AdminObserver)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Client => "client",
            Self::Counselor => "counselor",
            Self::Assistant => "assistant",
            Self::AdminObserver => "admin_observer",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" | "user" => Ok(Self::Client),
            "counselor" | "therapist" => Ok(Self::Counselor),
            "assistant" | "bot" => Ok(Self::Assistant),
            "admin_observer" | "admin-observer" | "admin" => Ok(Self::AdminObserver),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A participant record as it arrives from upstream data.
///
/// Either identifier field may be populated. Never use this type for
/// comparisons; convert it with [`Participant::try_from`] first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawParticipant {
    /// Primary identifier field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Document-store identifier field.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<String>,
    /// Participant role.
    pub role: Role,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Returns the canonical identifier of a participant record.
///
/// The first non-empty of `id` and `_id` wins; the other is ignored.
///
/// # Errors
///
/// Returns [`IdentityError::MissingIdentifier`] if neither field holds a
/// non-empty value.
pub fn resolve(raw: &RawParticipant) -> Result<ParticipantId, IdentityError> {
    [raw.id.as_deref(), raw.legacy_id.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(ParticipantId::new)
        .ok_or(IdentityError::MissingIdentifier)
}

/// A normalized participant with a single canonical identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Participant {
    /// Canonical identifier.
    pub id: ParticipantId,
    /// Participant role.
    pub role: Role,
    /// Display name (empty when unknown).
    pub display_name: String,
}

impl Participant {
    /// Creates a participant from already-canonical parts.
    pub fn new(id: impl Into<String>, role: Role, display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(id),
            role,
            display_name: display_name.into(),
        }
    }

    /// Converts back to the wire form, populating only the canonical `id` field.
    #[must_use]
    pub fn to_raw(&self) -> RawParticipant {
        RawParticipant {
            id: Some(self.id.as_str().to_string()),
            legacy_id: None,
            role: self.role,
            name: (!self.display_name.is_empty()).then(|| self.display_name.clone()),
        }
    }
}

impl TryFrom<&RawParticipant> for Participant {
    type Error = IdentityError;

    fn try_from(raw: &RawParticipant) -> Result<Self, Self::Error> {
        Ok(Self {
            id: resolve(raw)?,
            role: raw.role,
            display_name: raw.name.clone().unwrap_or_default(),
        })
    }
}

impl TryFrom<RawParticipant> for Participant {
    type Error = IdentityError;

    fn try_from(raw: RawParticipant) -> Result<Self, Self::Error> {
        Self::try_from(&raw)
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{} ({})", self.id, self.role)
        } else {
            write!(f, "{} ({})", self.display_name, self.role)
        }
    }
}
