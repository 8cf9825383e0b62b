//! Session ownership.
//!
//! A [`Session`] is created at login from a bearer token and the owning
//! participant. The live channel is bound to exactly one session and is
//! torn down when the session ends.

use std::fmt;

use carechat_proto::participant::Participant;

/// Bearer token presented to the history endpoint and the streaming relay.
///
/// `Debug` output is redacted so tokens never reach the log file.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for use in an `Authorization` header or handshake.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// An authenticated login: the token plus the participant it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    token: AuthToken,
    owner: Participant,
}

impl Session {
    /// Creates a session for `owner` authenticated by `token`.
    #[must_use]
    pub const fn new(token: AuthToken, owner: Participant) -> Self {
        Self { token, owner }
    }

    /// The session's bearer token.
    #[must_use]
    pub const fn token(&self) -> &AuthToken {
        &self.token
    }

    /// The participant who owns this session.
    #[must_use]
    pub const fn owner(&self) -> &Participant {
        &self.owner
    }
}
