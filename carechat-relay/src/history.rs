//! Conversation history endpoint: `GET /chat/conversation`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use carechat_proto::conversation::ConversationKey;
use carechat_proto::participant::{ParticipantId, Role};

use crate::relay::RelayState;

/// Query parameters: the client and counselor sides of the conversation.
#[derive(Debug, serde::Deserialize)]
pub struct ConversationParams {
    /// Client-side participant.
    #[serde(rename = "userId", alias = "clientId")]
    pub user_id: String,
    /// Counselor-side participant.
    #[serde(rename = "therapistId", alias = "counselorId")]
    pub therapist_id: String,
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Returns the conversation between the two participants.
///
/// 401 without a known bearer token, 403 when the requester is neither a
/// member of the conversation nor an admin observer.
pub async fn conversation(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    Query(params): Query<ConversationParams>,
) -> Response {
    let Some(requester) = bearer_token(&headers).and_then(|t| state.directory.authenticate(t))
    else {
        tracing::warn!("history request with missing or unknown token");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    };

    let key = ConversationKey::new(
        ParticipantId::new(params.user_id.trim()),
        ParticipantId::new(params.therapist_id.trim()),
    );
    if !key.contains(&requester.id) && requester.role != Role::AdminObserver {
        tracing::warn!(requester = %requester.id, conversation = %key, "history access denied");
        return (StatusCode::FORBIDDEN, "not a member of this conversation").into_response();
    }

    let records = state.store.conversation(&key).await;
    tracing::debug!(requester = %requester.id, conversation = %key, count = records.len(), "history served");
    Json(records).into_response()
}
