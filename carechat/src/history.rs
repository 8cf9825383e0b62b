//! History loader: fetches the persisted message set of one conversation.

use std::future::Future;
use std::time::Duration;

use carechat_proto::conversation::HistoryQuery;
use carechat_proto::message::{Message, MessageRecord, Origin};
use reqwest::StatusCode;

use crate::session::Session;

/// Path of the conversation history endpoint, relative to the base URL.
pub const HISTORY_PATH: &str = "/chat/conversation";

/// Errors that can occur while loading conversation history.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// The endpoint rejected the session token (HTTP 401).
    #[error("history request unauthorized")]
    Unauthorized,

    /// Network failure, timeout, or any non-success response.
    #[error("history unavailable: {0}")]
    Unavailable(String),
}

/// Source of conversation history.
///
/// Implementations perform one fetch per call and return messages in the
/// order the server delivered them.
pub trait HistoryLoader: Send + Sync + 'static {
    /// Loads the history of the conversation addressed by `query`.
    fn load(
        &self,
        query: &HistoryQuery,
        session: &Session,
    ) -> impl Future<Output = Result<Vec<Message>, HistoryError>> + Send;
}

/// [`HistoryLoader`] backed by the HTTP conversation endpoint.
#[derive(Debug, Clone)]
pub struct HttpHistoryLoader {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpHistoryLoader {
    /// Creates a loader for the service at `base_url` (e.g. `http://host:9000`).
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HistoryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}{HISTORY_PATH}", base_url.trim_end_matches('/')),
        })
    }

    /// The full endpoint URL this loader queries.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl HistoryLoader for HttpHistoryLoader {
    async fn load(
        &self,
        query: &HistoryQuery,
        session: &Session,
    ) -> Result<Vec<Message>, HistoryError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("userId", query.client_id.as_str()),
                ("therapistId", query.counselor_id.as_str()),
            ])
            .bearer_auth(session.token().expose())
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "history request failed");
                HistoryError::Unavailable(e.to_string())
            })?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(HistoryError::Unauthorized),
            status if !status.is_success() => {
                tracing::warn!(%status, "history endpoint returned error status");
                return Err(HistoryError::Unavailable(format!("HTTP {status}")));
            }
            _ => {}
        }

        let records: Vec<MessageRecord> = response
            .json()
            .await
            .map_err(|e| HistoryError::Unavailable(format!("malformed history payload: {e}")))?;

        Ok(normalize(records, Origin::Historical))
    }
}

/// Converts wire records into messages, skipping records without identifiers.
pub(crate) fn normalize(records: Vec<MessageRecord>, origin: Origin) -> Vec<Message> {
    records
        .into_iter()
        .filter_map(|record| match Message::from_record(record, origin) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(error = %e, "dropping history record");
                None
            }
        })
        .collect()
}
