//! Relay server core: shared state, WebSocket handler, connection registry
//! and message routing.
//!
//! Every connection must authenticate with its first frame. After that the
//! relay accepts `send_message` requests, validates them, stores the
//! resulting record in the conversation history and delivers it as a
//! `receive_message` event to every connection of the receiver and of the
//! sender. Nothing is queued for participants who are offline; their next
//! history fetch covers it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use carechat_proto::codec;
use carechat_proto::conversation::ConversationKey;
use carechat_proto::event::{ClientEvent, ServerEvent};
use carechat_proto::message::{MessageId, MessageRecord, validate_body};
use carechat_proto::participant::{Participant, ParticipantId, Role};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use crate::assistant::Assistant;
use crate::auth::Directory;
use crate::store::ConversationStore;

/// Default maximum message body size in bytes (64 KB).
const DEFAULT_MAX_BODY_SIZE: usize = carechat_proto::message::MAX_MESSAGE_SIZE;

/// How long a new connection may take to send `authenticate`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

type ConnectionMap = HashMap<ParticipantId, HashMap<u64, mpsc::UnboundedSender<Message>>>;

/// Shared relay state: live connections, directory, history and assistant.
pub struct RelayState {
    connections: RwLock<ConnectionMap>,
    next_connection: AtomicU64,
    /// Conversation history.
    pub store: ConversationStore,
    /// Known participants.
    pub directory: Directory,
    assistant: Option<Assistant>,
    max_body_size: usize,
}

impl RelayState {
    /// Creates a relay state with default limits and no assistant.
    #[must_use]
    pub fn new(directory: Directory) -> Self {
        Self::with_config(directory, ConversationStore::new(), None, DEFAULT_MAX_BODY_SIZE)
    }

    /// Creates a relay state with custom limits.
    ///
    /// The assistant, when given, is added to the directory so clients can
    /// address it.
    #[must_use]
    pub fn with_config(
        mut directory: Directory,
        store: ConversationStore,
        assistant: Option<Assistant>,
        max_body_size: usize,
    ) -> Self {
        if let Some(a) = &assistant {
            directory.insert(a.participant().clone());
        }
        Self {
            connections: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            store,
            directory,
            assistant,
            max_body_size,
        }
    }

    /// Registers a connection of `participant`, returning its connection id.
    pub async fn register(
        &self,
        participant: &ParticipantId,
        sender: mpsc::UnboundedSender<Message>,
    ) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let mut conns = self.connections.write().await;
        conns
            .entry(participant.clone())
            .or_default()
            .insert(id, sender);
        id
    }

    /// Removes one connection of `participant`.
    pub async fn unregister(&self, participant: &ParticipantId, connection: u64) {
        let mut conns = self.connections.write().await;
        if let Some(set) = conns.get_mut(participant) {
            set.remove(&connection);
            if set.is_empty() {
                conns.remove(participant);
            }
        }
    }

    /// Number of open connections of `participant`.
    pub async fn connection_count(&self, participant: &ParticipantId) -> usize {
        let conns = self.connections.read().await;
        conns.get(participant).map_or(0, HashMap::len)
    }

    /// Sends a Close frame to every open connection.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (participant, set) in conns.iter() {
            tracing::info!(participant = %participant, count = set.len(), "closing connections");
            for sender in set.values() {
                let _ = sender.send(Message::Close(None));
            }
        }
    }

    /// Delivers `event` to every connection of each participant in `to`.
    async fn deliver(&self, to: &[&ParticipantId], event: &ServerEvent) {
        let frame = match codec::encode(event) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode event");
                return;
            }
        };
        let conns = self.connections.read().await;
        for participant in to {
            let Some(set) = conns.get(*participant) else {
                tracing::debug!(participant = %participant, "participant offline");
                continue;
            };
            for sender in set.values() {
                let _ = sender.send(Message::Text(frame.clone().into()));
            }
        }
    }

    /// Stores a new message and delivers it to both members.
    async fn publish(&self, sender: &Participant, receiver: &Participant, body: String) {
        let record = MessageRecord {
            id: Some(MessageId::generate()),
            sender: sender.to_raw(),
            receiver: receiver.to_raw(),
            message: body,
            timestamp: chrono::Utc::now(),
        };
        let key = ConversationKey::between(sender, receiver);
        let len = self.store.append(key, record.clone()).await;
        tracing::debug!(
            from = %sender.id,
            to = %receiver.id,
            history_len = len,
            "message stored"
        );
        self.deliver(
            &[&receiver.id, &sender.id],
            &ServerEvent::ReceiveMessage(record),
        )
        .await;
    }
}

/// Handles an upgraded WebSocket connection.
///
/// 1. Wait for `authenticate` and resolve the token.
/// 2. Reply `authenticated` (or `unauthorized` and close).
/// 3. Register the connection and route `send_message` requests.
/// 4. On disconnect, unregister.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let token = match tokio::time::timeout(HANDSHAKE_TIMEOUT, wait_for_authenticate(&mut ws_receiver)).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            tracing::warn!("connection closed before authentication");
            return;
        }
        Err(_) => {
            tracing::warn!("authentication handshake timed out");
            let _ = send_event(
                &mut ws_sender,
                &ServerEvent::ConnectError {
                    message: "authentication timed out".to_string(),
                },
            )
            .await;
            let _ = ws_sender.close().await;
            return;
        }
    };

    let Some(participant) = state.directory.authenticate(&token).cloned() else {
        tracing::warn!("rejected unknown token");
        let _ = send_event(
            &mut ws_sender,
            &ServerEvent::Unauthorized {
                message: "invalid session token".to_string(),
            },
        )
        .await;
        let _ = ws_sender.close().await;
        return;
    };

    let ack = ServerEvent::Authenticated {
        participant: participant.to_raw(),
    };
    if let Err(e) = send_event(&mut ws_sender, &ack).await {
        tracing::warn!(participant = %participant.id, error = %e, "failed to acknowledge authentication");
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection = state.register(&participant.id, tx.clone()).await;
    tracing::info!(participant = %participant.id, role = %participant.role, connection, "participant connected");

    let writer_id = participant.id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(participant = %writer_id, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_participant = participant.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text(&reader_participant, text.as_str(), &reader_state, &tx).await;
                }
                Message::Close(_) => {
                    tracing::info!(participant = %reader_participant.id, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister(&participant.id, connection).await;
    tracing::info!(participant = %participant.id, connection, "participant disconnected");
}

/// Waits for the first event, which must be `authenticate`.
async fn wait_for_authenticate(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                return match codec::decode::<ClientEvent>(text.as_str()) {
                    Ok(ClientEvent::Authenticate { token }) => Some(token),
                    Ok(other) => {
                        tracing::warn!(event = ?other, "expected authenticate");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed handshake frame");
                        None
                    }
                };
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Handles one text frame from an authenticated participant.
async fn handle_text(
    participant: &Participant,
    text: &str,
    state: &RelayState,
    reply: &mpsc::UnboundedSender<Message>,
) {
    let event = match codec::decode::<ClientEvent>(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(participant = %participant.id, error = %e, "failed to decode frame");
            reject(reply, format!("malformed event: {e}"));
            return;
        }
    };

    match event {
        ClientEvent::SendMessage {
            receiver_id,
            receiver_role,
            message,
        } => {
            if let Err(reason) =
                route_send(participant, &receiver_id, receiver_role, message, state).await
            {
                tracing::warn!(participant = %participant.id, receiver = %receiver_id, %reason, "send rejected");
                reject(reply, reason);
            }
        }
        ClientEvent::Authenticate { .. } => {
            tracing::warn!(participant = %participant.id, "duplicate authenticate ignored");
        }
    }
}

/// Validates and publishes a send request. Returns the rejection reason on failure.
async fn route_send(
    sender: &Participant,
    receiver_id: &str,
    receiver_role: Role,
    body: String,
    state: &RelayState,
) -> Result<(), String> {
    if !sender.role.can_send() {
        return Err(format!("role {} cannot send messages", sender.role));
    }
    validate_body(&body, state.max_body_size).map_err(|e| e.to_string())?;

    let receiver_id = ParticipantId::new(receiver_id.trim());
    if receiver_id == sender.id {
        return Err("cannot send a message to yourself".to_string());
    }
    let receiver = state
        .directory
        .lookup(&receiver_id)
        .ok_or_else(|| format!("unknown receiver {receiver_id}"))?
        .clone();
    if receiver.role != receiver_role {
        return Err(format!(
            "receiver {receiver_id} is a {}, not a {receiver_role}",
            receiver.role
        ));
    }

    let assistant = state
        .assistant
        .as_ref()
        .filter(|a| a.id() == &receiver.id);
    let reply = assistant.map(|a| a.reply_to(&body));

    state.publish(sender, &receiver, body).await;

    if let (Some(assistant), Some(reply)) = (assistant, reply) {
        if reply.escalate {
            tracing::info!(participant = %sender.id, "assistant escalated conversation");
        }
        state
            .publish(assistant.participant(), sender, reply.body)
            .await;
    }
    Ok(())
}

fn reject(reply: &mpsc::UnboundedSender<Message>, message: String) {
    match codec::encode(&ServerEvent::Error { message }) {
        Ok(frame) => {
            let _ = reply.send(Message::Text(frame.into()));
        }
        Err(e) => tracing::error!(error = %e, "failed to encode error event"),
    }
}

async fn send_event(
    sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let frame = codec::encode(event).map_err(axum::Error::new)?;
    sender.send(Message::Text(frame.into())).await
}

/// Starts the relay with the given participants and default limits.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    directory: Directory,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new(directory))).await
}

/// Starts the relay with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route(
            "/chat/conversation",
            axum::routing::get(crate::history::conversation),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
