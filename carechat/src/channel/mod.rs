//! Live channel manager.
//!
//! Owns the single authenticated streaming connection of a session and the
//! subscription filter that decides which inbound messages reach the
//! consumer. Concrete connections are produced by a [`Connector`]:
//! - [`ws::WsConnector`] - WebSocket connection to the relay
//! - [`loopback::LoopbackConnector`] - in-process connection for tests
//!
//! A background pump task reads the transport, normalizes each
//! `receive_message` event and evaluates it against the current
//! [`Subscription`]. Accepted messages are tagged with the generation of the
//! subscription that accepted them, so the consumer can drop anything that
//! was in flight when the subscription was replaced.

pub mod loopback;
pub mod ws;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use carechat_proto::conversation::ConversationKey;
use carechat_proto::event::{ClientEvent, ServerEvent};
use carechat_proto::message::{Message, OutboundMessage, Origin};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::session::Session;

/// Errors surfaced by the live channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The transport failed (I/O, TLS, protocol or a named `connect_error`).
    #[error("transport error: {0}")]
    Transport(String),

    /// The relay rejected the session token. Do not retry without a new token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// `send` was called without an active subscription.
    #[error("no active conversation subscription")]
    NotSubscribed,

    /// No open connection.
    #[error("channel is disconnected")]
    Disconnected,

    /// The connection was closed by the remote side.
    #[error("connection closed")]
    Closed,

    /// Connecting or authenticating took too long.
    #[error("channel operation timed out")]
    Timeout,

    /// The relay refused a send request. The connection stays open.
    #[error("send rejected: {0}")]
    Rejected(String),
}

impl ChannelError {
    /// Returns whether the connection is gone after this error.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        !matches!(self, Self::Rejected(_) | Self::NotSubscribed)
    }
}

/// A bidirectional stream of events with the relay.
pub trait StreamTransport: Send + Sync + 'static {
    /// Sends one event.
    fn send(&self, event: &ClientEvent)
    -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Waits for the next event from the relay.
    ///
    /// Returns [`ChannelError::Closed`] once the connection has ended.
    fn recv(&self) -> impl Future<Output = Result<ServerEvent, ChannelError>> + Send;

    /// Closes the connection. Idempotent.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Whether the connection is still up.
    fn is_connected(&self) -> bool;
}

/// Opens authenticated transports for a session.
pub trait Connector: Send + Sync + 'static {
    /// The transport produced by this connector.
    type Transport: StreamTransport;

    /// Opens a connection and completes connect-time authentication.
    fn connect(
        &self,
        session: &Session,
    ) -> impl Future<Output = Result<Self::Transport, ChannelError>> + Send;
}

/// The active filter: which conversation is accepted, under which generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Conversation whose messages are accepted.
    pub key: ConversationKey,
    /// Scope generation this subscription was installed for.
    pub generation: u64,
}

/// Items pushed from the pump task to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A message accepted by the subscription of `generation`.
    Live {
        /// Generation of the subscription that accepted the message.
        generation: u64,
        /// The normalized message.
        message: Message,
    },
    /// A recoverable channel failure, tagged with the connection it came from.
    Fault {
        /// Epoch of the connection that failed.
        connection: u64,
        /// The failure.
        error: ChannelError,
    },
}

/// Observable state of the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection.
    Disconnected,
    /// Connected without a subscription.
    Connected,
    /// Connected and accepting messages of one conversation.
    Subscribed(ConversationKey),
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connected => f.write_str("connected"),
            Self::Subscribed(key) => write!(f, "subscribed to {key}"),
        }
    }
}

/// Result of [`LiveChannel::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new connection was established.
    Opened,
    /// A live connection for the same session already existed and was kept.
    AlreadyOpen,
}

/// One open connection and the task pumping its events.
struct Connection<T> {
    session: Session,
    transport: Arc<T>,
    pump: JoinHandle<()>,
}

impl<T> Drop for Connection<T> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// The single streaming connection of a session and its subscription filter.
pub struct LiveChannel<C: Connector> {
    connector: C,
    connection: Option<Connection<C::Transport>>,
    filter: watch::Sender<Option<Subscription>>,
    inbound: mpsc::Sender<Inbound>,
    epoch: u64,
}

impl<C: Connector> LiveChannel<C> {
    /// Creates a disconnected channel.
    ///
    /// Returns the channel together with the receiving end of its inbound
    /// queue. `capacity` bounds how many accepted events may wait for the
    /// consumer before the pump applies backpressure.
    pub fn new(connector: C, capacity: usize) -> (Self, mpsc::Receiver<Inbound>) {
        let (inbound, rx) = mpsc::channel(capacity.max(1));
        let (filter, _) = watch::channel(None);
        (
            Self {
                connector,
                connection: None,
                filter,
                inbound,
                epoch: 0,
            },
            rx,
        )
    }

    /// Opens the session's connection.
    ///
    /// A no-op when a live connection for the same session is already open.
    /// A connection that belongs to another session, or that has dropped, is
    /// replaced. No retry is attempted on failure.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Unauthorized`] if the relay rejects the token,
    /// or another [`ChannelError`] if the connection cannot be established.
    pub async fn open(&mut self, session: &Session) -> Result<OpenOutcome, ChannelError> {
        if let Some(conn) = &self.connection {
            if conn.session == *session && conn.transport.is_connected() {
                tracing::debug!(participant = %session.owner().id, "channel already open");
                return Ok(OpenOutcome::AlreadyOpen);
            }
        }
        self.drop_connection().await;

        let transport = Arc::new(self.connector.connect(session).await?);
        self.epoch += 1;
        let pump = tokio::spawn(pump(
            Arc::clone(&transport),
            self.epoch,
            self.filter.subscribe(),
            self.inbound.clone(),
        ));
        tracing::info!(participant = %session.owner().id, connection = self.epoch, "live channel open");

        self.connection = Some(Connection {
            session: session.clone(),
            transport,
            pump,
        });
        Ok(OpenOutcome::Opened)
    }

    /// Atomically replaces the subscription filter.
    ///
    /// The filter is installed even when the channel is disconnected, so it
    /// applies as soon as the channel is reopened.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Disconnected`] if there is no live connection.
    pub fn subscribe(&self, key: ConversationKey, generation: u64) -> Result<(), ChannelError> {
        tracing::info!(conversation = %key, generation, "subscribing");
        self.filter.send_replace(Some(Subscription { key, generation }));
        if self.is_connected() {
            Ok(())
        } else {
            Err(ChannelError::Disconnected)
        }
    }

    /// Transmits a message. Returns once the event is handed to the transport.
    ///
    /// The message becomes visible only when the relay echoes it back.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotSubscribed`] without a subscription,
    /// [`ChannelError::Disconnected`] without a live connection, or the
    /// transport's error if the write fails.
    pub async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        if self.filter.borrow().is_none() {
            return Err(ChannelError::NotSubscribed);
        }
        let Some(conn) = self.connection.as_ref().filter(|c| c.transport.is_connected()) else {
            return Err(ChannelError::Disconnected);
        };
        conn.transport.send(&ClientEvent::from(message)).await?;
        tracing::debug!(receiver = %message.receiver_id, "send_message emitted");
        Ok(())
    }

    /// Closes the connection and clears the subscription.
    pub async fn close(&mut self) {
        self.filter.send_replace(None);
        self.drop_connection().await;
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        if !self.is_connected() {
            return ChannelState::Disconnected;
        }
        self.filter
            .borrow()
            .as_ref()
            .map_or(ChannelState::Connected, |s| {
                ChannelState::Subscribed(s.key.clone())
            })
    }

    /// Returns the current subscription, if any.
    #[must_use]
    pub fn subscription(&self) -> Option<Subscription> {
        self.filter.borrow().clone()
    }

    /// Epoch of the most recently opened connection.
    ///
    /// Incremented by every successful [`open`](Self::open); faults carry the
    /// epoch of the connection that produced them.
    #[must_use]
    pub const fn connection_epoch(&self) -> u64 {
        self.epoch
    }

    fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.transport.is_connected())
    }

    async fn drop_connection(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.pump.abort();
            conn.transport.close().await;
            tracing::info!(participant = %conn.session.owner().id, "live channel closed");
        }
    }
}

/// Reads the transport until it ends, forwarding accepted messages.
async fn pump<T: StreamTransport>(
    transport: Arc<T>,
    connection: u64,
    filter: watch::Receiver<Option<Subscription>>,
    inbound: mpsc::Sender<Inbound>,
) {
    let fault = move |error| Inbound::Fault { connection, error };
    loop {
        let event = match transport.recv().await {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "live channel lost");
                let _ = inbound.send(fault(e)).await;
                break;
            }
        };

        let item = match event {
            ServerEvent::ReceiveMessage(record) => {
                let message = match Message::from_record(record, Origin::Live) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping live event");
                        continue;
                    }
                };
                let Some(generation) = accepting_generation(&filter, &message) else {
                    tracing::debug!(
                        sender = %message.sender.id,
                        receiver = %message.receiver.id,
                        "live event outside active conversation"
                    );
                    continue;
                };
                Inbound::Live {
                    generation,
                    message,
                }
            }
            ServerEvent::Error { message } => {
                tracing::warn!(reason = %message, "relay rejected send");
                fault(ChannelError::Rejected(message))
            }
            ServerEvent::ConnectError { message } => {
                tracing::warn!(reason = %message, "relay connect_error");
                fault(ChannelError::Transport(message))
            }
            ServerEvent::Unauthorized { message } => {
                tracing::warn!(reason = %message, "relay revoked session");
                let _ = inbound
                    .send(fault(ChannelError::Unauthorized(message)))
                    .await;
                transport.close().await;
                break;
            }
            ServerEvent::Authenticated { .. } => {
                tracing::debug!("ignoring repeated authenticated event");
                continue;
            }
        };

        if inbound.send(item).await.is_err() {
            break;
        }
    }
}

/// Evaluates the current filter, returning the generation that accepts `message`.
fn accepting_generation(
    filter: &watch::Receiver<Option<Subscription>>,
    message: &Message,
) -> Option<u64> {
    filter
        .borrow()
        .as_ref()
        .filter(|s| message.belongs_to(&s.key))
        .map(|s| s.generation)
}
