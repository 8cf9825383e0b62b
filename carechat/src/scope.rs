//! Conversation scope switcher.
//!
//! [`ConversationScope`] is the single writer of the reconciliation buffer.
//! Selecting a partner bumps a generation counter, re-subscribes the live
//! channel, clears the buffer and starts a history load tagged with the new
//! generation. Results are applied in [`ConversationScope::next_update`]:
//! a history result or live message carrying an older generation is
//! discarded, live messages that arrive while history is loading are queued
//! and flushed right after the buffer is seeded.

use std::sync::Arc;

use carechat_proto::conversation::{ConversationKey, HistoryQuery};
use carechat_proto::message::{Message, OutboundMessage, ValidationError};
use carechat_proto::participant::{IdentityError, Participant, RawParticipant, Role};
use tokio::sync::mpsc;

use crate::buffer::{DEFAULT_MAX_DUPLICATE_TRACKING, MergeOutcome, ReconciliationBuffer};
use crate::channel::{ChannelError, ChannelState, Connector, Inbound, LiveChannel};
use crate::history::{HistoryError, HistoryLoader};
use crate::session::Session;

/// Errors returned by scope operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// A participant record could not be resolved.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// The live channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The outbound message was invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No partner is selected.
    #[error("no conversation partner selected")]
    NoPartner,

    /// The session's role may not send messages.
    #[error("role {0} cannot send messages")]
    SendNotPermitted(Role),
}

/// Tunables for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeConfig {
    /// Capacity of the channel's inbound queue.
    pub channel_capacity: usize,
    /// Number of message keys remembered for duplicate detection.
    pub max_duplicate_tracking: usize,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            max_duplicate_tracking: DEFAULT_MAX_DUPLICATE_TRACKING,
        }
    }
}

/// What the presentation layer should render for the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeStatus {
    /// No partner selected yet.
    Idle,
    /// History is being fetched; the buffer is empty.
    Loading,
    /// History loaded; live messages are being appended.
    Ready,
    /// History could not be loaded. The buffer stays empty until reselection.
    HistoryUnavailable(String),
    /// The session token was rejected. Re-authentication is required.
    Unauthorized,
}

/// One applied change, returned by [`ConversationScope::next_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeUpdate {
    /// History seeded the buffer (including any queued live messages).
    HistoryLoaded {
        /// Buffer length after seeding.
        len: usize,
    },
    /// The current history load failed.
    HistoryFailed(HistoryError),
    /// A history result for a superseded selection arrived and was dropped.
    StaleHistoryDiscarded {
        /// Generation of the dropped result.
        generation: u64,
    },
    /// A live message was appended. The view should scroll to the latest.
    Appended {
        /// Buffer length after the append.
        len: usize,
    },
    /// A live message was queued until history finishes loading.
    Queued,
    /// A live message repeated one already in the buffer.
    Duplicate,
    /// A live message accepted under a superseded subscription was dropped.
    StaleLiveDiscarded,
    /// A live message arrived while the scope could not show it.
    Ignored,
    /// The channel reported a failure. Live updates are paused until the
    /// channel is reopened.
    ChannelFault(ChannelError),
    /// The relay refused one send. The connection is unaffected.
    SendRejected(String),
    /// A fault from a connection that has since been replaced was dropped.
    StaleFaultDiscarded,
}

struct LoadOutcome {
    generation: u64,
    result: Result<Vec<Message>, HistoryError>,
}

/// Orchestrates identity, history, live channel and buffer for one session.
pub struct ConversationScope<C: Connector, L: HistoryLoader> {
    session: Session,
    channel: LiveChannel<C>,
    inbound: mpsc::Receiver<Inbound>,
    loader: Arc<L>,
    loads_tx: mpsc::UnboundedSender<LoadOutcome>,
    loads_rx: mpsc::UnboundedReceiver<LoadOutcome>,
    buffer: ReconciliationBuffer,
    generation: u64,
    partner: Option<Participant>,
    key: Option<ConversationKey>,
    status: ScopeStatus,
    pending: Vec<Message>,
    channel_fault: Option<ChannelError>,
}

impl<C: Connector, L: HistoryLoader> ConversationScope<C, L> {
    /// Creates an idle scope. Call [`connect`](Self::connect) to open the channel.
    pub fn new(session: Session, connector: C, loader: Arc<L>, config: ScopeConfig) -> Self {
        let (channel, inbound) = LiveChannel::new(connector, config.channel_capacity);
        let (loads_tx, loads_rx) = mpsc::unbounded_channel();
        Self {
            session,
            channel,
            inbound,
            loader,
            loads_tx,
            loads_rx,
            buffer: ReconciliationBuffer::new(config.max_duplicate_tracking),
            generation: 0,
            partner: None,
            key: None,
            status: ScopeStatus::Idle,
            pending: Vec::new(),
            channel_fault: None,
        }
    }

    /// Opens the session's live channel.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Channel`] if the channel cannot be opened.
    pub async fn connect(&mut self) -> Result<(), ScopeError> {
        match self.channel.open(&self.session).await {
            Ok(_) => {
                self.channel_fault = None;
                if let Some(key) = &self.key {
                    // Reinstalls the current filter on the fresh connection.
                    let _ = self.channel.subscribe(key.clone(), self.generation);
                }
                Ok(())
            }
            Err(e) => {
                if matches!(e, ChannelError::Unauthorized(_)) {
                    self.status = ScopeStatus::Unauthorized;
                }
                self.channel_fault = Some(e.clone());
                Err(e.into())
            }
        }
    }

    /// Switches the scope to `partner`.
    ///
    /// Resolves the partner's identity, invalidates everything belonging to
    /// the previous selection, re-subscribes the channel and starts loading
    /// history. Returns the new generation.
    ///
    /// A disconnected channel does not fail the switch: history still loads
    /// and the fault is kept for display.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Identity`] if the partner has no identifier.
    /// The current scope is left unchanged in that case.
    pub fn select_partner(&mut self, partner: &RawParticipant) -> Result<u64, ScopeError> {
        let partner = Participant::try_from(partner).inspect_err(|e| {
            tracing::warn!(error = %e, "cannot select partner");
        })?;
        let key = ConversationKey::between(self.session.owner(), &partner);

        self.generation += 1;
        let generation = self.generation;
        tracing::info!(partner = %partner.id, conversation = %key, generation, "selecting partner");

        if let Err(e) = self.channel.subscribe(key.clone(), generation) {
            tracing::warn!(error = %e, "subscribed while channel is down");
            self.channel_fault = Some(e);
        }
        self.buffer.clear();
        self.pending.clear();
        self.status = ScopeStatus::Loading;

        let query = HistoryQuery::for_pair(self.session.owner(), &partner);
        let loader = Arc::clone(&self.loader);
        let session = self.session.clone();
        let tx = self.loads_tx.clone();
        tokio::spawn(async move {
            let result = loader.load(&query, &session).await;
            let _ = tx.send(LoadOutcome { generation, result });
        });

        self.partner = Some(partner);
        self.key = Some(key);
        Ok(generation)
    }

    /// Waits for and applies the next history result or channel event.
    ///
    /// History results are applied before live events that are ready at the
    /// same time.
    pub async fn next_update(&mut self) -> ScopeUpdate {
        tokio::select! {
            biased;
            Some(outcome) = self.loads_rx.recv() => self.apply_load(outcome),
            inbound = self.inbound.recv() => match inbound {
                Some(item) => self.apply_inbound(item),
                None => ScopeUpdate::ChannelFault(ChannelError::Closed),
            },
        }
    }

    /// Sends `body` to the current partner.
    ///
    /// Nothing is added to the buffer; the message appears when the relay
    /// echoes it back.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::NoPartner`] without a selection,
    /// [`ScopeError::SendNotPermitted`] for read-only roles,
    /// [`ScopeError::Validation`] for blank or oversized bodies, or
    /// [`ScopeError::Channel`] if the channel cannot send.
    pub async fn send(&self, body: &str) -> Result<(), ScopeError> {
        let partner = self.partner.as_ref().ok_or(ScopeError::NoPartner)?;
        let role = self.session.owner().role;
        if !role.can_send() {
            return Err(ScopeError::SendNotPermitted(role));
        }
        let outbound = OutboundMessage::new(partner, body)?;
        self.channel.send(&outbound).await?;
        Ok(())
    }

    /// Reopens the channel and reselects the current partner.
    ///
    /// Returns the new generation when a partner was selected.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Channel`] if the channel cannot be reopened.
    pub async fn reconnect(&mut self) -> Result<Option<u64>, ScopeError> {
        tracing::info!(participant = %self.session.owner().id, "reconnecting");
        self.channel.close().await;
        self.connect().await?;
        match self.partner.as_ref().map(Participant::to_raw) {
            Some(raw) => self.select_partner(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Ends the session, closing the live channel.
    pub async fn end_session(mut self) {
        tracing::info!(participant = %self.session.owner().id, "ending session");
        self.channel.close().await;
    }

    /// The buffered sequence for the current conversation.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.buffer.messages()
    }

    /// Current status of the conversation view.
    #[must_use]
    pub const fn status(&self) -> &ScopeStatus {
        &self.status
    }

    /// Current state of the live channel.
    #[must_use]
    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Last channel fault, cleared by a successful (re)connect.
    #[must_use]
    pub const fn channel_fault(&self) -> Option<&ChannelError> {
        self.channel_fault.as_ref()
    }

    /// The selected partner.
    #[must_use]
    pub const fn partner(&self) -> Option<&Participant> {
        self.partner.as_ref()
    }

    /// The current conversation key.
    #[must_use]
    pub const fn conversation(&self) -> Option<&ConversationKey> {
        self.key.as_ref()
    }

    /// The current generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The session this scope belongs to.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    fn apply_load(&mut self, outcome: LoadOutcome) -> ScopeUpdate {
        if outcome.generation != self.generation {
            tracing::warn!(
                generation = outcome.generation,
                current = self.generation,
                "discarding stale history result"
            );
            return ScopeUpdate::StaleHistoryDiscarded {
                generation: outcome.generation,
            };
        }

        match outcome.result {
            Ok(history) => {
                let history = self.retain_current(history);
                self.buffer.seed(history);
                for message in std::mem::take(&mut self.pending) {
                    self.buffer.append_live(message);
                }
                self.status = ScopeStatus::Ready;
                tracing::info!(
                    generation = self.generation,
                    len = self.buffer.len(),
                    "history loaded"
                );
                ScopeUpdate::HistoryLoaded {
                    len: self.buffer.len(),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, generation = self.generation, "history load failed");
                self.buffer.clear();
                self.pending.clear();
                self.status = match &e {
                    HistoryError::Unauthorized => ScopeStatus::Unauthorized,
                    HistoryError::Unavailable(cause) => {
                        ScopeStatus::HistoryUnavailable(cause.clone())
                    }
                };
                ScopeUpdate::HistoryFailed(e)
            }
        }
    }

    fn apply_inbound(&mut self, inbound: Inbound) -> ScopeUpdate {
        match inbound {
            Inbound::Live {
                generation,
                message,
            } => {
                let current = self.key.as_ref().is_some_and(|k| message.belongs_to(k));
                if generation != self.generation || !current {
                    tracing::debug!(generation, current = self.generation, "stale live event");
                    return ScopeUpdate::StaleLiveDiscarded;
                }
                match self.status {
                    ScopeStatus::Loading => {
                        self.pending.push(message);
                        ScopeUpdate::Queued
                    }
                    ScopeStatus::Ready => match self.buffer.append_live(message) {
                        MergeOutcome::Appended => ScopeUpdate::Appended {
                            len: self.buffer.len(),
                        },
                        MergeOutcome::Duplicate => ScopeUpdate::Duplicate,
                    },
                    _ => ScopeUpdate::Ignored,
                }
            }
            Inbound::Fault { connection, error } => {
                let current = self.channel.connection_epoch();
                if connection != current {
                    tracing::debug!(connection, current, error = %error, "stale channel fault");
                    return ScopeUpdate::StaleFaultDiscarded;
                }
                if !error.is_connection_lost() {
                    tracing::warn!(error = %error, "send rejected by relay");
                    let reason = match error {
                        ChannelError::Rejected(reason) => reason,
                        other => other.to_string(),
                    };
                    return ScopeUpdate::SendRejected(reason);
                }
                if matches!(error, ChannelError::Unauthorized(_)) {
                    self.status = ScopeStatus::Unauthorized;
                }
                self.channel_fault = Some(error.clone());
                ScopeUpdate::ChannelFault(error)
            }
        }
    }

    /// Keeps only history belonging to the selected conversation.
    fn retain_current(&self, mut history: Vec<Message>) -> Vec<Message> {
        if let Some(key) = &self.key {
            let before = history.len();
            history.retain(|m| m.belongs_to(key));
            if history.len() != before {
                tracing::warn!(
                    dropped = before - history.len(),
                    "history contained messages from another conversation"
                );
            }
        }
        history
    }
}
