//! In-process connector for tests.
//!
//! Each [`LoopbackConnector::connect`] produces a [`LoopbackTransport`] and
//! a matching [`LoopbackRemote`] handle that plays the relay's side: it can
//! deliver server events, inspect what the client sent, and drop the
//! connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use carechat_proto::event::{ClientEvent, ServerEvent};
use tokio::sync::{Mutex, mpsc};

use super::{ChannelError, Connector, StreamTransport};
use crate::session::Session;

#[derive(Default)]
struct Shared {
    connects: usize,
    reject: Option<String>,
    latest: Option<LoopbackRemote>,
}

/// Connector producing in-process transports. Clones share state.
#[derive(Clone, Default)]
pub struct LoopbackConnector {
    shared: Arc<parking_lot::Mutex<Shared>>,
}

impl LoopbackConnector {
    /// Creates a connector that accepts every session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent connects fail with [`ChannelError::Unauthorized`].
    pub fn reject_with(&self, reason: impl Into<String>) {
        self.shared.lock().reject = Some(reason.into());
    }

    /// Lets subsequent connects succeed again.
    pub fn accept(&self) {
        self.shared.lock().reject = None;
    }

    /// Number of successful connects so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.shared.lock().connects
    }

    /// The relay side of the most recent connection.
    #[must_use]
    pub fn remote(&self) -> Option<LoopbackRemote> {
        self.shared.lock().latest.clone()
    }
}

impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn connect(&self, session: &Session) -> Result<LoopbackTransport, ChannelError> {
        let mut shared = self.shared.lock();
        if let Some(reason) = &shared.reject {
            return Err(ChannelError::Unauthorized(reason.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let connected = Arc::new(AtomicBool::new(true));
        shared.connects += 1;
        shared.latest = Some(LoopbackRemote {
            tx,
            sent: Arc::clone(&sent),
            connected: Arc::clone(&connected),
        });
        tracing::debug!(participant = %session.owner().id, "loopback connect");

        Ok(LoopbackTransport {
            incoming: Mutex::new(rx),
            sent,
            connected,
        })
    }
}

/// Client end of a loopback connection.
pub struct LoopbackTransport {
    /// `None` marks a remote-initiated disconnect.
    incoming: Mutex<mpsc::UnboundedReceiver<Option<ServerEvent>>>,
    sent: Arc<parking_lot::Mutex<Vec<ClientEvent>>>,
    connected: Arc<AtomicBool>,
}

impl StreamTransport for LoopbackTransport {
    async fn send(&self, event: &ClientEvent) -> Result<(), ChannelError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(ChannelError::Closed);
        }
        self.sent.lock().push(event.clone());
        Ok(())
    }

    async fn recv(&self) -> Result<ServerEvent, ChannelError> {
        let mut rx = self.incoming.lock().await;
        if let Some(Some(event)) = rx.recv().await {
            Ok(event)
        } else {
            self.connected.store(false, Ordering::Relaxed);
            Err(ChannelError::Closed)
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Relay end of a loopback connection.
#[derive(Clone)]
pub struct LoopbackRemote {
    tx: mpsc::UnboundedSender<Option<ServerEvent>>,
    sent: Arc<parking_lot::Mutex<Vec<ClientEvent>>>,
    connected: Arc<AtomicBool>,
}

impl LoopbackRemote {
    /// Pushes an event to the client.
    pub fn deliver(&self, event: ServerEvent) {
        let _ = self.tx.send(Some(event));
    }

    /// Drops the connection from the relay side.
    pub fn disconnect(&self) {
        let _ = self.tx.send(None);
    }

    /// Events the client has sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().clone()
    }

    /// Whether the client end is still connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
