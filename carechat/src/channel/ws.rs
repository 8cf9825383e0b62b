//! WebSocket transport to the relay.
//!
//! [`WsConnector::connect`] opens the socket, performs connect-time
//! authentication with the session token and spawns a background reader
//! that decodes each text frame into a [`ServerEvent`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use carechat_proto::codec;
use carechat_proto::event::{ClientEvent, ServerEvent};
use carechat_proto::participant::resolve;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{ChannelError, Connector, StreamTransport};
use crate::session::Session;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSender = futures_util::stream::SplitSink<WsStream, Message>;
type WsReader = futures_util::stream::SplitStream<WsStream>;

/// Default timeout for opening the WebSocket.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the `authenticated` reply.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens authenticated WebSocket connections to one relay URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
    auth_timeout: Duration,
    capacity: usize,
}

impl WsConnector {
    /// Creates a connector for `url` (e.g. `ws://127.0.0.1:9000/ws`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: CONNECT_TIMEOUT,
            auth_timeout: AUTH_TIMEOUT,
            capacity: 256,
        }
    }

    /// Overrides the connect and authentication timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, connect: Duration, auth: Duration) -> Self {
        self.connect_timeout = connect;
        self.auth_timeout = auth;
        self
    }

    /// Overrides the reader queue capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// The relay URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, session: &Session) -> Result<WsTransport, ChannelError> {
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| {
                tracing::warn!(url = %self.url, "relay connect timed out");
                ChannelError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = %self.url, error = %e, "relay connect failed");
                map_connect_error(e)
            })?;

        let (mut sender, mut reader) = stream.split();

        let hello = ClientEvent::Authenticate {
            token: session.token().expose().to_string(),
        };
        let frame = codec::encode(&hello).map_err(|e| ChannelError::Transport(e.to_string()))?;
        sender
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| ChannelError::Transport(format!("failed to send authenticate: {e}")))?;

        let reply = tokio::time::timeout(self.auth_timeout, reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = %self.url, "relay authentication timed out");
                ChannelError::Timeout
            })?;

        match reply {
            Some(Ok(Message::Text(text))) => match codec::decode::<ServerEvent>(text.as_str()) {
                Ok(ServerEvent::Authenticated { participant }) => {
                    let confirmed = resolve(&participant).ok();
                    if confirmed.as_ref() != Some(&session.owner().id) {
                        tracing::warn!(
                            expected = %session.owner().id,
                            confirmed = ?confirmed,
                            "relay authenticated a different participant"
                        );
                    }
                    tracing::info!(participant = %session.owner().id, url = %self.url, "authenticated with relay");
                }
                Ok(ServerEvent::Unauthorized { message }) => {
                    tracing::warn!(reason = %message, "relay rejected token");
                    return Err(ChannelError::Unauthorized(message));
                }
                Ok(ServerEvent::ConnectError { message }) => {
                    return Err(ChannelError::Transport(message));
                }
                Ok(other) => {
                    tracing::warn!(?other, "unexpected event during authentication");
                    return Err(ChannelError::Transport(
                        "unexpected event during authentication".to_string(),
                    ));
                }
                Err(e) => {
                    return Err(ChannelError::Transport(format!(
                        "malformed authentication reply: {e}"
                    )));
                }
            },
            Some(Ok(Message::Close(_))) | None => return Err(ChannelError::Closed),
            Some(Ok(_)) => {
                return Err(ChannelError::Transport(
                    "unexpected non-text frame during authentication".to_string(),
                ));
            }
            Some(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
        }

        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        let connected = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(reader_loop(reader, tx, Arc::clone(&connected)));

        Ok(WsTransport {
            sender: Mutex::new(sender),
            incoming: Mutex::new(rx),
            connected,
            reader,
        })
    }
}

/// An authenticated WebSocket connection to the relay.
pub struct WsTransport {
    sender: Mutex<WsSender>,
    incoming: Mutex<mpsc::Receiver<ServerEvent>>,
    connected: Arc<AtomicBool>,
    reader: tokio::task::JoinHandle<()>,
}

impl StreamTransport for WsTransport {
    async fn send(&self, event: &ClientEvent) -> Result<(), ChannelError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(ChannelError::Closed);
        }
        let frame = codec::encode(event).map_err(|e| ChannelError::Transport(e.to_string()))?;
        let mut sender = self.sender.lock().await;
        sender.send(Message::Text(frame.into())).await.map_err(|e| {
            tracing::warn!(error = %e, "relay send failed");
            self.connected.store(false, Ordering::Relaxed);
            ChannelError::Closed
        })
    }

    async fn recv(&self) -> Result<ServerEvent, ChannelError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(ChannelError::Closed)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        let mut sender = self.sender.lock().await;
        if let Err(e) = sender.close().await {
            tracing::debug!(error = %e, "error while closing relay socket");
        }
        self.reader.abort();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Decodes text frames until the socket closes. Malformed frames are skipped.
async fn reader_loop(mut reader: WsReader, tx: mpsc::Sender<ServerEvent>, connected: Arc<AtomicBool>) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match codec::decode::<ServerEvent>(text.as_str()) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "malformed relay frame, skipping"),
            },
            Ok(Message::Close(_)) => {
                tracing::info!("relay closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "relay read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::debug!("relay reader exiting");
}

fn map_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ChannelError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response) if response.status().as_u16() == 401 => {
            ChannelError::Unauthorized("relay refused the upgrade".to_string())
        }
        WsError::Http(response) => {
            ChannelError::Transport(format!("relay HTTP error: status {}", response.status()))
        }
        WsError::Tls(e) => ChannelError::Transport(format!("TLS error: {e}")),
        other => ChannelError::Transport(other.to_string()),
    }
}
