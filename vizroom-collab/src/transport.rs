//! WebSocket transport between a client and the relay.
//!
//! Provides:
//! - Connection lifecycle (connect with a lobby ticket, disconnect)
//! - Fire-and-forget events, silently dropped while not online
//! - Respondable requests correlated by a per-transport nonce
//! - A per-connection event channel; dropping the connection drops it
//!
//! ```text
//!  send / send_respondable
//!          │
//!          ▼
//!    outgoing mpsc ──▶ writer task ──▶ WebSocket ──▶ relay
//!                                                    │
//!  pending nonces ◀── *_response ◀── reader task ◀───┘
//!                                         │
//!                                         ▼
//!                            backlog ──▶ forwarder ──▶ TransportEvent mpsc
//! ```
//!
//! The reader never waits on the event channel, so responses keep resolving
//! while the owner is busy awaiting one. Transient events (poses, pings) are
//! shed once the backlog reaches `event_capacity`.
//!
//! Respondable calls resolve with the caller's offline fallback when the
//! transport is not online, or when the connection drops before a reply
//! arrives. Without `response_timeout` an unanswered request waits until
//! the connection closes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::presence::ConnectionStatus;
use crate::protocol::{encode_event, Decoded, Frame, JoinRoom, ProtocolError, RoomEvent};

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound on waiting for a `*_response`. `None` waits until disconnect.
    pub response_timeout: Option<Duration>,
    /// Outgoing frames buffered before `send` awaits.
    pub outbound_capacity: usize,
    /// Inbound events buffered for the owner; also the backlog limit for transient events.
    pub event_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            response_timeout: None,
            outbound_capacity: 256,
            event_capacity: 256,
        }
    }
}

/// Events delivered to the owner of a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A catalog event; `sender` is the originating participant, if any.
    Inbound {
        sender: Option<Uuid>,
        event: RoomEvent,
    },
    /// The connection is gone. Always the last event of a connection.
    SelfDisconnected { reason: String },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Already connected or connecting")]
    AlreadyConnected,
    #[error("Connection closed")]
    Closed,
    #[error("Unexpected response event: {0}")]
    InvalidResponse(String),
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

struct PendingRequest {
    connection: u64,
    reply: oneshot::Sender<RoomEvent>,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;

pub struct Transport {
    config: TransportConfig,
    status: Arc<RwLock<ConnectionStatus>>,
    /// Monotonic for the whole lifetime of the transport.
    next_nonce: AtomicU64,
    /// Incremented per connection; stale reader tasks compare against it.
    connection: Arc<AtomicU64>,
    pending: PendingMap,
    outgoing_tx: Option<mpsc::Sender<Message>>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            status: Arc::new(RwLock::new(ConnectionStatus::Offline)),
            next_nonce: AtomicU64::new(1),
            connection: Arc::new(AtomicU64::new(0)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outgoing_tx: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(TransportConfig::default())
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Connect to the relay and redeem `join.ticket_id`.
    ///
    /// Returns the event receiver for this connection. The status becomes
    /// `Online` once the relay acknowledges with `self_connected`.
    pub async fn connect(
        &mut self,
        url: &str,
        join: JoinRoom,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        {
            let mut status = self.status.write().await;
            if *status != ConnectionStatus::Offline {
                return Err(TransportError::AlreadyConnected);
            }
            *status = ConnectionStatus::Connecting;
        }

        let ws_stream = match tokio_tungstenite::connect_async(url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.status.write().await = ConnectionStatus::Offline;
                log::error!("Failed to connect to {url}: {e}");
                return Err(TransportError::Connect(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let connection = self.connection.fetch_add(1, Ordering::SeqCst) + 1;

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(self.config.outbound_capacity);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || is_close {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let join_frame = encode_event(&RoomEvent::Join(join), None, None)?;
        out_tx
            .send(Message::Binary(join_frame.into()))
            .await
            .map_err(|_| TransportError::Closed)?;
        self.outgoing_tx = Some(out_tx);

        // Forwarder task: drain the backlog into the owner's channel
        let (event_tx, event_rx) = mpsc::channel(self.config.event_capacity);
        let (backlog_tx, mut backlog_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let backlog = Arc::new(AtomicUsize::new(0));
        {
            let backlog = backlog.clone();
            tokio::spawn(async move {
                while let Some(event) = backlog_rx.recv().await {
                    backlog.fetch_sub(1, Ordering::SeqCst);
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
        }

        // Reader task: route responses, queue everything else
        let shed_above = self.config.event_capacity;
        let status = self.status.clone();
        let pending = self.pending.clone();
        let current = self.connection.clone();
        tokio::spawn(async move {
            let reason = loop {
                match ws_reader.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        let frame = match Frame::decode(&data) {
                            Ok(frame) => frame,
                            Err(e) => {
                                log::warn!("Dropping undecodable frame: {e}");
                                continue;
                            }
                        };
                        let event = match frame.decoded() {
                            Ok(Decoded::Known(event)) => event,
                            Ok(Decoded::Unknown(name)) => {
                                log::debug!("Ignoring unknown event {name}");
                                continue;
                            }
                            Err(e) => {
                                log::warn!("Dropping malformed {} frame: {e}", frame.event);
                                continue;
                            }
                        };

                        if event.is_response() {
                            let Some(nonce) = frame.nonce else {
                                log::warn!("Response {} without nonce", event.name());
                                continue;
                            };
                            match pending.lock().await.remove(&nonce) {
                                Some(request) => {
                                    let _ = request.reply.send(event);
                                }
                                None => log::debug!("Response for unknown nonce {nonce}"),
                            }
                            continue;
                        }

                        if matches!(event, RoomEvent::SelfConnected(_))
                            && current.load(Ordering::SeqCst) == connection
                        {
                            *status.write().await = ConnectionStatus::Online;
                        }

                        if event.is_transient() && backlog.load(Ordering::SeqCst) >= shed_above {
                            log::trace!("Backlog full, shedding {}", event.name());
                            continue;
                        }
                        let inbound = TransportEvent::Inbound {
                            sender: frame.user_id,
                            event,
                        };
                        backlog.fetch_add(1, Ordering::SeqCst);
                        if backlog_tx.send(inbound).is_err() {
                            break "event receiver dropped".to_string();
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed".to_string());
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error: {e}");
                        break e.to_string();
                    }
                    None => break "stream ended".to_string(),
                    Some(Ok(_)) => {}
                }
            };

            if current.load(Ordering::SeqCst) == connection {
                *status.write().await = ConnectionStatus::Offline;
            }
            fail_pending(&pending, connection).await;
            log::info!("Disconnected: {reason}");
            backlog.fetch_add(1, Ordering::SeqCst);
            let _ = backlog_tx.send(TransportEvent::SelfDisconnected { reason });
        });

        Ok(event_rx)
    }

    /// Close the current connection. Pending requests resolve offline.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.outgoing_tx.take() {
            let _ = tx.send(Message::Close(None)).await;
        }
        *self.status.write().await = ConnectionStatus::Offline;
        fail_pending(&self.pending, self.connection.load(Ordering::SeqCst)).await;
    }

    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    pub async fn is_online(&self) -> bool {
        self.status().await == ConnectionStatus::Online
    }

    /// Fire-and-forget. Dropped without error while not online.
    pub async fn send(&self, event: RoomEvent) -> Result<(), TransportError> {
        if !self.is_online().await {
            log::trace!("Offline, dropping {}", event.name());
            return Ok(());
        }
        let encoded = encode_event(&event, None, None)?;
        self.push(encoded).await
    }

    /// Send a request and wait for the `*_response` carrying its nonce.
    ///
    /// `matcher` extracts the typed answer; a response of another kind is
    /// an [`TransportError::InvalidResponse`]. `offline` is returned when
    /// not online or when the connection drops before the reply.
    pub async fn send_respondable<T, F>(&self, event: RoomEvent, matcher: F, offline: T) -> Result<T, TransportError>
    where
        F: FnOnce(RoomEvent) -> Option<T>,
    {
        if !self.is_online().await {
            log::debug!("Offline, resolving {} with fallback", event.name());
            return Ok(offline);
        }

        let nonce = self.allocate_nonce();
        let encoded = encode_event(&event, Some(nonce), None)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(
            nonce,
            PendingRequest {
                connection: self.connection.load(Ordering::SeqCst),
                reply: reply_tx,
            },
        );

        if self.push(encoded).await.is_err() {
            self.pending.lock().await.remove(&nonce);
            return Ok(offline);
        }

        let reply = match self.config.response_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.lock().await.remove(&nonce);
                    log::warn!("{} (nonce {nonce}) timed out after {limit:?}", event.name());
                    return Err(TransportError::Timeout(limit));
                }
            },
            None => reply_rx.await,
        };

        match reply {
            Ok(response) => {
                let name = response.name();
                matcher(response).ok_or_else(|| TransportError::InvalidResponse(name.to_string()))
            }
            // Sender dropped: the connection went away
            Err(_) => Ok(offline),
        }
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_requests(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub(crate) fn allocate_nonce(&self) -> u64 {
        self.next_nonce.fetch_add(1, Ordering::SeqCst)
    }

    async fn push(&self, encoded: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.outgoing_tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(Message::Binary(encoded.into()))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Drop every pending request of `connection`; waiters see a closed channel.
async fn fail_pending(pending: &PendingMap, connection: u64) {
    let mut pending = pending.lock().await;
    let before = pending.len();
    pending.retain(|_, request| request.connection != connection);
    let failed = before - pending.len();
    if failed > 0 {
        log::debug!("Resolved {failed} pending requests with their offline fallback");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AppClosed, ObjectClosedResponse, ObjectGrabbed, ObjectGrabbedResponse};

    #[test]
    fn test_config_default_has_no_timeout() {
        let config = TransportConfig::default();
        assert!(config.response_timeout.is_none());
        assert_eq!(config.outbound_capacity, 256);
    }

    #[tokio::test]
    async fn test_initial_status_offline() {
        let transport = Transport::with_defaults();
        assert_eq!(transport.status().await, ConnectionStatus::Offline);
        assert_eq!(transport.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn test_send_offline_is_noop() {
        let transport = Transport::with_defaults();
        transport.send(RoomEvent::AllHighlightsReset).await.unwrap();
    }

    #[tokio::test]
    async fn test_respondable_offline_returns_fallback() {
        let transport = Transport::with_defaults();
        let granted = transport
            .send_respondable(
                RoomEvent::ObjectGrabbed(ObjectGrabbed { object_id: "app".into() }),
                |r| match r {
                    RoomEvent::ObjectGrabbedResponse(ObjectGrabbedResponse { is_success }) => Some(is_success),
                    _ => None,
                },
                true,
            )
            .await
            .unwrap();
        assert!(granted);

        let closed = transport
            .send_respondable(
                RoomEvent::AppClosed(AppClosed { app_id: "app".into() }),
                |r| match r {
                    RoomEvent::ObjectClosedResponse(ObjectClosedResponse { is_success }) => Some(is_success),
                    _ => None,
                },
                false,
            )
            .await
            .unwrap();
        assert!(!closed);
        assert_eq!(transport.pending_requests().await, 0);
    }

    #[test]
    fn test_nonces_strictly_increase() {
        let transport = Transport::with_defaults();
        let nonces: Vec<u64> = (0..100).map(|_| transport.allocate_nonce()).collect();
        assert_eq!(nonces[0], 1);
        assert!(nonces.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test]
    async fn test_connect_failure_resets_status() {
        let mut transport = Transport::with_defaults();
        let result = transport
            .connect("ws://127.0.0.1:1", JoinRoom { ticket_id: "t".into() })
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(transport.status().await, ConnectionStatus::Offline);
    }
}
