//! Relay: WebSocket sync server plus the lobby API.
//!
//! Architecture:
//! ```text
//!            POST /room/{id}/lobby ──▶ ticket
//! Client A ──┐
//!            ├── join(ticket) ── RoomRegistry ── RoomHandle ── RoomActor
//! Client B ──┘                                                    │
//!                                                          BroadcastGroup
//!                                                     ┌───────────┼───────────┐
//!                                                     ▼           ▼           ▼
//!                                                  Client A    Client B    Client C
//! ```
//!
//! Each connection:
//! 1. waits for a `join` frame and redeems its lobby ticket,
//! 2. writes `self_connected` and `initial_landscape`,
//! 3. forwards inbound events to the room actor while writing replies
//!    (direct channel) and other participants' broadcasts to the socket,
//! 4. leaves the room on close, removing the room once it is empty.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::protocol::{Decoded, Frame, RoomEvent};
use crate::registry::RoomRegistry;
use crate::room::{RoomHandle, RoomSettings};

type WsSender = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsReceiver = SplitStream<WebSocketStream<TcpStream>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket sync endpoint
    pub ws_bind_addr: String,
    /// Lobby REST API
    pub http_bind_addr: String,
    pub max_participants_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Room actor command queue; also the per-connection reply queue
    pub command_capacity: usize,
    pub ticket_ttl_secs: u64,
    /// Rooms still empty this long after creation are removed
    pub room_idle_ttl_secs: u64,
    /// Let several participants highlight the same entity
    pub multi_highlight: bool,
    /// Reject lobby requests without a bearer token
    pub require_auth: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_bind_addr: "127.0.0.1:4444".to_string(),
            http_bind_addr: "127.0.0.1:8080".to_string(),
            max_participants_per_room: 64,
            broadcast_capacity: 256,
            command_capacity: 256,
            ticket_ttl_secs: 60,
            room_idle_ttl_secs: 300,
            multi_highlight: false,
            require_auth: false,
        }
    }
}

impl ServerConfig {
    /// How often the registry sweeps idle rooms and expired tickets.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs((self.room_idle_ttl_secs / 2).max(1))
    }

    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            max_participants: self.max_participants_per_room,
            multi_highlight: self.multi_highlight,
            broadcast_capacity: self.broadcast_capacity,
            command_capacity: self.command_capacity,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
    pub rejected_joins: u64,
    pub active_rooms: usize,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_frames: AtomicU64,
    total_bytes: AtomicU64,
    rejected_joins: AtomicU64,
}

/// The relay.
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    stats: Arc<AtomicServerStats>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(
            RoomRegistry::new(config.room_settings(), Duration::from_secs(config.ticket_ttl_secs))
                .with_idle_ttl(Duration::from_secs(config.room_idle_ttl_secs)),
        );
        Self {
            config,
            registry,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        self.registry.clone()
    }

    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            total_frames: self.stats.total_frames.load(Ordering::Relaxed),
            total_bytes: self.stats.total_bytes.load(Ordering::Relaxed),
            rejected_joins: self.stats.rejected_joins.load(Ordering::Relaxed),
            active_rooms: self.registry.room_count().await,
        }
    }

    /// Run the WebSocket endpoint and the lobby API until either fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        tokio::try_join!(self.run_sync(), self.run_lobby(), self.run_sweeper())?;
        Ok(())
    }

    /// Periodically reap idle rooms and expired tickets.
    async fn run_sweeper(&self) -> Result<(), BoxError> {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let removed = self.registry.sweep().await;
            if removed > 0 {
                log::info!("Swept {removed} idle rooms");
            }
        }
    }

    /// Serve the lobby API.
    pub async fn run_lobby(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.http_bind_addr).await?;
        log::info!("Lobby API listening on {}", self.config.http_bind_addr);
        let app = crate::api::router(self.registry.clone(), self.config.require_auth);
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Accept WebSocket connections.
    pub async fn run_sync(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.ws_bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.ws_bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let reply_capacity = self.config.command_capacity.max(1);

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats, reply_capacity).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        stats: Arc<AtomicServerStats>,
        reply_capacity: usize,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");
        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let result = Self::serve_participant(&mut ws_sender, &mut ws_receiver, addr, &registry, &stats, reply_capacity).await;

        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn serve_participant(
        ws_sender: &mut WsSender,
        ws_receiver: &mut WsReceiver,
        addr: SocketAddr,
        registry: &RoomRegistry,
        stats: &AtomicServerStats,
        reply_capacity: usize,
    ) -> Result<(), BoxError> {
        let Some(ticket_id) = Self::await_join(ws_receiver, addr).await else {
            return Ok(());
        };

        let (handle, ticket) = match registry.redeem_ticket(&ticket_id).await {
            Ok(admission) => admission,
            Err(e) => {
                log::warn!("Rejected join from {addr}: {e}");
                stats.rejected_joins.fetch_add(1, Ordering::Relaxed);
                Self::close(ws_sender, &e.to_string()).await;
                return Ok(());
            }
        };

        let (direct_tx, mut direct_rx) = mpsc::channel::<Vec<u8>>(reply_capacity);
        let accepted = match handle.join(ticket, direct_tx).await {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("Room {} refused {addr}: {e}", handle.room_id());
                stats.rejected_joins.fetch_add(1, Ordering::Relaxed);
                Self::close(ws_sender, &e.to_string()).await;
                return Ok(());
            }
        };
        let user_id = accepted.user_id;
        let mut broadcast_rx = accepted.broadcast_rx;

        let mut result = Ok(());
        for frame in accepted.initial_frames {
            if let Err(e) = ws_sender.send(Message::Binary(frame.into())).await {
                result = Err(e.into());
                break;
            }
        }
        if result.is_ok() {
            result = Self::pump(
                ws_sender,
                ws_receiver,
                &handle,
                user_id,
                &mut direct_rx,
                &mut broadcast_rx,
                stats,
            )
            .await;
        }

        // Cleanup
        match handle.leave(user_id).await {
            Ok(0) => {
                registry.remove_if_empty(handle.room_id()).await;
            }
            Ok(_) => {}
            Err(e) => log::warn!("Leave of {user_id} failed: {e}"),
        }
        log::info!("Connection closed from {addr}");
        result
    }

    /// Read frames until a `join` arrives. `None` when the socket closes first.
    async fn await_join(ws_receiver: &mut WsReceiver, addr: SocketAddr) -> Option<String> {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => match Frame::decode(&data).and_then(|f| f.decoded()) {
                    Ok(Decoded::Known(RoomEvent::Join(join))) => return Some(join.ticket_id),
                    Ok(other) => log::debug!("Ignoring {other:?} before join from {addr}"),
                    Err(e) => log::warn!("Malformed frame from {addr}: {e}"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => {
                    log::error!("WebSocket error from {addr}: {e}");
                    return None;
                }
            }
        }
        None
    }

    async fn close(ws_sender: &mut WsSender, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::Policy,
            reason: reason.to_string().into(),
        };
        let _ = ws_sender.send(Message::Close(Some(frame))).await;
    }

    async fn pump(
        ws_sender: &mut WsSender,
        ws_receiver: &mut WsReceiver,
        handle: &RoomHandle,
        user_id: Uuid,
        direct_rx: &mut mpsc::Receiver<Vec<u8>>,
        broadcast_rx: &mut broadcast::Receiver<Arc<crate::broadcast::RelayFrame>>,
        stats: &AtomicServerStats,
    ) -> Result<(), BoxError> {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            stats.total_frames.fetch_add(1, Ordering::Relaxed);
                            stats.total_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
                            let frame = match Frame::decode(&data) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    log::warn!("Malformed frame from {user_id}: {e}");
                                    continue;
                                }
                            };
                            match frame.decoded() {
                                Ok(Decoded::Known(event)) => {
                                    handle.send_event(user_id, frame.nonce, event).await?;
                                }
                                Ok(Decoded::Unknown(name)) => {
                                    log::debug!("Ignoring unknown event {name} from {user_id}");
                                }
                                Err(e) => log::warn!("Malformed {} from {user_id}: {e}", frame.event),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {user_id}: {e}");
                            break;
                        }
                        _ => {}
                    }
                }

                reply = direct_rx.recv() => {
                    match reply {
                        Some(bytes) => ws_sender.send(Message::Binary(bytes.into())).await?,
                        None => break,
                    }
                }

                relayed = broadcast_rx.recv() => {
                    match relayed {
                        Ok(frame) => {
                            // Don't echo back to sender
                            if frame.is_from(user_id) {
                                continue;
                            }
                            ws_sender.send(Message::Binary(frame.bytes.clone().into())).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Participant {user_id} lagged by {n} frames");
                            handle.report_lag(n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_and_partial_json() {
        let config: ServerConfig = serde_json::from_str(r#"{"wsBindAddr":"ignored","ticket_ttl_secs":5}"#).unwrap();
        assert_eq!(config.ticket_ttl_secs, 5);
        assert_eq!(config.ws_bind_addr, ServerConfig::default().ws_bind_addr);
        assert!(!config.require_auth);
    }

    #[test]
    fn test_room_settings_follow_config() {
        let config = ServerConfig {
            max_participants_per_room: 3,
            multi_highlight: true,
            ..ServerConfig::default()
        };
        let settings = config.room_settings();
        assert_eq!(settings.max_participants, 3);
        assert!(settings.multi_highlight);
    }

    #[test]
    fn test_sweep_interval_follows_idle_ttl() {
        let config = ServerConfig {
            room_idle_ttl_secs: 120,
            ..ServerConfig::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
        let eager = ServerConfig {
            room_idle_ttl_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(eager.sweep_interval(), Duration::from_secs(1));
        assert_eq!(SyncServer::new(config).registry().idle_ttl(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_stats_start_empty() {
        let server = SyncServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_rooms, 0);
    }
}
