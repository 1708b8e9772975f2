//! Rooms by id and the lobby tickets that admit participants to them.
//!
//! A ticket is issued by the lobby API, carries the joining user's name,
//! device and starting camera, and is redeemed exactly once by the `join`
//! frame of a WebSocket connection before `valid_until`.
//!
//! Rooms nobody is in are removed when their last participant leaves, or by
//! [`RoomRegistry::sweep`] once they have sat empty past the idle TTL.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use vizroom_core::{Pose, SerializedRoom};

use crate::lobby::{JoinLobbyPayload, LobbyJoinedRecord, RoomListRecord};
use crate::protocol::ProtocolError;
use crate::room::{RoomHandle, RoomSettings, RoomState};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Unknown room: {0}")]
    UnknownRoom(String),
    #[error("Room already exists: {0}")]
    DuplicateRoom(String),
    #[error("Room payload has no landscape token")]
    MissingLandscapeToken,
    #[error("Invalid lobby ticket")]
    InvalidTicket,
    #[error("Lobby ticket expired")]
    ExpiredTicket,
    #[error("Room is full: {0}")]
    RoomFull(String),
    #[error("Room closed: {0}")]
    RoomClosed(String),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// An issued, not yet redeemed admission to a room.
#[derive(Debug, Clone, PartialEq)]
pub struct LobbyTicket {
    pub ticket_id: String,
    pub room_id: String,
    pub user_name: String,
    pub device_id: String,
    pub camera: Pose,
    /// Epoch milliseconds.
    pub valid_until: i64,
}

impl LobbyTicket {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.valid_until
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Rooms left empty this long after creation are swept.
pub const DEFAULT_ROOM_IDLE_TTL: Duration = Duration::from_secs(300);

struct RoomEntry {
    handle: RoomHandle,
    created_at: Instant,
}

pub struct RoomRegistry {
    settings: RoomSettings,
    ticket_ttl: Duration,
    idle_ttl: Duration,
    rooms: RwLock<HashMap<String, RoomEntry>>,
    tickets: Mutex<HashMap<String, LobbyTicket>>,
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings, ticket_ttl: Duration) -> Self {
        Self {
            settings,
            ticket_ttl,
            idle_ttl: DEFAULT_ROOM_IDLE_TTL,
            rooms: RwLock::new(HashMap::new()),
            tickets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Create a room seeded with `initial`. A fresh id is generated when
    /// none is requested.
    pub async fn create_room(&self, room_id: Option<String>, initial: &SerializedRoom) -> Result<String, RegistryError> {
        if initial.landscape.landscape_token.trim().is_empty() {
            return Err(RegistryError::MissingLandscapeToken);
        }
        let room_id = room_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room_id) {
            return Err(RegistryError::DuplicateRoom(room_id));
        }
        let handle = RoomHandle::spawn(RoomState::new(room_id.clone(), initial, self.settings));
        rooms.insert(
            room_id.clone(),
            RoomEntry {
                handle,
                created_at: Instant::now(),
            },
        );
        log::info!(
            "Created room {room_id} for landscape {}",
            initial.landscape.landscape_token
        );
        Ok(room_id)
    }

    pub async fn room(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().await.get(room_id).map(|entry| entry.handle.clone())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Summaries of every room, ordered by id.
    pub async fn list_rooms(&self) -> Vec<RoomListRecord> {
        self.prune_tickets().await;
        let handles: Vec<RoomHandle> = self.rooms.read().await.values().map(|entry| entry.handle.clone()).collect();
        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.summary().await {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping room {}: {e}", handle.room_id()),
            }
        }
        records.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        records
    }

    /// Issue a one-shot ticket for `room_id`.
    pub async fn issue_ticket(&self, room_id: &str, payload: &JoinLobbyPayload) -> Result<LobbyJoinedRecord, RegistryError> {
        if !self.rooms.read().await.contains_key(room_id) {
            return Err(RegistryError::UnknownRoom(room_id.to_string()));
        }
        let now = now_ms();
        let ticket = LobbyTicket {
            ticket_id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            user_name: payload.user_name.clone(),
            device_id: payload.device_id.clone(),
            camera: payload.camera,
            valid_until: now + self.ticket_ttl.as_millis() as i64,
        };
        let record = LobbyJoinedRecord {
            room_id: ticket.room_id.clone(),
            ticket_id: ticket.ticket_id.clone(),
            valid_until: ticket.valid_until,
        };

        let mut tickets = self.tickets.lock().await;
        tickets.retain(|_, t| !t.is_expired(now));
        tickets.insert(ticket.ticket_id.clone(), ticket);
        log::debug!("Issued ticket for {} in room {room_id}", payload.user_name);
        Ok(record)
    }

    /// Consume a ticket and return the room it admits to.
    pub async fn redeem_ticket(&self, ticket_id: &str) -> Result<(RoomHandle, LobbyTicket), RegistryError> {
        let now = now_ms();
        let ticket = {
            let mut tickets = self.tickets.lock().await;
            let ticket = tickets.remove(ticket_id);
            tickets.retain(|_, t| !t.is_expired(now));
            ticket.ok_or(RegistryError::InvalidTicket)?
        };
        if ticket.is_expired(now) {
            return Err(RegistryError::ExpiredTicket);
        }
        let handle = self
            .room(&ticket.room_id)
            .await
            .ok_or_else(|| RegistryError::UnknownRoom(ticket.room_id.clone()))?;
        Ok((handle, ticket))
    }

    /// Total unredeemed tickets, expired ones included until pruned.
    pub async fn ticket_count(&self) -> usize {
        self.tickets.lock().await.len()
    }

    async fn prune_tickets(&self) -> usize {
        let now = now_ms();
        let mut tickets = self.tickets.lock().await;
        let before = tickets.len();
        tickets.retain(|_, t| !t.is_expired(now));
        before - tickets.len()
    }

    pub async fn outstanding_tickets(&self, room_id: &str) -> usize {
        let now = now_ms();
        self.tickets
            .lock()
            .await
            .values()
            .filter(|t| t.room_id == room_id && !t.is_expired(now))
            .count()
    }

    /// Drop a room with no participants and no outstanding tickets.
    pub async fn remove_if_empty(&self, room_id: &str) -> bool {
        if self.outstanding_tickets(room_id).await > 0 {
            return false;
        }
        let mut rooms = self.rooms.write().await;
        let Some(entry) = rooms.get(room_id) else {
            return false;
        };
        match entry.handle.summary().await {
            Ok(summary) if summary.size == 0 => {
                rooms.remove(room_id);
                log::info!("Removed empty room {room_id}");
                true
            }
            Ok(_) => false,
            Err(_) => {
                rooms.remove(room_id);
                true
            }
        }
    }

    /// Drop expired tickets, then every room that has been empty past the
    /// idle TTL. Returns the number of rooms removed.
    pub async fn sweep(&self) -> usize {
        let pruned = self.prune_tickets().await;
        if pruned > 0 {
            log::debug!("Pruned {pruned} expired tickets");
        }
        let candidates: Vec<String> = self
            .rooms
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.created_at.elapsed() >= self.idle_ttl)
            .map(|(room_id, _)| room_id.clone())
            .collect();

        let mut removed = 0;
        for room_id in candidates {
            if self.remove_if_empty(&room_id).await {
                removed += 1;
            }
        }
        removed
    }
}
