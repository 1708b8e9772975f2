//! Presence registry: who is in the room, and where they are looking.
//!
//! ## Connection status
//!
//! ```text
//!            begin_connect          handshake_ack
//!  Offline ───────────────▶ Connecting ───────────▶ Online
//!     ▲                         │                     │
//!     └─────────────────────────┴─────────────────────┘
//!                      disconnected / error
//! ```
//!
//! Remote participants are only ever created from `self_connected` (the
//! initial roster) and `user_connected`. Pose broadcasts update existing
//! participants and never create one. Colors come from the relay.

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use vizroom_core::{Color, Pose};

use crate::protocol::{ParticipantInfo, UserPositions};

// ───────────────────────────────────────────────────────────────────
// Types
// ───────────────────────────────────────────────────────────────────

/// Connection status of the local client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Offline,
    Connecting,
    Online,
}

/// A participant as seen by the local client.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: Uuid,
    pub display_name: String,
    /// Server-assigned; never generated locally.
    pub color: Color,
    pub camera: Pose,
    pub controllers: [Option<Pose>; 2],
    /// Participant this one is currently spectating.
    pub spectating: Option<Uuid>,
}

impl Participant {
    pub fn from_info(info: &ParticipantInfo) -> Self {
        Self {
            id: info.id,
            display_name: info.name.clone(),
            color: info.color,
            camera: info.camera,
            controllers: [None, None],
            spectating: None,
        }
    }

    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id,
            name: self.display_name.clone(),
            color: self.color,
            camera: self.camera,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PresenceError {
    #[error("Invalid connection status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
}

// ───────────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    status: ConnectionStatus,
    local: Option<Participant>,
    remote: HashMap<Uuid, Participant>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_online(&self) -> bool {
        self.status == ConnectionStatus::Online
    }

    /// `Offline → Connecting`.
    pub fn begin_connect(&mut self) -> Result<(), PresenceError> {
        if self.status != ConnectionStatus::Offline {
            return Err(PresenceError::InvalidTransition {
                from: self.status,
                to: ConnectionStatus::Connecting,
            });
        }
        self.status = ConnectionStatus::Connecting;
        Ok(())
    }

    /// `Connecting → Online`: adopt our identity and the initial roster.
    pub fn handshake_ack(&mut self, own: &ParticipantInfo, roster: &[ParticipantInfo]) -> Result<(), PresenceError> {
        if self.status != ConnectionStatus::Connecting {
            return Err(PresenceError::InvalidTransition {
                from: self.status,
                to: ConnectionStatus::Online,
            });
        }
        self.local = Some(Participant::from_info(own));
        self.remote = roster
            .iter()
            .filter(|p| p.id != own.id)
            .map(|p| (p.id, Participant::from_info(p)))
            .collect();
        self.status = ConnectionStatus::Online;
        log::info!(
            "Online as {} ({}) with {} remote participants",
            own.name,
            own.id,
            self.remote.len()
        );
        Ok(())
    }

    /// `* → Offline`. Returns the ids of the dropped remote participants.
    pub fn disconnected(&mut self) -> Vec<Uuid> {
        if self.status != ConnectionStatus::Offline {
            log::info!("Connection status {:?} -> Offline", self.status);
        }
        self.status = ConnectionStatus::Offline;
        self.local = None;
        self.remote.drain().map(|(id, _)| id).collect()
    }

    /// Add a remote participant. Our own id is never added.
    pub fn add(&mut self, info: &ParticipantInfo) -> bool {
        if self.local_id() == Some(info.id) {
            return false;
        }
        self.remote.insert(info.id, Participant::from_info(info)).is_none()
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Participant> {
        let removed = self.remote.remove(&id);
        for p in self.remote.values_mut() {
            if p.spectating == Some(id) {
                p.spectating = None;
            }
        }
        removed
    }

    /// Apply a pose broadcast. Unknown participants are ignored.
    pub fn update_positions(&mut self, id: Uuid, positions: &UserPositions) -> bool {
        match self.remote.get_mut(&id) {
            Some(p) => {
                p.camera = positions.camera;
                p.controllers = positions.controllers;
                true
            }
            None => {
                log::trace!("Pose update for unknown participant {id}");
                false
            }
        }
    }

    pub fn set_spectating(&mut self, id: Uuid, target: Option<Uuid>) -> bool {
        match self.remote.get_mut(&id) {
            Some(p) => {
                p.spectating = target;
                true
            }
            None => false,
        }
    }

    /// Remote participants currently spectating `target`.
    pub fn spectators_of(&self, target: Uuid) -> Vec<Uuid> {
        self.remote
            .values()
            .filter(|p| p.spectating == Some(target))
            .map(|p| p.id)
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<&Participant> {
        self.remote.get(&id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.remote.values()
    }

    pub fn len(&self) -> usize {
        self.remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remote.is_empty()
    }

    pub fn local(&self) -> Option<&Participant> {
        self.local.as_ref()
    }

    pub fn local_id(&self) -> Option<Uuid> {
        self.local.as_ref().map(|p| p.id)
    }

    pub fn local_color(&self) -> Option<Color> {
        self.local.as_ref().map(|p| p.color)
    }
}
