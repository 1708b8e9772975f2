//! Binary protocol for room synchronization.
//!
//! Every WebSocket binary message carries one bincode-encoded [`Frame`]:
//! ```text
//! ┌───────────┬──────────────┬──────────────┬────────────┬──────────┐
//! │ event     │ nonce        │ user_id      │ compressed │ body     │
//! │ string    │ Option<u64>  │ Option<Uuid> │ bool       │ variable │
//! └───────────┴──────────────┴──────────────┴────────────┴──────────┘
//! ```
//!
//! `body` is the bincode encoding of the event's typed payload, LZ4
//! compressed when it exceeds [`COMPRESSION_THRESHOLD`] (room snapshots).
//! `nonce` correlates respondable requests with their `*_response`;
//! `user_id` is stamped by the relay on forwarded events.
//!
//! The event catalog is closed: [`RoomEvent`] has one variant per event
//! name. Frames naming an event outside the catalog decode to
//! [`Decoded::Unknown`] so that peers on newer protocol versions do not
//! break older ones.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use vizroom_core::{Color, EntityType, Pose, Quaternion, SerializedRoom, Transform, Vec3};

/// Bodies larger than this are LZ4 compressed.
pub const COMPRESSION_THRESHOLD: usize = 4096;

/// Wire names of every event in the catalog.
pub mod events {
    pub const JOIN: &str = "join";
    pub const SELF_CONNECTED: &str = "self_connected";
    pub const USER_CONNECTED: &str = "user_connected";
    pub const USER_DISCONNECTED: &str = "user_disconnected";
    pub const USER_POSITIONS: &str = "user_positions";
    pub const APP_OPENED: &str = "app_opened";
    pub const APP_CLOSED: &str = "app_closed";
    pub const OBJECT_MOVED: &str = "object_moved";
    pub const OBJECT_GRABBED: &str = "object_grabbed";
    pub const OBJECT_RELEASED: &str = "object_released";
    pub const COMPONENT_UPDATE: &str = "component_update";
    pub const TRANSPARENCY_UPDATE: &str = "transparency_update";
    pub const HIGHLIGHTING_UPDATE: &str = "highlighting_update";
    pub const ALL_HIGHLIGHTS_RESET: &str = "all_highlights_reset";
    pub const MENU_DETACHED: &str = "menu_detached";
    pub const DETACHED_MENU_CLOSED: &str = "detached_menu_closed";
    pub const SPECTATING_UPDATE: &str = "spectating_update";
    pub const PING_UPDATE: &str = "ping_update";
    pub const MOUSE_PING_UPDATE: &str = "mouse_ping_update";
    pub const TIMESTAMP_UPDATE: &str = "timestamp_update";
    pub const SYNC_ROOM_STATE: &str = "sync_room_state";
    pub const INITIAL_LANDSCAPE: &str = "initial_landscape";
    pub const OBJECT_GRABBED_RESPONSE: &str = "object_grabbed_response";
    pub const OBJECT_CLOSED_RESPONSE: &str = "object_closed_response";
    pub const MENU_DETACHED_RESPONSE: &str = "menu_detached_response";
}

// ───────────────────────────────────────────────────────────────────
// Payloads
// ───────────────────────────────────────────────────────────────────

/// First frame of a connection: redeems a lobby ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub ticket_id: String,
}

/// Public identity of a participant, as assigned by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub id: Uuid,
    pub name: String,
    pub color: Color,
    pub camera: Pose,
}

/// Handshake acknowledgement: own identity plus the current roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfConnected {
    pub own: ParticipantInfo,
    pub users: Vec<ParticipantInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDisconnected {
    pub id: Uuid,
}

/// Camera pose plus up to two controller poses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPositions {
    pub camera: Pose,
    pub controllers: [Option<Pose>; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppOpened {
    pub app_id: String,
    pub position: Vec3,
    pub quaternion: Quaternion,
    pub scale: Vec3,
}

impl AppOpened {
    pub fn new(app_id: impl Into<String>, world: &Transform) -> Self {
        Self {
            app_id: app_id.into(),
            position: world.position,
            quaternion: world.quaternion,
            scale: world.scale,
        }
    }

    pub fn transform(&self) -> Transform {
        Transform::new(self.position, self.quaternion, self.scale)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppClosed {
    pub app_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMoved {
    pub object_id: String,
    pub position: Vec3,
    pub quaternion: Quaternion,
    pub scale: Vec3,
}

impl ObjectMoved {
    pub fn new(object_id: impl Into<String>, world: &Transform) -> Self {
        Self {
            object_id: object_id.into(),
            position: world.position,
            quaternion: world.quaternion,
            scale: world.scale,
        }
    }

    pub fn transform(&self) -> Transform {
        Transform::new(self.position, self.quaternion, self.scale)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectGrabbed {
    pub object_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReleased {
    pub object_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentUpdate {
    pub app_id: String,
    pub component_id: String,
    pub is_opened: bool,
    pub is_foundation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransparencyUpdate {
    pub app_id: String,
    pub entity_ids: Vec<String>,
    pub is_transparent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightingUpdate {
    pub app_id: Option<String>,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub is_highlighted: bool,
}

impl HighlightingUpdate {
    pub fn entity(&self) -> vizroom_core::EntityReference {
        vizroom_core::EntityReference {
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            app_id: self.app_id.clone(),
        }
        .normalized()
    }
}

/// Detach request (`object_id: None`) or forwarded detach (id assigned by the relay).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuDetached {
    pub object_id: Option<String>,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub position: Vec3,
    pub quaternion: Quaternion,
    pub scale: Vec3,
}

impl MenuDetached {
    pub fn transform(&self) -> Transform {
        Transform::new(self.position, self.quaternion, self.scale)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedMenuClosed {
    pub menu_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectatingUpdate {
    pub is_spectating: bool,
    pub spectated_user_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingUpdate {
    pub controller_id: u8,
    pub is_pinging: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MousePingUpdate {
    pub model_id: String,
    pub is_application: bool,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampUpdate {
    /// Epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectGrabbedResponse {
    pub is_success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectClosedResponse {
    pub is_success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuDetachedResponse {
    pub object_id: String,
}

// ───────────────────────────────────────────────────────────────────
// Event catalog
// ───────────────────────────────────────────────────────────────────

/// One variant per event name in the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Join(JoinRoom),
    SelfConnected(SelfConnected),
    UserConnected(ParticipantInfo),
    UserDisconnected(UserDisconnected),
    UserPositions(UserPositions),
    AppOpened(AppOpened),
    AppClosed(AppClosed),
    ObjectMoved(ObjectMoved),
    ObjectGrabbed(ObjectGrabbed),
    ObjectReleased(ObjectReleased),
    ComponentUpdate(ComponentUpdate),
    TransparencyUpdate(TransparencyUpdate),
    HighlightingUpdate(HighlightingUpdate),
    AllHighlightsReset,
    MenuDetached(MenuDetached),
    DetachedMenuClosed(DetachedMenuClosed),
    SpectatingUpdate(SpectatingUpdate),
    PingUpdate(PingUpdate),
    MousePingUpdate(MousePingUpdate),
    TimestampUpdate(TimestampUpdate),
    SyncRoomState(SerializedRoom),
    InitialLandscape(SerializedRoom),
    ObjectGrabbedResponse(ObjectGrabbedResponse),
    ObjectClosedResponse(ObjectClosedResponse),
    MenuDetachedResponse(MenuDetachedResponse),
}

/// Result of decoding a frame's event.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Known(RoomEvent),
    /// Event name outside the catalog; ignored by receivers.
    Unknown(String),
}

impl RoomEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            RoomEvent::Join(_) => events::JOIN,
            RoomEvent::SelfConnected(_) => events::SELF_CONNECTED,
            RoomEvent::UserConnected(_) => events::USER_CONNECTED,
            RoomEvent::UserDisconnected(_) => events::USER_DISCONNECTED,
            RoomEvent::UserPositions(_) => events::USER_POSITIONS,
            RoomEvent::AppOpened(_) => events::APP_OPENED,
            RoomEvent::AppClosed(_) => events::APP_CLOSED,
            RoomEvent::ObjectMoved(_) => events::OBJECT_MOVED,
            RoomEvent::ObjectGrabbed(_) => events::OBJECT_GRABBED,
            RoomEvent::ObjectReleased(_) => events::OBJECT_RELEASED,
            RoomEvent::ComponentUpdate(_) => events::COMPONENT_UPDATE,
            RoomEvent::TransparencyUpdate(_) => events::TRANSPARENCY_UPDATE,
            RoomEvent::HighlightingUpdate(_) => events::HIGHLIGHTING_UPDATE,
            RoomEvent::AllHighlightsReset => events::ALL_HIGHLIGHTS_RESET,
            RoomEvent::MenuDetached(_) => events::MENU_DETACHED,
            RoomEvent::DetachedMenuClosed(_) => events::DETACHED_MENU_CLOSED,
            RoomEvent::SpectatingUpdate(_) => events::SPECTATING_UPDATE,
            RoomEvent::PingUpdate(_) => events::PING_UPDATE,
            RoomEvent::MousePingUpdate(_) => events::MOUSE_PING_UPDATE,
            RoomEvent::TimestampUpdate(_) => events::TIMESTAMP_UPDATE,
            RoomEvent::SyncRoomState(_) => events::SYNC_ROOM_STATE,
            RoomEvent::InitialLandscape(_) => events::INITIAL_LANDSCAPE,
            RoomEvent::ObjectGrabbedResponse(_) => events::OBJECT_GRABBED_RESPONSE,
            RoomEvent::ObjectClosedResponse(_) => events::OBJECT_CLOSED_RESPONSE,
            RoomEvent::MenuDetachedResponse(_) => events::MENU_DETACHED_RESPONSE,
        }
    }

    /// Responses are routed by nonce instead of being dispatched.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            RoomEvent::ObjectGrabbedResponse(_)
                | RoomEvent::ObjectClosedResponse(_)
                | RoomEvent::MenuDetachedResponse(_)
        )
    }

    /// Superseded by the next event of the same kind; safe to shed under load.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RoomEvent::UserPositions(_) | RoomEvent::PingUpdate(_) | RoomEvent::MousePingUpdate(_)
        )
    }

    /// Encode the typed payload (without envelope).
    pub fn encode_body(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            RoomEvent::Join(p) => encode_payload(p),
            RoomEvent::SelfConnected(p) => encode_payload(p),
            RoomEvent::UserConnected(p) => encode_payload(p),
            RoomEvent::UserDisconnected(p) => encode_payload(p),
            RoomEvent::UserPositions(p) => encode_payload(p),
            RoomEvent::AppOpened(p) => encode_payload(p),
            RoomEvent::AppClosed(p) => encode_payload(p),
            RoomEvent::ObjectMoved(p) => encode_payload(p),
            RoomEvent::ObjectGrabbed(p) => encode_payload(p),
            RoomEvent::ObjectReleased(p) => encode_payload(p),
            RoomEvent::ComponentUpdate(p) => encode_payload(p),
            RoomEvent::TransparencyUpdate(p) => encode_payload(p),
            RoomEvent::HighlightingUpdate(p) => encode_payload(p),
            RoomEvent::AllHighlightsReset => Ok(Vec::new()),
            RoomEvent::MenuDetached(p) => encode_payload(p),
            RoomEvent::DetachedMenuClosed(p) => encode_payload(p),
            RoomEvent::SpectatingUpdate(p) => encode_payload(p),
            RoomEvent::PingUpdate(p) => encode_payload(p),
            RoomEvent::MousePingUpdate(p) => encode_payload(p),
            RoomEvent::TimestampUpdate(p) => encode_payload(p),
            RoomEvent::SyncRoomState(p) => encode_payload(p),
            RoomEvent::InitialLandscape(p) => encode_payload(p),
            RoomEvent::ObjectGrabbedResponse(p) => encode_payload(p),
            RoomEvent::ObjectClosedResponse(p) => encode_payload(p),
            RoomEvent::MenuDetachedResponse(p) => encode_payload(p),
        }
    }

    /// Decode a typed payload for the event called `name`.
    pub fn decode_body(name: &str, body: &[u8]) -> Result<Decoded, ProtocolError> {
        let decode_err = |e: ProtocolError| ProtocolError::MalformedPayload {
            event: name.to_string(),
            reason: e.to_string(),
        };
        let event = match name {
            events::JOIN => RoomEvent::Join(decode_payload(body).map_err(decode_err)?),
            events::SELF_CONNECTED => RoomEvent::SelfConnected(decode_payload(body).map_err(decode_err)?),
            events::USER_CONNECTED => RoomEvent::UserConnected(decode_payload(body).map_err(decode_err)?),
            events::USER_DISCONNECTED => RoomEvent::UserDisconnected(decode_payload(body).map_err(decode_err)?),
            events::USER_POSITIONS => RoomEvent::UserPositions(decode_payload(body).map_err(decode_err)?),
            events::APP_OPENED => RoomEvent::AppOpened(decode_payload(body).map_err(decode_err)?),
            events::APP_CLOSED => RoomEvent::AppClosed(decode_payload(body).map_err(decode_err)?),
            events::OBJECT_MOVED => RoomEvent::ObjectMoved(decode_payload(body).map_err(decode_err)?),
            events::OBJECT_GRABBED => RoomEvent::ObjectGrabbed(decode_payload(body).map_err(decode_err)?),
            events::OBJECT_RELEASED => RoomEvent::ObjectReleased(decode_payload(body).map_err(decode_err)?),
            events::COMPONENT_UPDATE => RoomEvent::ComponentUpdate(decode_payload(body).map_err(decode_err)?),
            events::TRANSPARENCY_UPDATE => RoomEvent::TransparencyUpdate(decode_payload(body).map_err(decode_err)?),
            events::HIGHLIGHTING_UPDATE => RoomEvent::HighlightingUpdate(decode_payload(body).map_err(decode_err)?),
            events::ALL_HIGHLIGHTS_RESET => RoomEvent::AllHighlightsReset,
            events::MENU_DETACHED => RoomEvent::MenuDetached(decode_payload(body).map_err(decode_err)?),
            events::DETACHED_MENU_CLOSED => RoomEvent::DetachedMenuClosed(decode_payload(body).map_err(decode_err)?),
            events::SPECTATING_UPDATE => RoomEvent::SpectatingUpdate(decode_payload(body).map_err(decode_err)?),
            events::PING_UPDATE => RoomEvent::PingUpdate(decode_payload(body).map_err(decode_err)?),
            events::MOUSE_PING_UPDATE => RoomEvent::MousePingUpdate(decode_payload(body).map_err(decode_err)?),
            events::TIMESTAMP_UPDATE => RoomEvent::TimestampUpdate(decode_payload(body).map_err(decode_err)?),
            events::SYNC_ROOM_STATE => RoomEvent::SyncRoomState(decode_payload(body).map_err(decode_err)?),
            events::INITIAL_LANDSCAPE => RoomEvent::InitialLandscape(decode_payload(body).map_err(decode_err)?),
            events::OBJECT_GRABBED_RESPONSE => {
                RoomEvent::ObjectGrabbedResponse(decode_payload(body).map_err(decode_err)?)
            }
            events::OBJECT_CLOSED_RESPONSE => {
                RoomEvent::ObjectClosedResponse(decode_payload(body).map_err(decode_err)?)
            }
            events::MENU_DETACHED_RESPONSE => {
                RoomEvent::MenuDetachedResponse(decode_payload(body).map_err(decode_err)?)
            }
            other => return Ok(Decoded::Unknown(other.to_string())),
        };
        Ok(Decoded::Known(event))
    }
}

fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(payload, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(value)
}

// ───────────────────────────────────────────────────────────────────
// Envelope
// ───────────────────────────────────────────────────────────────────

/// Top-level wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    pub nonce: Option<u64>,
    /// Originating participant, stamped by the relay.
    pub user_id: Option<Uuid>,
    pub compressed: bool,
    pub body: Vec<u8>,
}

impl Frame {
    /// Wrap an event, compressing large bodies.
    pub fn from_event(event: &RoomEvent, nonce: Option<u64>, user_id: Option<Uuid>) -> Result<Self, ProtocolError> {
        let raw = event.encode_body()?;
        let (compressed, body) = if raw.len() > COMPRESSION_THRESHOLD {
            (true, lz4_flex::compress_prepend_size(&raw))
        } else {
            (false, raw)
        };
        Ok(Self {
            event: event.name().to_string(),
            nonce,
            user_id,
            compressed,
            body,
        })
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_payload(self)
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode_payload(bytes)
    }

    /// Decode the carried event.
    pub fn decoded(&self) -> Result<Decoded, ProtocolError> {
        if self.compressed {
            let raw = lz4_flex::decompress_size_prepended(&self.body)
                .map_err(|e| ProtocolError::Decompression(e.to_string()))?;
            RoomEvent::decode_body(&self.event, &raw)
        } else {
            RoomEvent::decode_body(&self.event, &self.body)
        }
    }

    /// Re-stamp the originating participant (relay side).
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Encode an event straight to wire bytes.
pub fn encode_event(event: &RoomEvent, nonce: Option<u64>, user_id: Option<Uuid>) -> Result<Vec<u8>, ProtocolError> {
    Frame::from_event(event, nonce, user_id)?.encode()
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Malformed payload for event {event}: {reason}")]
    MalformedPayload { event: String, reason: String },
}
