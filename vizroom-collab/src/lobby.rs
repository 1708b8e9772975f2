//! Room lifecycle client: list rooms, create a room, join a room's lobby.
//!
//! Plain authenticated HTTP against the relay's lobby API. Responses are
//! decoded into typed records; a body that does not decode is
//! [`LobbyError::InvalidData`]. `create_room` validates the landscape token
//! locally and never sends a request without one.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vizroom_core::{Pose, SerializedRoom};

// ───────────────────────────────────────────────────────────────────
// Records
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomListRecord {
    pub room_id: String,
    pub room_name: String,
    pub landscape_token: String,
    pub size: usize,
}

/// Body of `POST /room`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomPayload {
    /// Requested id; the relay generates one when absent.
    #[serde(default)]
    pub room_id: Option<String>,
    pub room: SerializedRoom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreatedRecord {
    pub room_id: String,
}

/// Body of `POST /room/{id}/lobby`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinLobbyPayload {
    pub user_name: String,
    pub device_id: String,
    pub camera: Pose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyJoinedRecord {
    pub room_id: String,
    /// Redeemed once with the `join` event.
    pub ticket_id: String,
    /// Epoch milliseconds after which the ticket is rejected.
    pub valid_until: i64,
}

#[derive(Error, Debug)]
pub enum LobbyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Lobby API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid data from lobby API: {0}")]
    InvalidData(String),
    #[error("Room payload has no landscape token")]
    MissingLandscapeToken,
}

// ───────────────────────────────────────────────────────────────────
// Client
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomLifecycleClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl RoomLifecycleClient {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /rooms`
    pub async fn list_rooms(&self) -> Result<Vec<RoomListRecord>, LobbyError> {
        let request = self.http.get(format!("{}/rooms", self.base_url));
        self.execute(request).await
    }

    /// `POST /room`
    pub async fn create_room(
        &self,
        room_id: Option<String>,
        room: &SerializedRoom,
    ) -> Result<RoomCreatedRecord, LobbyError> {
        if room.landscape.landscape_token.trim().is_empty() {
            return Err(LobbyError::MissingLandscapeToken);
        }
        let payload = CreateRoomPayload {
            room_id,
            room: room.clone(),
        };
        let request = self.http.post(format!("{}/room", self.base_url)).json(&payload);
        let created: RoomCreatedRecord = self.execute(request).await?;
        log::info!("Created room {}", created.room_id);
        Ok(created)
    }

    /// `POST /room/{id}/lobby`
    pub async fn join_lobby(&self, room_id: &str, payload: &JoinLobbyPayload) -> Result<LobbyJoinedRecord, LobbyError> {
        let request = self
            .http
            .post(format!("{}/room/{}/lobby", self.base_url, room_id))
            .json(payload);
        self.execute(request).await
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, LobbyError> {
        let request = match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LobbyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        decode_record(&body)
    }
}

fn decode_record<T: DeserializeOwned>(body: &str) -> Result<T, LobbyError> {
    serde_json::from_str(body).map_err(|e| LobbyError::InvalidData(e.to_string()))
}
