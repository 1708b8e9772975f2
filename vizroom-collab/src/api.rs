//! Lobby REST API served by the relay.
//!
//! - `GET  /rooms`               → `[RoomListRecord]`
//! - `POST /room`                → `RoomCreatedRecord`
//! - `POST /room/{id}/lobby`     → `LobbyJoinedRecord` (ticket for the WebSocket `join`)
//!
//! When auth is required every route needs `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::lobby::{CreateRoomPayload, JoinLobbyPayload, LobbyJoinedRecord, RoomCreatedRecord, RoomListRecord};
use crate::registry::{RegistryError, RoomRegistry};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub fn router(registry: Arc<RoomRegistry>, require_auth: bool) -> Router {
    let router = Router::new()
        .route("/rooms", get(list_rooms))
        .route("/room", post(create_room))
        .route("/room/{room_id}/lobby", post(join_lobby))
        .with_state(registry);
    if require_auth {
        router.layer(middleware::from_fn(require_bearer))
    } else {
        router
    }
}

async fn list_rooms(State(registry): State<Arc<RoomRegistry>>) -> Json<Vec<RoomListRecord>> {
    Json(registry.list_rooms().await)
}

async fn create_room(
    State(registry): State<Arc<RoomRegistry>>,
    Json(payload): Json<CreateRoomPayload>,
) -> ApiResult<RoomCreatedRecord> {
    let room_id = registry
        .create_room(payload.room_id, &payload.room)
        .await
        .map_err(rejection)?;
    Ok(Json(RoomCreatedRecord { room_id }))
}

async fn join_lobby(
    State(registry): State<Arc<RoomRegistry>>,
    Path(room_id): Path<String>,
    Json(payload): Json<JoinLobbyPayload>,
) -> ApiResult<LobbyJoinedRecord> {
    registry
        .issue_ticket(&room_id, &payload)
        .await
        .map(Json)
        .map_err(rejection)
}

fn status_of(error: &RegistryError) -> StatusCode {
    match error {
        RegistryError::UnknownRoom(_) => StatusCode::NOT_FOUND,
        RegistryError::DuplicateRoom(_) => StatusCode::CONFLICT,
        RegistryError::MissingLandscapeToken => StatusCode::BAD_REQUEST,
        RegistryError::InvalidTicket | RegistryError::ExpiredTicket => StatusCode::UNAUTHORIZED,
        RegistryError::RoomFull(_) => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::RoomClosed(_) | RegistryError::Protocol(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn rejection(error: RegistryError) -> (StatusCode, String) {
    let status = status_of(&error);
    log::debug!("Lobby request rejected ({status}): {error}");
    (status, error.to_string())
}

fn bearer_token(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

async fn require_bearer(req: Request, next: Next) -> Result<Response, StatusCode> {
    let authorized = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .is_some();
    if authorized {
        Ok(next.run(req).await)
    } else {
        log::warn!("Unauthenticated lobby request to {}", req.uri().path());
        Err(StatusCode::UNAUTHORIZED)
    }
}
