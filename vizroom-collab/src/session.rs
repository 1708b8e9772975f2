//! Client-side collaborative session.
//!
//! [`CollabSession`] owns the local [`Scene`] together with presence,
//! highlighting, ownership, spectating and the transport. Local operations
//! mutate the scene first and then broadcast; inbound events are handled
//! one at a time by [`CollabSession::handle`], which returns a
//! [`SessionNotice`] for things the UI layer has to react to.

use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use vizroom_core::{
    Color, DetachedMenu, EntityReference, EntityType, Pose, Scene, SceneError, SerializedRoom, Transform, Vec3,
};

use crate::highlighting::HighlightingSynchronizer;
use crate::ownership::{OwnershipArbiter, OwnershipError};
use crate::presence::{PresenceError, PresenceRegistry};
use crate::protocol::{
    AppOpened, ComponentUpdate, JoinRoom, MousePingUpdate, PingUpdate, RoomEvent, TimestampUpdate,
    TransparencyUpdate, UserPositions,
};
use crate::serializer::{restore_room, serialize_room, RestoreOutcome, RestoreSummary};
use crate::spectate::SpectateController;
use crate::transport::{Transport, TransportConfig, TransportError, TransportEvent};

/// Session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Allow a participant to hold several highlights at once.
    pub multi_highlight: bool,
    pub transport: TransportConfig,
}

/// Something the embedding application should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Connected { own_id: Uuid },
    UserJoined(Uuid),
    UserLeft(Uuid),
    RoomRestored(RestoreSummary),
    RoomStale { snapshot_apps: usize, local_apps: usize },
    Ping { user_id: Uuid, controller_id: u8, is_pinging: bool },
    MousePing { user_id: Uuid, model_id: String, is_application: bool, position: Vec3 },
    TimestampChanged(i64),
    Disconnected { reason: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Presence(#[from] PresenceError),
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

pub struct CollabSession {
    scene: Scene,
    presence: PresenceRegistry,
    highlighting: HighlightingSynchronizer,
    ownership: OwnershipArbiter,
    spectate: SpectateController,
    transport: Transport,
    /// Identity used while offline, before the relay assigns one.
    offline_id: Uuid,
}

impl CollabSession {
    pub fn new(scene: Scene, config: SessionConfig) -> Self {
        Self {
            scene,
            presence: PresenceRegistry::new(),
            highlighting: HighlightingSynchronizer::new(config.multi_highlight),
            ownership: OwnershipArbiter::new(),
            spectate: SpectateController::new(),
            transport: Transport::new(config.transport),
            offline_id: Uuid::new_v4(),
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn ownership(&self) -> &OwnershipArbiter {
        &self.ownership
    }

    pub fn spectate(&self) -> &SpectateController {
        &self.spectate
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Local participant id (relay-assigned once online).
    pub fn local_id(&self) -> Uuid {
        self.presence.local_id().unwrap_or(self.offline_id)
    }

    fn local_color(&self) -> Color {
        self.presence.local_color().unwrap_or_default()
    }

    // ── Connection ───────────────────────────────────────────────

    /// Open the transport and redeem a lobby ticket.
    pub async fn connect(&mut self, url: &str, ticket_id: &str) -> Result<mpsc::Receiver<TransportEvent>, SessionError> {
        self.presence.begin_connect()?;
        let join = JoinRoom {
            ticket_id: ticket_id.to_string(),
        };
        match self.transport.connect(url, join).await {
            Ok(events) => Ok(events),
            Err(e) => {
                self.presence.disconnected();
                Err(e.into())
            }
        }
    }

    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
        self.connection_lost();
    }

    fn connection_lost(&mut self) {
        self.presence.disconnected();
        let dropped = self.ownership.clear();
        if dropped > 0 {
            log::debug!("Dropped {dropped} grab tokens on disconnect");
        }
        self.spectate.deactivate(&mut self.scene);
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Apply one inbound transport event.
    pub async fn handle(&mut self, event: TransportEvent) -> Option<SessionNotice> {
        let (sender, event) = match event {
            TransportEvent::Inbound { sender, event } => (sender, event),
            TransportEvent::SelfDisconnected { reason } => {
                self.connection_lost();
                return Some(SessionNotice::Disconnected { reason });
            }
        };
        let from = sender.unwrap_or_default();

        match event {
            RoomEvent::SelfConnected(ack) => {
                if let Err(e) = self.presence.handshake_ack(&ack.own, &ack.users) {
                    log::warn!("Unexpected handshake: {e}");
                    return None;
                }
                Some(SessionNotice::Connected { own_id: ack.own.id })
            }
            RoomEvent::UserConnected(info) => {
                self.presence.add(&info);
                log::info!("{} joined", info.name);
                Some(SessionNotice::UserJoined(info.id))
            }
            RoomEvent::UserDisconnected(left) => {
                self.presence.remove(left.id);
                self.highlighting.clear_participant(&mut self.scene, left.id);
                self.scene.release_menus_of(left.id);
                if let Some(update) = self.spectate.participant_left(&mut self.scene, left.id) {
                    self.broadcast(update).await;
                }
                Some(SessionNotice::UserLeft(left.id))
            }
            RoomEvent::UserPositions(positions) => {
                self.presence.update_positions(from, &positions);
                None
            }
            RoomEvent::AppOpened(opened) => {
                if let Err(e) = self.scene.open_app(&opened.app_id, &opened.transform()) {
                    log::debug!("Ignoring remote app_opened: {e}");
                }
                None
            }
            RoomEvent::AppClosed(closed) => {
                self.scene.close_app(&closed.app_id);
                None
            }
            RoomEvent::ObjectMoved(moved) => {
                self.ownership.apply_remote_move(&mut self.scene, &moved);
                None
            }
            RoomEvent::ComponentUpdate(update) => {
                if let Err(e) = self.scene.set_component_open(
                    &update.app_id,
                    &update.component_id,
                    update.is_opened,
                    update.is_foundation,
                ) {
                    log::debug!("Ignoring remote component_update: {e}");
                }
                None
            }
            RoomEvent::TransparencyUpdate(update) => {
                if let Err(e) = self
                    .scene
                    .set_transparent(&update.app_id, &update.entity_ids, update.is_transparent)
                {
                    log::debug!("Ignoring remote transparency_update: {e}");
                }
                None
            }
            RoomEvent::HighlightingUpdate(update) => {
                let color = self.presence.get(from).map(|p| p.color).unwrap_or_default();
                self.highlighting.apply_remote(&mut self.scene, from, color, &update);
                None
            }
            RoomEvent::AllHighlightsReset => {
                self.highlighting.apply_remote_reset(&mut self.scene);
                None
            }
            RoomEvent::MenuDetached(detached) => {
                let Some(object_id) = detached.object_id.clone() else {
                    log::debug!("Ignoring menu_detached without id");
                    return None;
                };
                self.scene.detach_menu(DetachedMenu {
                    object_id,
                    owner_user_id: sender,
                    entity_id: detached.entity_id,
                    entity_type: detached.entity_type,
                    position: detached.position,
                    quaternion: detached.quaternion,
                    scale: detached.scale,
                });
                None
            }
            RoomEvent::DetachedMenuClosed(closed) => {
                self.scene.close_menu(&closed.menu_id);
                None
            }
            RoomEvent::SpectatingUpdate(update) => {
                let target = update.spectated_user_id.filter(|_| update.is_spectating);
                self.presence.set_spectating(from, target);
                None
            }
            RoomEvent::PingUpdate(ping) => Some(SessionNotice::Ping {
                user_id: from,
                controller_id: ping.controller_id,
                is_pinging: ping.is_pinging,
            }),
            RoomEvent::MousePingUpdate(ping) => Some(SessionNotice::MousePing {
                user_id: from,
                model_id: ping.model_id,
                is_application: ping.is_application,
                position: ping.position,
            }),
            RoomEvent::TimestampUpdate(update) => {
                self.scene.set_timestamp(update.timestamp);
                Some(SessionNotice::TimestampChanged(update.timestamp))
            }
            RoomEvent::SyncRoomState(room) | RoomEvent::InitialLandscape(room) => {
                Some(match restore_room(&mut self.scene, &room) {
                    RestoreOutcome::Applied(summary) => SessionNotice::RoomRestored(summary),
                    RestoreOutcome::Stale {
                        snapshot_apps,
                        local_apps,
                    } => SessionNotice::RoomStale {
                        snapshot_apps,
                        local_apps,
                    },
                })
            }
            RoomEvent::Join(_) | RoomEvent::ObjectGrabbed(_) | RoomEvent::ObjectReleased(_) => {
                log::debug!("Ignoring relay-bound event {}", event.name());
                None
            }
            RoomEvent::ObjectGrabbedResponse(_)
            | RoomEvent::ObjectClosedResponse(_)
            | RoomEvent::MenuDetachedResponse(_) => {
                log::debug!("Ignoring unsolicited {}", event.name());
                None
            }
        }
    }

    async fn broadcast(&self, event: RoomEvent) {
        if let Err(e) = self.transport.send(event).await {
            log::warn!("Broadcast failed: {e}");
        }
    }

    // ── Applications ─────────────────────────────────────────────

    pub async fn open_app(&mut self, app_id: &str, world: &Transform) -> Result<bool, SessionError> {
        let opened = self.scene.open_app(app_id, world)?;
        self.transport
            .send(RoomEvent::AppOpened(AppOpened::new(app_id, world)))
            .await?;
        Ok(opened)
    }

    /// Close an application; `false` if another participant holds it.
    pub async fn close_app(&mut self, app_id: &str) -> Result<bool, SessionError> {
        Ok(self.ownership.close_app(&self.transport, &mut self.scene, app_id).await?)
    }

    pub async fn set_component_open(
        &mut self,
        app_id: &str,
        component_id: &str,
        is_opened: bool,
        is_foundation: bool,
    ) -> Result<(), SessionError> {
        self.scene
            .set_component_open(app_id, component_id, is_opened, is_foundation)?;
        self.transport
            .send(RoomEvent::ComponentUpdate(ComponentUpdate {
                app_id: app_id.to_string(),
                component_id: component_id.to_string(),
                is_opened,
                is_foundation,
            }))
            .await?;
        Ok(())
    }

    pub async fn set_transparent(&mut self, app_id: &str, entity_ids: Vec<String>, is_transparent: bool) -> Result<(), SessionError> {
        self.scene.set_transparent(app_id, &entity_ids, is_transparent)?;
        self.transport
            .send(RoomEvent::TransparencyUpdate(TransparencyUpdate {
                app_id: app_id.to_string(),
                entity_ids,
                is_transparent,
            }))
            .await?;
        Ok(())
    }

    // ── Highlighting ─────────────────────────────────────────────

    /// Returns the new highlight state, or `None` if the entity is not in the scene.
    pub async fn toggle_highlight(&mut self, entity: &EntityReference) -> Result<Option<bool>, SessionError> {
        let (user, color) = (self.local_id(), self.local_color());
        let update = self
            .highlighting
            .toggle_highlight(&mut self.scene, entity, user, color);
        let Some(update) = update else {
            return Ok(None);
        };
        let state = update.is_highlighted;
        self.transport.send(RoomEvent::HighlightingUpdate(update)).await?;
        Ok(Some(state))
    }

    pub async fn remove_all_highlights(&mut self) -> Result<(), SessionError> {
        let event = self.highlighting.remove_all(&mut self.scene);
        self.transport.send(event).await?;
        Ok(())
    }

    // ── Ownership ────────────────────────────────────────────────

    pub async fn grab(&mut self, object_id: &str) -> Result<bool, SessionError> {
        let holder = self.local_id();
        Ok(self.ownership.request_grab(&self.transport, object_id, holder).await?)
    }

    pub async fn release(&mut self, object_id: &str) -> Result<bool, SessionError> {
        Ok(self.ownership.release_grab(&self.transport, object_id).await?)
    }

    pub async fn move_object(&mut self, object_id: &str, world: &Transform) -> Result<(), SessionError> {
        let event = self.ownership.move_object(&mut self.scene, object_id, world)?;
        self.transport.send(event).await?;
        Ok(())
    }

    pub async fn detach_menu(
        &mut self,
        entity_id: &str,
        entity_type: EntityType,
        world: &Transform,
    ) -> Result<Option<String>, SessionError> {
        let owner = self.local_id();
        Ok(self
            .ownership
            .detach_menu(&self.transport, &mut self.scene, entity_id, entity_type, world, owner)
            .await?)
    }

    pub async fn close_menu(&mut self, menu_id: &str) -> Result<bool, SessionError> {
        Ok(self.ownership.close_menu(&self.transport, &mut self.scene, menu_id).await?)
    }

    // ── Spectating ───────────────────────────────────────────────

    pub async fn start_spectating(&mut self, target: Option<Uuid>) -> Result<(), SessionError> {
        let local_id = self.local_id();
        if let Some(event) = self.spectate.activate(&self.scene, local_id, target) {
            self.transport.send(event).await?;
        }
        Ok(())
    }

    pub async fn stop_spectating(&mut self) -> Result<(), SessionError> {
        if let Some(event) = self.spectate.deactivate(&mut self.scene) {
            self.transport.send(event).await?;
        }
        Ok(())
    }

    /// Per-frame update while spectating.
    pub fn tick(&mut self) -> bool {
        self.spectate.tick(&mut self.scene, &self.presence)
    }

    // ── Presence and pings ───────────────────────────────────────

    pub async fn update_pose(&mut self, camera: Pose, controllers: [Option<Pose>; 2]) -> Result<(), SessionError> {
        if !self.spectate.is_active() {
            self.scene.set_camera(camera);
        }
        self.transport
            .send(RoomEvent::UserPositions(UserPositions { camera, controllers }))
            .await?;
        Ok(())
    }

    pub async fn ping(&self, controller_id: u8, is_pinging: bool) -> Result<(), SessionError> {
        self.transport
            .send(RoomEvent::PingUpdate(PingUpdate {
                controller_id,
                is_pinging,
            }))
            .await?;
        Ok(())
    }

    pub async fn mouse_ping(&self, model_id: &str, is_application: bool, position: Vec3) -> Result<(), SessionError> {
        self.transport
            .send(RoomEvent::MousePingUpdate(MousePingUpdate {
                model_id: model_id.to_string(),
                is_application,
                position,
            }))
            .await?;
        Ok(())
    }

    // ── Room state ───────────────────────────────────────────────

    pub async fn set_timestamp(&mut self, timestamp: i64) -> Result<(), SessionError> {
        self.scene.set_timestamp(timestamp);
        self.transport
            .send(RoomEvent::TimestampUpdate(TimestampUpdate { timestamp }))
            .await?;
        Ok(())
    }

    pub fn snapshot(&self) -> SerializedRoom {
        serialize_room(&self.scene)
    }

    /// Push the full local room to everyone else.
    pub async fn sync_room_state(&self) -> Result<(), SessionError> {
        self.transport
            .send(RoomEvent::SyncRoomState(self.snapshot()))
            .await?;
        Ok(())
    }
}
