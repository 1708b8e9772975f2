//! Relay-side room: authoritative state plus the actor that owns it.
//!
//! ```text
//!  connection A ──┐                         ┌──▶ direct reply (nonce) ──▶ A
//!                 ├── RoomCommand (mpsc) ──▶ RoomActor ── RoomState
//!  connection B ──┘                         └──▶ BroadcastGroup ──▶ A, B, …
//! ```
//!
//! [`RoomState`] is plain data with a synchronous `apply`; the actor
//! serializes every command through it, so no room state is ever shared
//! between tasks. It tracks participants (with distinct palette colors),
//! grab tokens and a projection [`Scene`] used to build snapshots for late
//! joiners.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use vizroom_core::{Color, DetachedMenu, HighlightRecord, Scene, SerializedRoom};

use crate::broadcast::{BroadcastGroup, BroadcastStats, RelayFrame};
use crate::lobby::RoomListRecord;
use crate::protocol::{
    encode_event, MenuDetached, MenuDetachedResponse, ObjectClosedResponse, ObjectGrabbedResponse,
    ParticipantInfo, RoomEvent, SelfConnected, UserDisconnected,
};
use crate::registry::{LobbyTicket, RegistryError};
use crate::serializer::restore_room;

/// Per-room limits and policy.
#[derive(Debug, Clone, Copy)]
pub struct RoomSettings {
    pub max_participants: usize,
    pub multi_highlight: bool,
    pub broadcast_capacity: usize,
    pub command_capacity: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_participants: 64,
            multi_highlight: false,
            broadcast_capacity: 256,
            command_capacity: 256,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// State
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Member {
    info: ParticipantInfo,
    palette_index: u32,
    device_id: String,
}

/// Result of applying one event: an answer for the sender, and/or an
/// event for everyone else.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub reply: Option<RoomEvent>,
    pub broadcast: Option<RoomEvent>,
}

impl Outcome {
    fn none() -> Self {
        Self::default()
    }

    fn forward(event: RoomEvent) -> Self {
        Self {
            reply: None,
            broadcast: Some(event),
        }
    }

    fn reply(event: RoomEvent) -> Self {
        Self {
            reply: Some(event),
            broadcast: None,
        }
    }
}

/// What a newly admitted participant needs to get started.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub ack: SelfConnected,
    pub snapshot: SerializedRoom,
}

#[derive(Debug)]
pub struct RoomState {
    room_id: String,
    settings: RoomSettings,
    members: BTreeMap<Uuid, Member>,
    /// object id → holder
    grabs: HashMap<String, Uuid>,
    scene: Scene,
}

impl RoomState {
    pub fn new(room_id: impl Into<String>, initial: &SerializedRoom, settings: RoomSettings) -> Self {
        let mut scene = Scene::new();
        restore_room(&mut scene, initial);
        Self {
            room_id: room_id.into(),
            settings,
            members: BTreeMap::new(),
            grabs: HashMap::new(),
            scene,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn participant_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn participant(&self, user_id: Uuid) -> Option<&ParticipantInfo> {
        self.members.get(&user_id).map(|m| &m.info)
    }

    pub fn holder(&self, object_id: &str) -> Option<Uuid> {
        self.grabs.get(object_id).copied()
    }

    pub fn snapshot(&self) -> SerializedRoom {
        crate::serializer::serialize_room(&self.scene)
    }

    pub fn summary(&self) -> RoomListRecord {
        RoomListRecord {
            room_id: self.room_id.clone(),
            room_name: self.room_id.clone(),
            landscape_token: self.scene.landscape_ref().landscape_token.clone(),
            size: self.members.len(),
        }
    }

    /// Add the holder of `ticket` with the smallest free palette color.
    pub fn admit(&mut self, ticket: &LobbyTicket) -> Result<Admission, RegistryError> {
        if self.members.len() >= self.settings.max_participants {
            return Err(RegistryError::RoomFull(self.room_id.clone()));
        }
        let used: BTreeSet<u32> = self.members.values().map(|m| m.palette_index).collect();
        let palette_index = (0u32..)
            .take(used.len() + 1)
            .find(|i| !used.contains(i))
            .unwrap_or(used.len() as u32);

        let own = ParticipantInfo {
            id: Uuid::new_v4(),
            name: ticket.user_name.clone(),
            color: Color::from_index(palette_index),
            camera: ticket.camera,
        };
        let users = self.members.values().map(|m| m.info.clone()).collect();
        self.members.insert(
            own.id,
            Member {
                info: own.clone(),
                palette_index,
                device_id: ticket.device_id.clone(),
            },
        );
        log::info!(
            "{} ({}, {}) joined room {}",
            own.name,
            own.id,
            ticket.device_id,
            self.room_id
        );
        Ok(Admission {
            ack: SelfConnected { own, users },
            snapshot: self.snapshot(),
        })
    }

    /// Remove a participant, releasing its grabs and orphaning its menus.
    pub fn depart(&mut self, user_id: Uuid) -> Option<RoomEvent> {
        let member = self.members.remove(&user_id)?;
        self.grabs.retain(|_, holder| *holder != user_id);
        self.scene.release_menus_of(user_id);
        self.scene.clear_highlights_of(user_id);
        log::info!(
            "{} ({}) left room {}",
            member.info.name,
            member.device_id,
            self.room_id
        );
        Some(RoomEvent::UserDisconnected(UserDisconnected { id: user_id }))
    }

    fn held_by_other(&self, object_id: &str, user_id: Uuid) -> bool {
        self.grabs
            .get(object_id)
            .is_some_and(|holder| *holder != user_id)
    }

    /// Apply one event sent by `user_id`.
    pub fn apply(&mut self, user_id: Uuid, event: RoomEvent) -> Outcome {
        if !self.members.contains_key(&user_id) {
            log::warn!("Event {} from non-member {user_id}", event.name());
            return Outcome::none();
        }

        match event {
            RoomEvent::UserPositions(ref positions) => {
                if let Some(member) = self.members.get_mut(&user_id) {
                    member.info.camera = positions.camera;
                }
                log::trace!("Pose update from {user_id}");
                Outcome::forward(event)
            }
            RoomEvent::AppOpened(ref opened) => {
                if let Err(e) = self.scene.open_app(&opened.app_id, &opened.transform()) {
                    log::debug!("Projection ignored app_opened: {e}");
                }
                Outcome::forward(event)
            }
            RoomEvent::AppClosed(ref closed) => {
                if self.held_by_other(&closed.app_id, user_id) {
                    log::warn!("Denied closing {}: held by another participant", closed.app_id);
                    return Outcome::reply(RoomEvent::ObjectClosedResponse(ObjectClosedResponse {
                        is_success: false,
                    }));
                }
                self.grabs.remove(&closed.app_id);
                self.scene.close_app(&closed.app_id);
                Outcome {
                    reply: Some(RoomEvent::ObjectClosedResponse(ObjectClosedResponse { is_success: true })),
                    broadcast: Some(event),
                }
            }
            RoomEvent::ObjectMoved(ref moved) => {
                if self.held_by_other(&moved.object_id, user_id) {
                    log::warn!("Dropping move of {} from non-holder {user_id}", moved.object_id);
                    return Outcome::none();
                }
                self.scene.set_object_transform(&moved.object_id, &moved.transform());
                Outcome::forward(event)
            }
            RoomEvent::ObjectGrabbed(grabbed) => {
                let exists = self.scene.object_kind(&grabbed.object_id).is_some();
                let granted = exists && !self.held_by_other(&grabbed.object_id, user_id);
                if granted {
                    self.grabs.insert(grabbed.object_id.clone(), user_id);
                } else {
                    log::warn!("Denied grab of {} to {user_id}", grabbed.object_id);
                }
                Outcome::reply(RoomEvent::ObjectGrabbedResponse(ObjectGrabbedResponse {
                    is_success: granted,
                }))
            }
            RoomEvent::ObjectReleased(released) => {
                if self.holder(&released.object_id) == Some(user_id) {
                    self.grabs.remove(&released.object_id);
                }
                Outcome::none()
            }
            RoomEvent::ComponentUpdate(ref update) => {
                if let Err(e) = self.scene.set_component_open(
                    &update.app_id,
                    &update.component_id,
                    update.is_opened,
                    update.is_foundation,
                ) {
                    log::debug!("Projection ignored component_update: {e}");
                }
                Outcome::forward(event)
            }
            RoomEvent::TransparencyUpdate(ref update) => {
                if let Err(e) = self
                    .scene
                    .set_transparent(&update.app_id, &update.entity_ids, update.is_transparent)
                {
                    log::debug!("Projection ignored transparency_update: {e}");
                }
                Outcome::forward(event)
            }
            RoomEvent::HighlightingUpdate(ref update) => {
                let entity = update.entity();
                if update.is_highlighted {
                    let color = self.members.get(&user_id).map(|m| m.info.color).unwrap_or_default();
                    self.scene
                        .highlight(HighlightRecord::new(&entity, user_id, color), self.settings.multi_highlight);
                } else {
                    self.scene.unhighlight(&entity);
                }
                Outcome::forward(event)
            }
            RoomEvent::AllHighlightsReset => {
                self.scene.clear_all_highlights();
                Outcome::forward(event)
            }
            RoomEvent::MenuDetached(detached) => {
                let object_id = Uuid::new_v4().to_string();
                self.scene.detach_menu(DetachedMenu {
                    object_id: object_id.clone(),
                    owner_user_id: Some(user_id),
                    entity_id: detached.entity_id.clone(),
                    entity_type: detached.entity_type,
                    position: detached.position,
                    quaternion: detached.quaternion,
                    scale: detached.scale,
                });
                Outcome {
                    reply: Some(RoomEvent::MenuDetachedResponse(MenuDetachedResponse {
                        object_id: object_id.clone(),
                    })),
                    broadcast: Some(RoomEvent::MenuDetached(MenuDetached {
                        object_id: Some(object_id),
                        ..detached
                    })),
                }
            }
            RoomEvent::DetachedMenuClosed(ref closed) => {
                if self.held_by_other(&closed.menu_id, user_id) {
                    log::warn!("Denied closing menu {}: held by another participant", closed.menu_id);
                    return Outcome::reply(RoomEvent::ObjectClosedResponse(ObjectClosedResponse {
                        is_success: false,
                    }));
                }
                self.grabs.remove(&closed.menu_id);
                self.scene.close_menu(&closed.menu_id);
                Outcome {
                    reply: Some(RoomEvent::ObjectClosedResponse(ObjectClosedResponse { is_success: true })),
                    broadcast: Some(event),
                }
            }
            RoomEvent::TimestampUpdate(ref update) => {
                self.scene.set_timestamp(update.timestamp);
                Outcome::forward(event)
            }
            RoomEvent::SyncRoomState(ref room) => {
                restore_room(&mut self.scene, room);
                let scene = &self.scene;
                self.grabs.retain(|object_id, _| scene.object_kind(object_id).is_some());
                Outcome::forward(event)
            }
            RoomEvent::SpectatingUpdate(_) | RoomEvent::PingUpdate(_) | RoomEvent::MousePingUpdate(_) => {
                Outcome::forward(event)
            }
            RoomEvent::Join(_)
            | RoomEvent::SelfConnected(_)
            | RoomEvent::UserConnected(_)
            | RoomEvent::UserDisconnected(_)
            | RoomEvent::InitialLandscape(_)
            | RoomEvent::ObjectGrabbedResponse(_)
            | RoomEvent::ObjectClosedResponse(_)
            | RoomEvent::MenuDetachedResponse(_) => {
                log::debug!("Ignoring client-bound event {} from {user_id}", event.name());
                Outcome::none()
            }
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Actor
// ───────────────────────────────────────────────────────────────────

/// Everything a connection receives when it is admitted.
pub struct JoinAccepted {
    pub user_id: Uuid,
    /// `self_connected` then `initial_landscape`, to write before anything else.
    pub initial_frames: Vec<Vec<u8>>,
    pub broadcast_rx: broadcast::Receiver<Arc<RelayFrame>>,
}

pub enum RoomCommand {
    Join {
        ticket: LobbyTicket,
        /// Channel for frames addressed to this connection only.
        direct: mpsc::Sender<Vec<u8>>,
        reply: oneshot::Sender<Result<JoinAccepted, RegistryError>>,
    },
    Event {
        user_id: Uuid,
        nonce: Option<u64>,
        event: RoomEvent,
    },
    Leave {
        user_id: Uuid,
        /// Participants remaining after the leave.
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<SerializedRoom>,
    },
    Summary {
        reply: oneshot::Sender<RoomListRecord>,
    },
    /// A connection's broadcast receiver skipped `count` frames.
    Lagged {
        count: u64,
    },
    Stats {
        reply: oneshot::Sender<BroadcastStats>,
    },
}

/// Handle to a running room actor (cheap to clone).
#[derive(Clone)]
pub struct RoomHandle {
    room_id: String,
    command_tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    /// Spawn the actor owning `state`.
    pub fn spawn(state: RoomState) -> Self {
        let (command_tx, command_rx) = mpsc::channel(state.settings.command_capacity.max(1));
        let room_id = state.room_id.clone();
        let actor = RoomActor {
            group: BroadcastGroup::new(state.settings.broadcast_capacity),
            state,
            direct: HashMap::new(),
        };
        tokio::spawn(actor.run(command_rx));
        Self { room_id, command_tx }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub async fn join(&self, ticket: LobbyTicket, direct: mpsc::Sender<Vec<u8>>) -> Result<JoinAccepted, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Join { ticket, direct, reply }).await?;
        rx.await.map_err(|_| RegistryError::RoomClosed(self.room_id.clone()))?
    }

    pub async fn send_event(&self, user_id: Uuid, nonce: Option<u64>, event: RoomEvent) -> Result<(), RegistryError> {
        self.send(RoomCommand::Event { user_id, nonce, event }).await
    }

    pub async fn leave(&self, user_id: Uuid) -> Result<usize, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Leave { user_id, reply }).await?;
        rx.await.map_err(|_| RegistryError::RoomClosed(self.room_id.clone()))
    }

    pub async fn snapshot(&self) -> Result<SerializedRoom, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| RegistryError::RoomClosed(self.room_id.clone()))
    }

    pub async fn summary(&self) -> Result<RoomListRecord, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Summary { reply }).await?;
        rx.await.map_err(|_| RegistryError::RoomClosed(self.room_id.clone()))
    }

    pub async fn broadcast_stats(&self) -> Result<BroadcastStats, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Stats { reply }).await?;
        rx.await.map_err(|_| RegistryError::RoomClosed(self.room_id.clone()))
    }

    /// Fire-and-forget; lag accounting is best effort.
    pub fn report_lag(&self, count: u64) {
        if self.command_tx.try_send(RoomCommand::Lagged { count }).is_err() {
            log::debug!("Room {} busy, lag report dropped", self.room_id);
        }
    }

    async fn send(&self, command: RoomCommand) -> Result<(), RegistryError> {
        self.command_tx.send(command).await.map_err(|_| {
            log::warn!("Room {} actor gone, command dropped", self.room_id);
            RegistryError::RoomClosed(self.room_id.clone())
        })
    }
}

struct RoomActor {
    state: RoomState,
    group: BroadcastGroup,
    direct: HashMap<Uuid, mpsc::Sender<Vec<u8>>>,
}

impl RoomActor {
    async fn run(mut self, mut command_rx: mpsc::Receiver<RoomCommand>) {
        while let Some(command) = command_rx.recv().await {
            match command {
                RoomCommand::Join { ticket, direct, reply } => {
                    let result = self.join(&ticket, direct).await;
                    let _ = reply.send(result);
                }
                RoomCommand::Event { user_id, nonce, event } => {
                    let outcome = self.state.apply(user_id, event);
                    self.dispatch(user_id, nonce, outcome);
                }
                RoomCommand::Leave { user_id, reply } => {
                    self.direct.remove(&user_id);
                    self.group.remove_peer(&user_id).await;
                    if let Some(event) = self.state.depart(user_id) {
                        self.publish(Some(user_id), &event);
                    }
                    let _ = reply.send(self.state.participant_count());
                }
                RoomCommand::Snapshot { reply } => {
                    let _ = reply.send(self.state.snapshot());
                }
                RoomCommand::Summary { reply } => {
                    let _ = reply.send(self.state.summary());
                }
                RoomCommand::Lagged { count } => self.group.record_dropped(count),
                RoomCommand::Stats { reply } => {
                    let _ = reply.send(self.group.stats().await);
                }
            }
        }
        log::debug!("Room {} actor stopped", self.state.room_id);
    }

    async fn join(&mut self, ticket: &LobbyTicket, direct: mpsc::Sender<Vec<u8>>) -> Result<JoinAccepted, RegistryError> {
        let admission = self.state.admit(ticket)?;
        let user_id = admission.ack.own.id;
        let encode = |event: &RoomEvent| encode_event(event, None, None).map_err(RegistryError::from);
        let initial_frames = vec![
            encode(&RoomEvent::SelfConnected(admission.ack.clone()))?,
            encode(&RoomEvent::InitialLandscape(admission.snapshot))?,
        ];
        // Subscribe before announcing so nothing after the snapshot is missed
        let broadcast_rx = self.group.add_peer(user_id).await;
        self.direct.insert(user_id, direct);
        self.publish(Some(user_id), &RoomEvent::UserConnected(admission.ack.own));
        Ok(JoinAccepted {
            user_id,
            initial_frames,
            broadcast_rx,
        })
    }

    /// A reply that cannot be queued closes the requester's reply channel,
    /// which ends its connection so the request resolves client-side.
    fn dispatch(&mut self, user_id: Uuid, nonce: Option<u64>, outcome: Outcome) {
        if let Some(reply) = outcome.reply {
            match encode_event(&reply, nonce, None) {
                Ok(bytes) => {
                    let undeliverable = self
                        .direct
                        .get(&user_id)
                        .is_some_and(|direct| direct.try_send(bytes).is_err());
                    if undeliverable {
                        log::warn!("Reply {} to {user_id} undeliverable, closing its connection", reply.name());
                        self.direct.remove(&user_id);
                    }
                }
                Err(e) => log::error!("Failed to encode {}: {e}", reply.name()),
            }
        }
        if let Some(event) = outcome.broadcast {
            self.publish(Some(user_id), &event);
        }
    }

    fn publish(&self, origin: Option<Uuid>, event: &RoomEvent) {
        match encode_event(event, None, origin) {
            Ok(bytes) => {
                self.group.broadcast(origin, bytes);
            }
            Err(e) => log::error!("Failed to encode {}: {e}", event.name()),
        }
    }
}
