//! Ownership arbiter for movable objects (applications, detached menus).
//!
//! The relay decides who may manipulate an object. A granted grab creates
//! a local [`GrabToken`]; only token holders send `object_moved`. Remote
//! moves are applied without being re-broadcast. Tokens never survive a
//! disconnect.

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use vizroom_core::{DetachedMenu, EntityType, Scene, Transform};

use crate::protocol::{
    AppClosed, DetachedMenuClosed, MenuDetached, MenuDetachedResponse, ObjectClosedResponse, ObjectGrabbed,
    ObjectGrabbedResponse, ObjectMoved, ObjectReleased, RoomEvent,
};
use crate::transport::{Transport, TransportError};

/// Exists only while the local participant holds `object_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabToken {
    pub object_id: String,
    pub holder_user_id: Uuid,
}

#[derive(Error, Debug)]
pub enum OwnershipError {
    #[error("Object not held: {0}")]
    NotHeld(String),
    #[error("Unknown object: {0}")]
    UnknownObject(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Default)]
pub struct OwnershipArbiter {
    tokens: HashMap<String, GrabToken>,
}

impl OwnershipArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holds(&self, object_id: &str) -> bool {
        self.tokens.contains_key(object_id)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &GrabToken> {
        self.tokens.values()
    }

    /// Ask the relay for exclusive manipulation of `object_id`.
    ///
    /// Offline the grab is granted locally.
    pub async fn request_grab(
        &mut self,
        transport: &Transport,
        object_id: &str,
        holder_user_id: Uuid,
    ) -> Result<bool, OwnershipError> {
        if self.holds(object_id) {
            return Ok(true);
        }
        let request = RoomEvent::ObjectGrabbed(ObjectGrabbed {
            object_id: object_id.to_string(),
        });
        let granted = transport
            .send_respondable(
                request,
                |response| match response {
                    RoomEvent::ObjectGrabbedResponse(ObjectGrabbedResponse { is_success }) => Some(is_success),
                    _ => None,
                },
                true,
            )
            .await?;
        if granted {
            self.tokens.insert(
                object_id.to_string(),
                GrabToken {
                    object_id: object_id.to_string(),
                    holder_user_id,
                },
            );
        } else {
            log::warn!("Grab of {object_id} denied");
        }
        Ok(granted)
    }

    /// Give up `object_id`. Returns `false` if it was not held.
    pub async fn release_grab(&mut self, transport: &Transport, object_id: &str) -> Result<bool, OwnershipError> {
        if self.tokens.remove(object_id).is_none() {
            return Ok(false);
        }
        transport
            .send(RoomEvent::ObjectReleased(ObjectReleased {
                object_id: object_id.to_string(),
            }))
            .await?;
        Ok(true)
    }

    /// Move a held object locally; returns the event to broadcast.
    pub fn move_object(&self, scene: &mut Scene, object_id: &str, world: &Transform) -> Result<RoomEvent, OwnershipError> {
        if !self.holds(object_id) {
            return Err(OwnershipError::NotHeld(object_id.to_string()));
        }
        scene
            .set_object_transform(object_id, world)
            .ok_or_else(|| OwnershipError::UnknownObject(object_id.to_string()))?;
        Ok(RoomEvent::ObjectMoved(ObjectMoved::new(object_id, world)))
    }

    /// Apply a move made by another participant. Never re-broadcast.
    pub fn apply_remote_move(&self, scene: &mut Scene, moved: &ObjectMoved) -> bool {
        if self.holds(&moved.object_id) {
            log::debug!("Ignoring remote move of held object {}", moved.object_id);
            return false;
        }
        scene.set_object_transform(&moved.object_id, &moved.transform()).is_some()
    }

    /// Detach a menu from its anchor. Offline the id is generated locally.
    ///
    /// Returns the menu id, or `None` if the anchor is not in the scene.
    pub async fn detach_menu(
        &mut self,
        transport: &Transport,
        scene: &mut Scene,
        entity_id: &str,
        entity_type: EntityType,
        world: &Transform,
        owner_user_id: Uuid,
    ) -> Result<Option<String>, OwnershipError> {
        if !scene.resolve_anchor(entity_type, entity_id) {
            return Ok(None);
        }
        let request = RoomEvent::MenuDetached(MenuDetached {
            object_id: None,
            entity_id: entity_id.to_string(),
            entity_type,
            position: world.position,
            quaternion: world.quaternion,
            scale: world.scale,
        });
        let object_id = transport
            .send_respondable(
                request,
                |response| match response {
                    RoomEvent::MenuDetachedResponse(MenuDetachedResponse { object_id }) => Some(object_id),
                    _ => None,
                },
                Uuid::new_v4().to_string(),
            )
            .await?;
        let menu = DetachedMenu {
            object_id: object_id.clone(),
            owner_user_id: Some(owner_user_id),
            entity_id: entity_id.to_string(),
            entity_type,
            position: world.position,
            quaternion: world.quaternion,
            scale: world.scale,
        };
        Ok(scene.detach_menu(menu).then_some(object_id))
    }

    /// Close an application. Denied while another participant holds it.
    pub async fn close_app(&mut self, transport: &Transport, scene: &mut Scene, app_id: &str) -> Result<bool, OwnershipError> {
        let request = RoomEvent::AppClosed(AppClosed {
            app_id: app_id.to_string(),
        });
        let closed = transport.send_respondable(request, closed_response, true).await?;
        if closed {
            self.tokens.remove(app_id);
            scene.close_app(app_id);
        }
        Ok(closed)
    }

    /// Close a detached menu. Denied while another participant holds it.
    pub async fn close_menu(&mut self, transport: &Transport, scene: &mut Scene, menu_id: &str) -> Result<bool, OwnershipError> {
        let request = RoomEvent::DetachedMenuClosed(DetachedMenuClosed {
            menu_id: menu_id.to_string(),
        });
        let closed = transport.send_respondable(request, closed_response, true).await?;
        if closed {
            self.tokens.remove(menu_id);
            scene.close_menu(menu_id);
        }
        Ok(closed)
    }

    /// Drop every token; called when the connection goes away.
    pub fn clear(&mut self) -> usize {
        let n = self.tokens.len();
        self.tokens.clear();
        n
    }
}

fn closed_response(response: RoomEvent) -> Option<bool> {
    match response {
        RoomEvent::ObjectClosedResponse(ObjectClosedResponse { is_success }) => Some(is_success),
        _ => None,
    }
}
