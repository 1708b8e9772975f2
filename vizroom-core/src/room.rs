//! Transmissible room snapshot records.
//!
//! A [`SerializedRoom`] is the only unit exchanged on room creation and on
//! explicit resynchronization. Field names follow the camelCase JSON used by
//! the lobby API; the binary wire codec ignores names.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::color::Color;
use crate::entity::{EntityReference, EntityType};
use crate::math::{Quaternion, Transform, Vec3};

/// Landscape the room visualizes, and the point in time being shown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LandscapeRef {
    pub landscape_token: String,
    /// Epoch milliseconds of the displayed structure snapshot.
    pub timestamp: i64,
}

impl LandscapeRef {
    pub fn new(token: impl Into<String>, timestamp: i64) -> Self {
        Self {
            landscape_token: token.into(),
            timestamp,
        }
    }
}

/// One highlighted entity, tagged with the participant that highlighted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightRecord {
    /// `None` for inter-application communication links.
    pub app_id: Option<String>,
    pub user_id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub is_highlighted: bool,
    pub color: Color,
}

impl HighlightRecord {
    pub fn new(entity: &EntityReference, user_id: Uuid, color: Color) -> Self {
        let entity = entity.normalized();
        Self {
            app_id: entity.app_id,
            user_id,
            entity_type: entity.entity_type,
            entity_id: entity.entity_id,
            is_highlighted: true,
            color,
        }
    }

    pub fn reference(&self) -> EntityReference {
        EntityReference {
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            app_id: self.app_id.clone(),
        }
        .normalized()
    }
}

/// Snapshot of one opened application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedApp {
    pub id: String,
    /// World-space position.
    pub position: [f32; 3],
    pub quaternion: [f32; 4],
    pub scale: [f32; 3],
    pub open_components: BTreeSet<String>,
    pub transparent_components: BTreeSet<String>,
    pub highlighted_components: Vec<HighlightRecord>,
}

impl SerializedApp {
    pub fn new(id: impl Into<String>, world: &Transform) -> Self {
        Self {
            id: id.into(),
            position: world.position.to_array(),
            quaternion: world.quaternion.to_array(),
            scale: world.scale.to_array(),
            open_components: BTreeSet::new(),
            transparent_components: BTreeSet::new(),
            highlighted_components: Vec::new(),
        }
    }

    pub fn transform(&self) -> Transform {
        Transform::new(
            Vec3::from_array(self.position),
            Quaternion::from_array(self.quaternion),
            Vec3::from_array(self.scale),
        )
    }

    pub fn set_transform(&mut self, world: &Transform) {
        self.position = world.position.to_array();
        self.quaternion = world.quaternion.to_array();
        self.scale = world.scale.to_array();
    }
}

/// An in-world panel detached from its anchor entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedMenu {
    pub object_id: String,
    /// `None` when no participant owns the menu (free-floating).
    pub owner_user_id: Option<Uuid>,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub position: Vec3,
    pub quaternion: Quaternion,
    pub scale: Vec3,
}

impl DetachedMenu {
    pub fn transform(&self) -> Transform {
        Transform::new(self.position, self.quaternion, self.scale)
    }

    pub fn set_transform(&mut self, world: &Transform) {
        self.position = world.position;
        self.quaternion = world.quaternion;
        self.scale = world.scale;
    }
}

/// A shared 2D popup attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupRef {
    pub menu_id: Option<String>,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub user_id: Option<Uuid>,
    pub is_pinned: bool,
}

/// A shared text annotation, optionally anchored to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub annotation_id: String,
    pub entity_id: Option<String>,
    pub entity_type: Option<EntityType>,
    pub owner_user_id: Option<Uuid>,
    pub title: String,
    pub text: String,
    pub is_shared: bool,
}

/// Aggregate snapshot of a room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRoom {
    pub landscape: LandscapeRef,
    pub open_apps: Vec<SerializedApp>,
    pub detached_menus: Vec<DetachedMenu>,
    pub highlighted_extern_communication_links: Vec<HighlightRecord>,
    pub popups: Vec<PopupRef>,
    pub annotations: Vec<Annotation>,
}

impl SerializedRoom {
    pub fn empty(landscape: LandscapeRef) -> Self {
        Self {
            landscape,
            ..Self::default()
        }
    }

    pub fn app(&self, app_id: &str) -> Option<&SerializedApp> {
        self.open_apps.iter().find(|a| a.id == app_id)
    }

    /// Every highlight in the snapshot, app-scoped and extern links.
    pub fn all_highlights(&self) -> impl Iterator<Item = &HighlightRecord> {
        self.open_apps
            .iter()
            .flat_map(|a| a.highlighted_components.iter())
            .chain(self.highlighted_extern_communication_links.iter())
    }
}
