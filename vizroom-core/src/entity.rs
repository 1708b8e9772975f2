//! Addressing of landscape entities.
//!
//! Structural entities (components and classes) and intra-application
//! communication edges are only unique inside their application, so they are
//! addressed together with an `app_id`. Inter-application communication edges
//! carry globally unique ids and no application.

use serde::{Deserialize, Serialize};

/// Kind of entity an [`EntityReference`] points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Package-like node of an application's tree.
    Component,
    /// Leaf class node.
    Clazz,
    /// Communication edge between classes of one application.
    ClassCommunication,
    /// Communication edge between two applications.
    ExternCommunication,
}

impl EntityType {
    /// Structural entities live in an application's component tree.
    pub fn is_structural(&self) -> bool {
        matches!(self, EntityType::Component | EntityType::Clazz)
    }

    /// Whether ids of this type are only unique within one application.
    pub fn is_app_scoped(&self) -> bool {
        !matches!(self, EntityType::ExternCommunication)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Component => "component",
            EntityType::Clazz => "clazz",
            EntityType::ClassCommunication => "class_communication",
            EntityType::ExternCommunication => "extern_communication",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{ entityType, entityId, appId? }`, the address used by highlight,
/// detach and ping messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityReference {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub app_id: Option<String>,
}

impl EntityReference {
    /// Reference to an entity inside application `app_id`.
    pub fn in_app(app_id: impl Into<String>, entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            app_id: Some(app_id.into()),
        }
    }

    /// Reference to an inter-application communication edge.
    pub fn extern_link(entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: EntityType::ExternCommunication,
            entity_id: entity_id.into(),
            app_id: None,
        }
    }

    /// Canonical key: the `app_id` is dropped for globally unique types so
    /// that two references to the same edge always compare equal.
    pub fn normalized(&self) -> EntityReference {
        if self.entity_type.is_app_scoped() {
            self.clone()
        } else {
            EntityReference {
                app_id: None,
                ..self.clone()
            }
        }
    }
}

impl std::fmt::Display for EntityReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.app_id {
            Some(app) => write!(f, "{}:{}/{}", self.entity_type, app, self.entity_id),
            None => write!(f, "{}:{}", self.entity_type, self.entity_id),
        }
    }
}
