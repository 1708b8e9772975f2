//! Live, locally mutable room state.
//!
//! ## Layout
//!
//! ```text
//! Scene
//!  ├── root: Transform            application container (world)
//!  │     └── OpenApplication      local transform, expansion, transparency
//!  ├── HighlightTable             app-scoped entities + extern links
//!  ├── detached menus             world-space transforms
//!  ├── popups / annotations       opaque, anchored to entities
//!  └── camera: Pose               local participant's camera (world)
//! ```
//!
//! Rendering reads this structure; nothing here knows about meshes. The
//! relay keeps one `Scene` per room as its projection, without a landscape.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use uuid::Uuid;

use crate::entity::{EntityReference, EntityType};
use crate::highlight::HighlightTable;
use crate::landscape::Landscape;
use crate::math::{Pose, Transform};
use crate::room::{Annotation, DetachedMenu, HighlightRecord, LandscapeRef, PopupRef};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("Application not part of the landscape: {0}")]
    UnknownApplication(String),
    #[error("Application not opened: {0}")]
    ApplicationNotOpen(String),
}

/// Which kind of movable object an object id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovableObject {
    Application,
    DetachedMenu,
}

/// An application currently opened in the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenApplication {
    pub id: String,
    /// Transform relative to the scene root.
    pub local: Transform,
    /// Expanded component ids.
    pub open_components: BTreeSet<String>,
    pub transparent_components: BTreeSet<String>,
}

impl OpenApplication {
    fn new(id: String, local: Transform) -> Self {
        Self {
            id,
            local,
            open_components: BTreeSet::new(),
            transparent_components: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    landscape_ref: LandscapeRef,
    landscape: Option<Landscape>,
    root: Transform,
    apps: BTreeMap<String, OpenApplication>,
    highlights: HighlightTable,
    menus: BTreeMap<String, DetachedMenu>,
    popups: Vec<PopupRef>,
    annotations: Vec<Annotation>,
    camera: Pose,
}

impl Scene {
    /// Scene without structure knowledge: every entity is assumed to exist.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_landscape(landscape: Landscape) -> Self {
        let mut scene = Self::new();
        scene.landscape_ref.landscape_token = landscape.token.clone();
        scene.landscape = Some(landscape);
        scene
    }

    // ── Landscape ────────────────────────────────────────────────

    pub fn landscape(&self) -> Option<&Landscape> {
        self.landscape.as_ref()
    }

    pub fn set_landscape(&mut self, landscape: Option<Landscape>) {
        if let Some(l) = &landscape {
            self.landscape_ref.landscape_token = l.token.clone();
        }
        self.landscape = landscape;
    }

    pub fn landscape_ref(&self) -> &LandscapeRef {
        &self.landscape_ref
    }

    pub fn set_landscape_ref(&mut self, landscape_ref: LandscapeRef) {
        self.landscape_ref = landscape_ref;
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.landscape_ref.timestamp = timestamp;
    }

    // ── Root and camera ──────────────────────────────────────────

    pub fn root(&self) -> &Transform {
        &self.root
    }

    pub fn set_root(&mut self, root: Transform) {
        self.root = root;
    }

    pub fn camera(&self) -> &Pose {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: Pose) {
        self.camera = camera;
    }

    // ── Applications ─────────────────────────────────────────────

    /// Open `app_id` at the given world transform, or move it there if it
    /// is already open. Returns `true` when the application was newly opened.
    pub fn open_app(&mut self, app_id: &str, world: &Transform) -> Result<bool, SceneError> {
        if let Some(landscape) = &self.landscape {
            if landscape.application(app_id).is_none() {
                return Err(SceneError::UnknownApplication(app_id.to_string()));
            }
        }
        let local = self.root.localize(world);
        if let Some(app) = self.apps.get_mut(app_id) {
            app.local = local;
            return Ok(false);
        }
        log::debug!("Opening application {app_id}");
        self.apps
            .insert(app_id.to_string(), OpenApplication::new(app_id.to_string(), local));
        Ok(true)
    }

    /// Close an application, dropping its highlights.
    pub fn close_app(&mut self, app_id: &str) -> bool {
        if self.apps.remove(app_id).is_none() {
            return false;
        }
        self.highlights.clear_app(app_id);
        true
    }

    pub fn app(&self, app_id: &str) -> Option<&OpenApplication> {
        self.apps.get(app_id)
    }

    pub fn apps(&self) -> impl Iterator<Item = &OpenApplication> {
        self.apps.values()
    }

    pub fn app_ids(&self) -> Vec<String> {
        self.apps.keys().cloned().collect()
    }

    pub fn is_app_open(&self, app_id: &str) -> bool {
        self.apps.contains_key(app_id)
    }

    pub fn open_app_count(&self) -> usize {
        self.apps.len()
    }

    pub fn app_world_transform(&self, app_id: &str) -> Option<Transform> {
        self.apps.get(app_id).map(|a| self.root.compose(&a.local))
    }

    pub fn set_app_world_transform(&mut self, app_id: &str, world: &Transform) -> bool {
        let local = self.root.localize(world);
        match self.apps.get_mut(app_id) {
            Some(app) => {
                app.local = local;
                true
            }
            None => false,
        }
    }

    /// Expand or collapse a component.
    ///
    /// Collapsing the foundation collapses every component of the app;
    /// expanding it expands the foundation only.
    pub fn set_component_open(
        &mut self,
        app_id: &str,
        component_id: &str,
        is_opened: bool,
        is_foundation: bool,
    ) -> Result<(), SceneError> {
        let app = self
            .apps
            .get_mut(app_id)
            .ok_or_else(|| SceneError::ApplicationNotOpen(app_id.to_string()))?;
        if is_opened {
            app.open_components.insert(component_id.to_string());
        } else if is_foundation {
            app.open_components.clear();
        } else {
            app.open_components.remove(component_id);
        }
        Ok(())
    }

    pub fn set_open_components(&mut self, app_id: &str, ids: BTreeSet<String>) -> Result<(), SceneError> {
        let app = self
            .apps
            .get_mut(app_id)
            .ok_or_else(|| SceneError::ApplicationNotOpen(app_id.to_string()))?;
        app.open_components = ids;
        Ok(())
    }

    pub fn set_transparent(&mut self, app_id: &str, ids: &[String], is_transparent: bool) -> Result<(), SceneError> {
        let app = self
            .apps
            .get_mut(app_id)
            .ok_or_else(|| SceneError::ApplicationNotOpen(app_id.to_string()))?;
        for id in ids {
            if is_transparent {
                app.transparent_components.insert(id.clone());
            } else {
                app.transparent_components.remove(id);
            }
        }
        Ok(())
    }

    pub fn set_transparent_components(&mut self, app_id: &str, ids: BTreeSet<String>) -> Result<(), SceneError> {
        let app = self
            .apps
            .get_mut(app_id)
            .ok_or_else(|| SceneError::ApplicationNotOpen(app_id.to_string()))?;
        app.transparent_components = ids;
        Ok(())
    }

    // ── Highlights ───────────────────────────────────────────────

    pub fn highlights(&self) -> &HighlightTable {
        &self.highlights
    }

    pub fn is_highlighted(&self, entity: &EntityReference) -> bool {
        self.highlights.is_highlighted(entity)
    }

    /// Apply a highlight if its entity is resolvable. Returns the entities
    /// cleared by the single-highlight rule, or `None` if the entity is
    /// unknown or its application is not open.
    pub fn highlight(&mut self, record: HighlightRecord, multi_highlight: bool) -> Option<Vec<EntityReference>> {
        let entity = record.reference();
        if !self.entity_in_open_scene(&entity) {
            return None;
        }
        Some(self.highlights.highlight(record, multi_highlight))
    }

    pub fn unhighlight(&mut self, entity: &EntityReference) -> Option<HighlightRecord> {
        self.highlights.unhighlight(entity)
    }

    pub fn clear_highlights_of(&mut self, user_id: Uuid) -> usize {
        self.highlights.clear_user(user_id)
    }

    pub fn clear_all_highlights(&mut self) -> usize {
        self.highlights.clear()
    }

    /// Replace the table with the active records among `records`.
    pub fn replace_highlights(&mut self, records: impl IntoIterator<Item = HighlightRecord>) {
        self.highlights.clear();
        for record in records {
            if record.is_highlighted && self.entity_in_open_scene(&record.reference()) {
                self.highlights.highlight(record, true);
            }
        }
    }

    // ── Entity resolution ────────────────────────────────────────

    /// Whether `entity` exists and, if app-scoped, its application is open.
    pub fn entity_in_open_scene(&self, entity: &EntityReference) -> bool {
        if entity.entity_type.is_app_scoped() {
            if let Some(app_id) = &entity.app_id {
                if !self.apps.contains_key(app_id) {
                    return false;
                }
            }
        }
        match &self.landscape {
            None => true,
            Some(landscape) => landscape.contains(entity),
        }
    }

    /// Resolve an anchor that is addressed without an application id.
    pub fn resolve_anchor(&self, entity_type: EntityType, entity_id: &str) -> bool {
        let Some(landscape) = &self.landscape else {
            return true;
        };
        if entity_type == EntityType::ExternCommunication {
            return landscape.extern_communications.contains(entity_id);
        }
        landscape
            .owning_application(entity_type, entity_id, self.apps.keys())
            .is_some()
    }

    // ── Detached menus ───────────────────────────────────────────

    /// Add a detached menu. Menus whose anchor cannot be resolved are
    /// dropped and `false` is returned.
    pub fn detach_menu(&mut self, menu: DetachedMenu) -> bool {
        if !self.resolve_anchor(menu.entity_type, &menu.entity_id) {
            log::debug!(
                "Dropping detached menu {}: anchor {}:{} not in scene",
                menu.object_id,
                menu.entity_type,
                menu.entity_id
            );
            return false;
        }
        self.menus.insert(menu.object_id.clone(), menu);
        true
    }

    pub fn close_menu(&mut self, object_id: &str) -> Option<DetachedMenu> {
        self.menus.remove(object_id)
    }

    pub fn menu(&self, object_id: &str) -> Option<&DetachedMenu> {
        self.menus.get(object_id)
    }

    pub fn menus(&self) -> impl Iterator<Item = &DetachedMenu> {
        self.menus.values()
    }

    pub fn menu_count(&self) -> usize {
        self.menus.len()
    }

    pub fn clear_menus(&mut self) {
        self.menus.clear();
    }

    /// Make every menu owned by `user_id` free-floating.
    pub fn release_menus_of(&mut self, user_id: Uuid) -> usize {
        let mut released = 0;
        for menu in self.menus.values_mut() {
            if menu.owner_user_id == Some(user_id) {
                menu.owner_user_id = None;
                released += 1;
            }
        }
        released
    }

    // ── Movable objects ──────────────────────────────────────────

    pub fn object_kind(&self, object_id: &str) -> Option<MovableObject> {
        if self.apps.contains_key(object_id) {
            Some(MovableObject::Application)
        } else if self.menus.contains_key(object_id) {
            Some(MovableObject::DetachedMenu)
        } else {
            None
        }
    }

    /// Move an application or detached menu to a world transform.
    pub fn set_object_transform(&mut self, object_id: &str, world: &Transform) -> Option<MovableObject> {
        if self.set_app_world_transform(object_id, world) {
            return Some(MovableObject::Application);
        }
        let menu = self.menus.get_mut(object_id)?;
        menu.set_transform(world);
        Some(MovableObject::DetachedMenu)
    }

    pub fn object_transform(&self, object_id: &str) -> Option<Transform> {
        self.app_world_transform(object_id)
            .or_else(|| self.menus.get(object_id).map(|m| m.transform()))
    }

    // ── Popups and annotations ───────────────────────────────────

    pub fn popups(&self) -> &[PopupRef] {
        &self.popups
    }

    /// Replace the shared popups, dropping those with unresolvable anchors.
    pub fn set_popups(&mut self, popups: Vec<PopupRef>) -> usize {
        let before = popups.len();
        self.popups = popups
            .into_iter()
            .filter(|p| self.resolve_anchor(p.entity_type, &p.entity_id))
            .collect();
        before - self.popups.len()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Replace the shared annotations, dropping those with unresolvable anchors.
    pub fn set_annotations(&mut self, annotations: Vec<Annotation>) -> usize {
        let before = annotations.len();
        self.annotations = annotations
            .into_iter()
            .filter(|a| match (&a.entity_type, &a.entity_id) {
                (Some(t), Some(id)) => self.resolve_anchor(*t, id),
                _ => true,
            })
            .collect();
        before - self.annotations.len()
    }

    /// Reset to an empty room, keeping landscape, root and camera.
    pub fn clear(&mut self) {
        self.apps.clear();
        self.highlights.clear();
        self.menus.clear();
        self.popups.clear();
        self.annotations.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::landscape::ApplicationModel;
    use crate::math::{Quaternion, Vec3};

    fn landscape() -> Landscape {
        Landscape::new("tok")
            .with_application(
                ApplicationModel::new("shop", "shop-root")
                    .with_components(["shop.api"])
                    .with_classes(["Cart"]),
            )
            .with_extern_communications(["shop=>billing"])
    }

    fn menu(id: &str, entity_type: EntityType, entity_id: &str) -> DetachedMenu {
        DetachedMenu {
            object_id: id.into(),
            owner_user_id: None,
            entity_id: entity_id.into(),
            entity_type,
            position: Vec3::ZERO,
            quaternion: Quaternion::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    #[test]
    fn test_open_unknown_app_rejected() {
        let mut scene = Scene::with_landscape(landscape());
        let err = scene.open_app("ghost", &Transform::IDENTITY).unwrap_err();
        assert_eq!(err, SceneError::UnknownApplication("ghost".into()));
    }

    #[test]
    fn test_open_twice_updates_transform() {
        let mut scene = Scene::with_landscape(landscape());
        assert!(scene.open_app("shop", &Transform::IDENTITY).unwrap());
        let moved = Transform::at(Vec3::new(5.0, 0.0, 0.0));
        assert!(!scene.open_app("shop", &moved).unwrap());
        assert_eq!(scene.open_app_count(), 1);
        assert!(scene.app_world_transform("shop").unwrap().approx_eq(&moved));
    }

    #[test]
    fn test_world_transform_through_root() {
        let mut scene = Scene::new();
        scene.set_root(Transform::at(Vec3::new(10.0, 0.0, 0.0)));
        let world = Transform::at(Vec3::new(1.0, 2.0, 3.0));
        scene.open_app("a", &world).unwrap();
        assert!(scene.app("a").unwrap().local.position.approx_eq(&Vec3::new(-9.0, 2.0, 3.0)));
        assert!(scene.app_world_transform("a").unwrap().approx_eq(&world));
    }

    #[test]
    fn test_foundation_collapse_clears_all() {
        let mut scene = Scene::with_landscape(landscape());
        scene.open_app("shop", &Transform::IDENTITY).unwrap();
        scene.set_component_open("shop", "shop-root", true, true).unwrap();
        scene.set_component_open("shop", "shop.api", true, false).unwrap();
        assert_eq!(scene.app("shop").unwrap().open_components.len(), 2);

        scene.set_component_open("shop", "shop-root", false, true).unwrap();
        assert!(scene.app("shop").unwrap().open_components.is_empty());
    }

    #[test]
    fn test_component_update_on_closed_app_errors() {
        let mut scene = Scene::new();
        assert!(scene.set_component_open("x", "c", true, false).is_err());
    }

    #[test]
    fn test_close_app_drops_its_highlights() {
        let mut scene = Scene::with_landscape(landscape());
        scene.open_app("shop", &Transform::IDENTITY).unwrap();
        let entity = EntityReference::in_app("shop", EntityType::Clazz, "Cart");
        scene
            .highlight(HighlightRecord::new(&entity, Uuid::nil(), Color::default()), false)
            .unwrap();
        assert!(scene.is_highlighted(&entity));
        scene.close_app("shop");
        assert!(!scene.is_highlighted(&entity));
    }

    #[test]
    fn test_highlight_requires_open_app() {
        let mut scene = Scene::with_landscape(landscape());
        let entity = EntityReference::in_app("shop", EntityType::Clazz, "Cart");
        let result = scene.highlight(HighlightRecord::new(&entity, Uuid::nil(), Color::default()), false);
        assert!(result.is_none());
    }

    #[test]
    fn test_detach_menu_requires_anchor() {
        let mut scene = Scene::with_landscape(landscape());
        assert!(!scene.detach_menu(menu("m1", EntityType::Clazz, "Cart")));
        scene.open_app("shop", &Transform::IDENTITY).unwrap();
        assert!(scene.detach_menu(menu("m1", EntityType::Clazz, "Cart")));
        assert!(scene.detach_menu(menu("m2", EntityType::ExternCommunication, "shop=>billing")));
        assert!(!scene.detach_menu(menu("m3", EntityType::Clazz, "Gone")));
        assert_eq!(scene.menu_count(), 2);
    }

    #[test]
    fn test_permissive_without_landscape() {
        let mut scene = Scene::new();
        assert!(scene.detach_menu(menu("m1", EntityType::Clazz, "anything")));
        assert_eq!(scene.object_kind("m1"), Some(MovableObject::DetachedMenu));
    }

    #[test]
    fn test_release_menus_of_user() {
        let user = Uuid::new_v4();
        let mut scene = Scene::new();
        let mut m = menu("m1", EntityType::Component, "c");
        m.owner_user_id = Some(user);
        scene.detach_menu(m);
        assert_eq!(scene.release_menus_of(user), 1);
        assert_eq!(scene.menu("m1").unwrap().owner_user_id, None);
    }

    #[test]
    fn test_set_object_transform_dispatches() {
        let mut scene = Scene::new();
        scene.open_app("a", &Transform::IDENTITY).unwrap();
        scene.detach_menu(menu("m", EntityType::Component, "c"));
        let t = Transform::at(Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(scene.set_object_transform("a", &t), Some(MovableObject::Application));
        assert_eq!(scene.set_object_transform("m", &t), Some(MovableObject::DetachedMenu));
        assert_eq!(scene.set_object_transform("zzz", &t), None);
        assert!(scene.object_transform("m").unwrap().approx_eq(&t));
    }
}
