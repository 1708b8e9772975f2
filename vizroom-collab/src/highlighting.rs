//! Highlighting synchronizer.
//!
//! Local highlight changes are applied to the scene first and then returned
//! as the [`HighlightingUpdate`] to broadcast. Remote updates are applied
//! under the same single/multi-highlight rule, tagged with the sender's
//! color, so every client converges on the same table.

use uuid::Uuid;

use vizroom_core::{Color, EntityReference, HighlightRecord, Scene};

use crate::protocol::{HighlightingUpdate, RoomEvent};

#[derive(Debug, Clone, Copy, Default)]
pub struct HighlightingSynchronizer {
    multi_highlight: bool,
}

impl HighlightingSynchronizer {
    pub fn new(multi_highlight: bool) -> Self {
        Self { multi_highlight }
    }

    pub fn multi_highlight(&self) -> bool {
        self.multi_highlight
    }

    pub fn set_multi_highlight(&mut self, enabled: bool) {
        self.multi_highlight = enabled;
    }

    /// Highlight `entity` if it is not highlighted, unhighlight it otherwise.
    pub fn toggle_highlight(
        &self,
        scene: &mut Scene,
        entity: &EntityReference,
        user_id: Uuid,
        color: Color,
    ) -> Option<HighlightingUpdate> {
        if scene.is_highlighted(entity) {
            self.unhighlight(scene, entity)
        } else {
            self.highlight(scene, entity, user_id, color)
        }
    }

    /// Returns `None` when the entity cannot be resolved in the open scene.
    pub fn highlight(
        &self,
        scene: &mut Scene,
        entity: &EntityReference,
        user_id: Uuid,
        color: Color,
    ) -> Option<HighlightingUpdate> {
        let record = HighlightRecord::new(entity, user_id, color);
        scene.highlight(record, self.multi_highlight)?;
        Some(update_for(entity, true))
    }

    pub fn unhighlight(&self, scene: &mut Scene, entity: &EntityReference) -> Option<HighlightingUpdate> {
        scene.unhighlight(entity)?;
        Some(update_for(entity, false))
    }

    /// Apply a `highlighting_update` received from `sender`.
    pub fn apply_remote(&self, scene: &mut Scene, sender: Uuid, color: Color, update: &HighlightingUpdate) -> bool {
        let entity = update.entity();
        if update.is_highlighted {
            let record = HighlightRecord::new(&entity, sender, color);
            scene.highlight(record, self.multi_highlight).is_some()
        } else {
            scene.unhighlight(&entity).is_some()
        }
    }

    /// Clear every highlight in the room; returns the event to broadcast.
    pub fn remove_all(&self, scene: &mut Scene) -> RoomEvent {
        let cleared = scene.clear_all_highlights();
        log::debug!("Removed {cleared} highlights");
        RoomEvent::AllHighlightsReset
    }

    pub fn apply_remote_reset(&self, scene: &mut Scene) -> usize {
        scene.clear_all_highlights()
    }

    /// Drop the highlights of a participant that left.
    pub fn clear_participant(&self, scene: &mut Scene, user_id: Uuid) -> usize {
        scene.clear_highlights_of(user_id)
    }
}

fn update_for(entity: &EntityReference, is_highlighted: bool) -> HighlightingUpdate {
    let entity = entity.normalized();
    HighlightingUpdate {
        app_id: entity.app_id,
        entity_type: entity.entity_type,
        entity_id: entity.entity_id,
        is_highlighted,
    }
}
