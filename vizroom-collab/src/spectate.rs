//! Spectate controller: slave the local camera to another participant's.
//!
//! `activate` remembers where the local camera was, `tick` copies the
//! target's camera every frame, `deactivate` puts the camera back. Each
//! transition returns the `spectating_update` to broadcast.

use uuid::Uuid;

use vizroom_core::{Pose, Scene};

use crate::presence::PresenceRegistry;
use crate::protocol::{RoomEvent, SpectatingUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SpectateState {
    #[default]
    Inactive,
    Active {
        target: Uuid,
        /// Local camera before spectating started.
        start: Pose,
    },
}

#[derive(Debug, Default)]
pub struct SpectateController {
    state: SpectateState,
}

impl SpectateController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SpectateState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SpectateState::Active { .. })
    }

    pub fn target(&self) -> Option<Uuid> {
        match self.state {
            SpectateState::Active { target, .. } => Some(target),
            SpectateState::Inactive => None,
        }
    }

    /// Start spectating `target`. No-op for `None` or for `local_id` itself.
    ///
    /// Switching targets keeps the original start pose.
    pub fn activate(&mut self, scene: &Scene, local_id: Uuid, target: Option<Uuid>) -> Option<RoomEvent> {
        let target = target.filter(|t| *t != local_id)?;
        let start = match self.state {
            SpectateState::Active { start, .. } => start,
            SpectateState::Inactive => *scene.camera(),
        };
        self.state = SpectateState::Active { target, start };
        log::info!("Spectating {target}");
        Some(RoomEvent::SpectatingUpdate(SpectatingUpdate {
            is_spectating: true,
            spectated_user_id: Some(target),
        }))
    }

    /// Copy the target's camera onto the local camera.
    pub fn tick(&self, scene: &mut Scene, presence: &PresenceRegistry) -> bool {
        let SpectateState::Active { target, .. } = self.state else {
            return false;
        };
        match presence.get(target) {
            Some(participant) => {
                scene.set_camera(participant.camera);
                true
            }
            None => false,
        }
    }

    /// Stop spectating and restore the camera. No-op when inactive.
    pub fn deactivate(&mut self, scene: &mut Scene) -> Option<RoomEvent> {
        let SpectateState::Active { start, .. } = self.state else {
            return None;
        };
        scene.set_camera(start);
        self.state = SpectateState::Inactive;
        Some(RoomEvent::SpectatingUpdate(SpectatingUpdate {
            is_spectating: false,
            spectated_user_id: None,
        }))
    }

    /// Stop spectating if `user_id` was the target.
    pub fn participant_left(&mut self, scene: &mut Scene, user_id: Uuid) -> Option<RoomEvent> {
        if self.target() == Some(user_id) {
            self.deactivate(scene)
        } else {
            None
        }
    }
}
