//! # vizroom-core: Shared room model for collaborative landscape sessions
//!
//! Holds everything both ends of a collaborative session agree on: spatial
//! primitives, entity addressing, the transmissible room snapshot and the
//! live local [`Scene`] that snapshots are taken from and restored into.
//!
//! ## Modules
//!
//! - [`math`]: `Vec3`, `Quaternion`, `Transform`, `Pose`
//! - [`color`]: participant colors from palette indices
//! - [`entity`]: `EntityType` / `EntityReference` addressing
//! - [`room`]: `SerializedRoom` and its records
//! - [`landscape`]: structure index used to resolve references
//! - [`highlight`]: single/multi-highlight table
//! - [`scene`]: live scene state

pub mod math;
pub mod color;
pub mod entity;
pub mod room;
pub mod landscape;
pub mod highlight;
pub mod scene;

pub use math::{Pose, Quaternion, Transform, Vec3};
pub use color::Color;
pub use entity::{EntityReference, EntityType};
pub use room::{
    Annotation, DetachedMenu, HighlightRecord, LandscapeRef, PopupRef, SerializedApp,
    SerializedRoom,
};
pub use landscape::{ApplicationModel, Landscape};
pub use highlight::HighlightTable;
pub use scene::{MovableObject, OpenApplication, Scene, SceneError};
