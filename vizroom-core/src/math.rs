//! Spatial primitives shared by the scene model and the wire protocol.
//!
//! Everything is `f32`, matching the precision the renderer consumes.
//! Quaternions are stored as `[x, y, z, w]` on the wire.

use serde::{Deserialize, Serialize};

/// Tolerance used for approximate comparisons of restored transforms.
pub const EPSILON: f32 = 1e-4;

/// 3D vector in scene units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const ONE: Vec3 = Vec3 { x: 1.0, y: 1.0, z: 1.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(a: [f32; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    pub fn to_array(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn add(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Component-wise product (used for scale composition).
    pub fn mul(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x * other.x, self.y * other.y, self.z * other.z)
    }

    /// Component-wise quotient. Zero components of `other` yield zero.
    pub fn div(&self, other: &Vec3) -> Vec3 {
        fn safe(a: f32, b: f32) -> f32 {
            if b == 0.0 { 0.0 } else { a / b }
        }
        Vec3::new(safe(self.x, other.x), safe(self.y, other.y), safe(self.z, other.z))
    }

    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn scaled(&self, s: f32) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Vec3) -> f32 {
        let d = self.sub(other);
        (d.x * d.x + d.y * d.y + d.z * d.z).sqrt()
    }

    pub fn approx_eq(&self, other: &Vec3) -> bool {
        self.distance(other) <= EPSILON
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Unit quaternion rotation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn from_array(a: [f32; 4]) -> Self {
        Self::new(a[0], a[1], a[2], a[3])
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }

    /// Rotation of `angle` radians around the (normalized) `axis`.
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let half = angle * 0.5;
        let s = half.sin();
        Self::new(axis.x * s, axis.y * s, axis.z * s, half.cos())
    }

    /// Hamilton product `self * other` (apply `other` first).
    pub fn mul(&self, o: &Quaternion) -> Quaternion {
        Quaternion::new(
            self.w * o.x + self.x * o.w + self.y * o.z - self.z * o.y,
            self.w * o.y - self.x * o.z + self.y * o.w + self.z * o.x,
            self.w * o.z + self.x * o.y - self.y * o.x + self.z * o.w,
            self.w * o.w - self.x * o.x - self.y * o.y - self.z * o.z,
        )
    }

    /// Inverse of a unit quaternion.
    pub fn conjugate(&self) -> Quaternion {
        Quaternion::new(-self.x, -self.y, -self.z, self.w)
    }

    pub fn normalized(&self) -> Quaternion {
        let len = (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt();
        if len == 0.0 {
            return Quaternion::IDENTITY;
        }
        Quaternion::new(self.x / len, self.y / len, self.z / len, self.w / len)
    }

    /// Rotate a vector: `v' = q v q*`.
    pub fn rotate(&self, v: &Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v).scaled(2.0);
        v.add(&t.scaled(self.w)).add(&u.cross(&t))
    }

    /// `q` and `-q` describe the same rotation.
    pub fn approx_eq(&self, other: &Quaternion) -> bool {
        let dot = self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w;
        (dot.abs() - 1.0).abs() <= EPSILON
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Camera or controller pose in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub quaternion: Quaternion,
}

impl Pose {
    pub fn new(position: Vec3, quaternion: Quaternion) -> Self {
        Self { position, quaternion }
    }

    pub fn at(position: Vec3) -> Self {
        Self { position, quaternion: Quaternion::IDENTITY }
    }
}

/// Position, rotation and scale of a movable object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub quaternion: Quaternion,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: Vec3::ZERO,
        quaternion: Quaternion::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(position: Vec3, quaternion: Quaternion, scale: Vec3) -> Self {
        Self { position, quaternion, scale }
    }

    pub fn at(position: Vec3) -> Self {
        Self { position, ..Self::IDENTITY }
    }

    /// Express `child` (local to `self`) in the parent space of `self`.
    pub fn compose(&self, child: &Transform) -> Transform {
        let position = self
            .position
            .add(&self.quaternion.rotate(&child.position.mul(&self.scale)));
        Transform {
            position,
            quaternion: self.quaternion.mul(&child.quaternion).normalized(),
            scale: self.scale.mul(&child.scale),
        }
    }

    /// Inverse of [`Transform::compose`]: express `world` relative to `self`.
    pub fn localize(&self, world: &Transform) -> Transform {
        let inv = self.quaternion.conjugate();
        let position = inv.rotate(&world.position.sub(&self.position)).div(&self.scale);
        Transform {
            position,
            quaternion: inv.mul(&world.quaternion).normalized(),
            scale: world.scale.div(&self.scale),
        }
    }

    pub fn approx_eq(&self, other: &Transform) -> bool {
        self.position.approx_eq(&other.position)
            && self.quaternion.approx_eq(&other.quaternion)
            && self.scale.approx_eq(&other.scale)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
