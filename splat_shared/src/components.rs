//! Sandbox component types.
//!
//! Every record here is plain data. Behavior lives in the server systems;
//! the client only mirrors these tables from snapshots.

use serde::{Deserialize, Serialize};

use crate::{
    ecs::Marker,
    math::{Quat, Vec3},
};

/// World-space position (meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Vec3> for Position {
    fn from(v: Vec3) -> Self {
        Self {
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

impl From<Position> for Vec3 {
    fn from(p: Position) -> Self {
        Vec3::new(p.x, p.y, p.z)
    }
}

/// Orientation quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Rotation {
    fn default() -> Self {
        Quat::IDENTITY.into()
    }
}

impl From<Quat> for Rotation {
    fn from(q: Quat) -> Self {
        Self {
            x: q.x,
            y: q.y,
            z: q.z,
            w: q.w,
        }
    }
}

impl From<Rotation> for Quat {
    fn from(r: Rotation) -> Self {
        Quat::new(r.x, r.y, r.z, r.w)
    }
}

/// Collision/render shape. Exactly one variant per physical entity.
///
/// Cylinders are aligned with the vertical axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Shape {
    Box { width: f32, height: f32, depth: f32 },
    Sphere { radius: f32 },
    Cylinder { radius: f32, height: f32 },
}

/// Physics-enabled marker with the body mass (kg). Mass `<= 0` means immovable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsBody {
    pub mass: f32,
}

/// Immovable body regardless of mass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Static;
impl Marker for Static {}

/// Presentation color as `0xRRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub value: u32,
}

/// Presentation model reference, opaque to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub id: u8,
}

impl ModelRef {
    pub const CRATE: ModelRef = ModelRef { id: 1 };
    pub const PLAYER: ModelRef = ModelRef { id: 2 };
    pub const MAT: ModelRef = ModelRef { id: 3 };
}

/// "This entity is you." Only ever present in a join reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Owner;
impl Marker for Owner {}

/// Per-player gameplay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub can_jump: bool,
    pub num_balls: u32,
}

/// Ball that can be picked up and thrown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Projectile {
    /// Set on the first contact with anything that is not a player.
    pub has_landed_once: bool,
}

/// One-shot force applied when the body is created, then removed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PendingImpulse {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Vec3> for PendingImpulse {
    fn from(v: Vec3) -> Self {
        Self {
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

impl From<PendingImpulse> for Vec3 {
    fn from(p: PendingImpulse) -> Self {
        Vec3::new(p.x, p.y, p.z)
    }
}

/// Ask viewers to draw this entity's collider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DebugCollider;
impl Marker for DebugCollider {}
