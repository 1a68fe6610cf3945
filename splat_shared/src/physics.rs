//! Physics abstraction.
//!
//! The simulation talks to a rigid-body engine only through
//! [`PhysicsBackend`]. Bodies are addressed by opaque [`BodyHandle`]s; the
//! engine never learns about entities or components.

use serde::{Deserialize, Serialize};

use crate::{
    components::Shape,
    math::{Quat, Vec3},
};

/// Physics parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    pub gravity: Vec3,
    /// Linear velocity damping coefficient applied to every body.
    pub linear_damping: f32,
    pub ground_friction: f32,
    pub ground_restitution: f32,
    pub default_friction: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -24.0, 0.0),
            linear_damping: 3.0,
            ground_friction: 0.4,
            ground_restitution: 0.3,
            default_friction: 0.3,
        }
    }
}

/// Opaque body identifier. Never reused by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyHandle(pub u64);

/// Contact surface behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Surface {
    #[default]
    Default,
    /// Grippy and slightly bouncy; used for crates, mats and the floor.
    Ground,
    /// Frictionless against everything; used for player capsules.
    Slippery,
}

/// Everything a backend needs to build one body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDesc {
    pub shape: Shape,
    pub position: Vec3,
    pub rotation: Quat,
    pub mass: f32,
    pub fixed: bool,
    /// Only allow rotation about the vertical axis.
    pub upright: bool,
    pub surface: Surface,
    /// Report newly started contacts involving this body.
    pub report_contacts: bool,
}

impl BodyDesc {
    /// Derives the surface and rotation lock the sandbox uses for a shape.
    pub fn for_shape(shape: Shape, position: Vec3, rotation: Quat, mass: f32) -> Self {
        let (surface, upright) = match shape {
            Shape::Box { .. } => (Surface::Ground, false),
            Shape::Sphere { .. } => (Surface::Default, false),
            Shape::Cylinder { .. } => (Surface::Slippery, true),
        };
        Self {
            shape,
            position,
            rotation,
            mass,
            fixed: mass <= 0.0,
            upright,
            surface,
            report_contacts: false,
        }
    }
}

/// A contact that started during the last step.
///
/// `normal` is a unit vector in world space pointing from `a` towards `b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub a: BodyHandle,
    pub b: BodyHandle,
    pub normal: Vec3,
}

/// First body hit by a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub body: BodyHandle,
    /// Distance along the (unit) ray direction.
    pub distance: f32,
}

/// Rigid-body engine seam.
///
/// Forces added with [`PhysicsBackend::add_force`] act during the next
/// [`PhysicsBackend::step`] only.
pub trait PhysicsBackend: Send + Sync {
    fn insert_body(&mut self, desc: &BodyDesc) -> BodyHandle;

    /// Removes a body. Unknown handles are ignored (returns `false`).
    fn remove_body(&mut self, body: BodyHandle) -> bool;

    fn contains(&self, body: BodyHandle) -> bool;

    fn body_count(&self) -> usize;

    /// Advances the engine by `dt_sec` and appends contacts that started.
    fn step(&mut self, dt_sec: f32, contacts: &mut Vec<Contact>);

    fn pose(&self, body: BodyHandle) -> Option<(Vec3, Quat)>;

    fn add_force(&mut self, body: BodyHandle, force: Vec3) -> bool;

    fn linear_velocity(&self, body: BodyHandle) -> Option<Vec3>;

    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> bool;

    /// Casts a ray; `direction` must be unit length.
    fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        exclude: Option<BodyHandle>,
    ) -> Option<RayHit>;
}
