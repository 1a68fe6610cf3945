//! Rapier implementation of [`PhysicsBackend`].
//!
//! Owns a complete Rapier world. Handles handed out to the simulation are
//! plain counters; the Rapier arena handles stay private to this module.

use std::collections::{HashMap, HashSet};

use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::*;
use splat_shared::{
    components::Shape,
    math::{Quat, Vec3},
    physics::{BodyDesc, BodyHandle, Contact, PhysicsBackend, PhysicsConfig, RayHit, Surface},
};
use tracing::debug;

/// Manifold points deeper than this count as touching.
const CONTACT_TOLERANCE: f32 = 1.0e-3;

/// Smallest half-extent accepted for a collider.
const MIN_EXTENT: f32 = 1.0e-3;

pub struct RapierBackend {
    cfg: PhysicsConfig,
    gravity: Vector<Real>,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: BroadPhaseBvh,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,

    next_handle: u64,
    handles: HashMap<BodyHandle, RigidBodyHandle>,
    reverse: HashMap<RigidBodyHandle, BodyHandle>,
    reporting: HashSet<BodyHandle>,
    /// Pairs touching at the end of the previous step, ordered low/high.
    touching: HashSet<(BodyHandle, BodyHandle)>,
}

impl RapierBackend {
    pub fn new(cfg: PhysicsConfig) -> Self {
        Self {
            cfg,
            gravity: vector![cfg.gravity.x, cfg.gravity.y, cfg.gravity.z],
            params: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            next_handle: 1,
            handles: HashMap::new(),
            reverse: HashMap::new(),
            reporting: HashSet::new(),
            touching: HashSet::new(),
        }
    }

    fn collider_for(&self, desc: &BodyDesc) -> Collider {
        let builder = match desc.shape {
            Shape::Box {
                width,
                height,
                depth,
            } => ColliderBuilder::cuboid(
                (width / 2.0).max(MIN_EXTENT),
                (height / 2.0).max(MIN_EXTENT),
                (depth / 2.0).max(MIN_EXTENT),
            ),
            Shape::Sphere { radius } => ColliderBuilder::ball(radius.max(MIN_EXTENT)),
            Shape::Cylinder { radius, height } => {
                ColliderBuilder::cylinder((height / 2.0).max(MIN_EXTENT), radius.max(MIN_EXTENT))
            }
        };

        let builder = match desc.surface {
            Surface::Default => builder.friction(self.cfg.default_friction),
            Surface::Ground => builder
                .friction(self.cfg.ground_friction)
                .restitution(self.cfg.ground_restitution),
            Surface::Slippery => builder
                .friction(0.0)
                .friction_combine_rule(CoefficientCombineRule::Min),
        };

        if desc.fixed {
            builder.build()
        } else {
            builder.mass(desc.mass).build()
        }
    }

    fn body_of_collider(&self, collider: ColliderHandle) -> Option<BodyHandle> {
        let parent = self.colliders.get(collider)?.parent()?;
        self.reverse.get(&parent).copied()
    }

    fn rigid_body(&self, body: BodyHandle) -> Option<&RigidBody> {
        self.handles.get(&body).and_then(|h| self.bodies.get(*h))
    }

    fn rigid_body_mut(&mut self, body: BodyHandle) -> Option<&mut RigidBody> {
        let handle = *self.handles.get(&body)?;
        self.bodies.get_mut(handle)
    }

    fn collect_started_contacts(&mut self, out: &mut Vec<Contact>) {
        let mut now = HashSet::new();
        for pair in self.narrow_phase.contact_pairs() {
            let (Some(a), Some(b)) = (
                self.body_of_collider(pair.collider1),
                self.body_of_collider(pair.collider2),
            ) else {
                continue;
            };
            if !self.reporting.contains(&a) && !self.reporting.contains(&b) {
                continue;
            }
            let Some(manifold) = pair
                .manifolds
                .iter()
                .find(|m| m.points.iter().any(|p| p.dist <= CONTACT_TOLERANCE))
            else {
                continue;
            };

            let key = if a <= b { (a, b) } else { (b, a) };
            now.insert(key);
            if !self.touching.contains(&key) {
                let n = manifold.data.normal;
                out.push(Contact {
                    a,
                    b,
                    normal: Vec3::new(n.x, n.y, n.z),
                });
            }
        }
        self.touching = now;
    }
}

fn to_rapier_rotation(q: Quat) -> UnitQuaternion<Real> {
    let q = q.normalized();
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
}

impl PhysicsBackend for RapierBackend {
    fn insert_body(&mut self, desc: &BodyDesc) -> BodyHandle {
        let p = desc.position;
        let pose = Isometry::from_parts(
            Translation3::new(p.x, p.y, p.z),
            to_rapier_rotation(desc.rotation),
        );

        let mut builder = if desc.fixed {
            RigidBodyBuilder::fixed()
        } else {
            RigidBodyBuilder::dynamic()
        };
        builder = builder.pose(pose).linear_damping(self.cfg.linear_damping);
        if desc.upright {
            builder = builder.enabled_rotations(false, true, false);
        }
        if matches!(desc.shape, Shape::Sphere { .. }) && !desc.fixed {
            builder = builder.ccd_enabled(true);
        }

        let rb = self.bodies.insert(builder.build());
        let collider = self.collider_for(desc);
        self.colliders
            .insert_with_parent(collider, rb, &mut self.bodies);

        let handle = BodyHandle(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(handle, rb);
        self.reverse.insert(rb, handle);
        if desc.report_contacts {
            self.reporting.insert(handle);
        }
        debug!(body = ?handle, shape = ?desc.shape, fixed = desc.fixed, "Inserted body");
        handle
    }

    fn remove_body(&mut self, body: BodyHandle) -> bool {
        let Some(rb) = self.handles.remove(&body) else {
            return false;
        };
        self.reverse.remove(&rb);
        self.reporting.remove(&body);
        self.touching.retain(|(a, b)| *a != body && *b != body);
        self.bodies.remove(
            rb,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        true
    }

    fn contains(&self, body: BodyHandle) -> bool {
        self.handles.contains_key(&body)
    }

    fn body_count(&self) -> usize {
        self.handles.len()
    }

    fn step(&mut self, dt_sec: f32, contacts: &mut Vec<Contact>) {
        self.params.dt = dt_sec;
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            &(),
            &(),
        );

        // User forces persist in Rapier until cleared.
        for (_, rb) in self.bodies.iter_mut() {
            rb.reset_forces(false);
        }

        self.collect_started_contacts(contacts);
    }

    fn pose(&self, body: BodyHandle) -> Option<(Vec3, Quat)> {
        let rb = self.rigid_body(body)?;
        let t = rb.translation();
        let r = rb.rotation();
        Some((Vec3::new(t.x, t.y, t.z), Quat::new(r.i, r.j, r.k, r.w)))
    }

    fn add_force(&mut self, body: BodyHandle, force: Vec3) -> bool {
        if !force.is_finite() {
            return false;
        }
        match self.rigid_body_mut(body) {
            Some(rb) if rb.is_dynamic() => {
                rb.add_force(vector![force.x, force.y, force.z], true);
                true
            }
            _ => false,
        }
    }

    fn linear_velocity(&self, body: BodyHandle) -> Option<Vec3> {
        let v = self.rigid_body(body)?.linvel();
        Some(Vec3::new(v.x, v.y, v.z))
    }

    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) -> bool {
        if !velocity.is_finite() {
            return false;
        }
        match self.rigid_body_mut(body) {
            Some(rb) if rb.is_dynamic() => {
                rb.set_linvel(vector![velocity.x, velocity.y, velocity.z], true);
                true
            }
            _ => false,
        }
    }

    fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        exclude: Option<BodyHandle>,
    ) -> Option<RayHit> {
        let mut filter = QueryFilter::default();
        if let Some(rb) = exclude.and_then(|b| self.handles.get(&b)) {
            filter = filter.exclude_rigid_body(*rb);
        }
        let query = self.broad_phase.as_query_pipeline(
            self.narrow_phase.query_dispatcher(),
            &self.bodies,
            &self.colliders,
            filter,
        );
        let ray = Ray::new(
            point![origin.x, origin.y, origin.z],
            vector![direction.x, direction.y, direction.z],
        );
        let (collider, distance) = query.cast_ray(&ray, max_distance.max(0.0), true)?;
        Some(RayHit {
            body: self.body_of_collider(collider)?,
            distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor() -> BodyDesc {
        BodyDesc::for_shape(
            Shape::Box {
                width: 15.0,
                height: 1.0,
                depth: 15.0,
            },
            Vec3::new(0.0, -0.5, 0.0),
            Quat::IDENTITY,
            0.0,
        )
    }

    fn ball(at: Vec3) -> BodyDesc {
        BodyDesc {
            report_contacts: true,
            ..BodyDesc::for_shape(Shape::Sphere { radius: 0.3 }, at, Quat::IDENTITY, 5.0)
        }
    }

    #[test]
    fn dropped_ball_lands_and_reports_contact() {
        let mut physics = RapierBackend::new(PhysicsConfig::default());
        let floor = physics.insert_body(&floor());
        let ball = physics.insert_body(&ball(Vec3::new(0.0, 1.0, 0.0)));

        let mut contacts = Vec::new();
        for _ in 0..90 {
            physics.step(1.0 / 30.0, &mut contacts);
        }

        let hit = contacts
            .iter()
            .find(|c| (c.a == ball && c.b == floor) || (c.a == floor && c.b == ball))
            .expect("ball/floor contact");
        assert!(hit.normal.y.abs() > 0.5);

        let (pos, _) = physics.pose(ball).unwrap();
        assert!((pos.y - 0.3).abs() < 0.1, "ball rests on floor, y = {}", pos.y);
    }

    #[test]
    fn forces_act_for_one_step_only() {
        let mut physics = RapierBackend::new(PhysicsConfig {
            gravity: Vec3::ZERO,
            linear_damping: 0.0,
            ..PhysicsConfig::default()
        });
        let ball = physics.insert_body(&ball(Vec3::ZERO));
        let mut contacts = Vec::new();

        assert!(physics.add_force(ball, Vec3::new(150.0, 0.0, 0.0)));
        physics.step(1.0 / 30.0, &mut contacts);
        let v1 = physics.linear_velocity(ball).unwrap().x;
        assert!((v1 - 1.0).abs() < 0.05, "v1 = {v1}");

        physics.step(1.0 / 30.0, &mut contacts);
        let v2 = physics.linear_velocity(ball).unwrap().x;
        assert!((v2 - v1).abs() < 1e-3, "v2 = {v2}");
    }

    #[test]
    fn ray_hits_first_body_and_honors_exclusion() {
        let mut physics = RapierBackend::new(PhysicsConfig::default());
        let near = physics.insert_body(&BodyDesc {
            fixed: true,
            ..ball(Vec3::new(0.0, 0.0, 2.0))
        });
        let far = physics.insert_body(&BodyDesc {
            fixed: true,
            ..ball(Vec3::new(0.0, 0.0, 4.0))
        });
        physics.step(1.0 / 30.0, &mut Vec::new());

        let hit = physics
            .cast_ray(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0), 10.0, None)
            .unwrap();
        assert_eq!(hit.body, near);
        assert!((hit.distance - 1.7).abs() < 1e-3);

        let hit = physics
            .cast_ray(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0), 10.0, Some(near))
            .unwrap();
        assert_eq!(hit.body, far);

        assert!(physics
            .cast_ray(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0), 1.0, None)
            .is_none());
    }

    #[test]
    fn removing_unknown_body_is_a_no_op() {
        let mut physics = RapierBackend::new(PhysicsConfig::default());
        let body = physics.insert_body(&floor());
        assert!(physics.remove_body(body));
        assert!(!physics.remove_body(body));
        assert!(!physics.contains(body));
        assert_eq!(physics.body_count(), 0);
    }
}
