//! Physics adapter.
//!
//! Mirrors entity lifecycle into a [`PhysicsBackend`] and copies simulated
//! transforms back. The component tables stay the source of truth: bodies
//! are rebuilt from `Position`/`Rotation`/`Shape`/`PhysicsBody` whenever an
//! entity starts matching, and only the pose flows the other way.

use std::collections::{BTreeMap, HashMap};

use splat_shared::{
    components::{PendingImpulse, PhysicsBody, Player, Position, Projectile, Rotation, Shape, Static},
    ecs::{EntityId, Query, TrackedQuery, World},
    event::{ContactEvent, EventBus},
    math::Vec3,
    physics::{BodyDesc, BodyHandle, Contact, PhysicsBackend},
};
use tracing::debug;

/// Entities that own a physics body.
pub fn physics_query() -> Query {
    Query::new()
        .with::<PhysicsBody>()
        .with::<Position>()
        .with::<Rotation>()
        .with::<Shape>()
}

pub struct PhysicsAdapter<B> {
    backend: B,
    tracked: TrackedQuery,
    bodies: BTreeMap<EntityId, BodyHandle>,
    entities: HashMap<BodyHandle, EntityId>,
    contacts: Vec<Contact>,
}

impl<B: PhysicsBackend> PhysicsAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            tracked: TrackedQuery::new(physics_query()),
            bodies: BTreeMap::new(),
            entities: HashMap::new(),
            contacts: Vec::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Creates bodies for entities that started matching and removes bodies
    /// of entities that stopped matching.
    pub fn sync_lifecycle(&mut self, world: &mut World) {
        let delta = self.tracked.update(world);
        for entity in delta.exited {
            if self.detach(entity) {
                debug!(entity = ?entity, "Removed body");
            }
        }
        for entity in delta.entered {
            self.attach(world, entity);
        }
    }

    fn attach(&mut self, world: &mut World, entity: EntityId) {
        if self.bodies.contains_key(&entity) {
            return;
        }
        let (Some(position), Some(rotation), Some(shape), Some(body)) = (
            world.get::<Position>(entity),
            world.get::<Rotation>(entity),
            world.get::<Shape>(entity),
            world.get::<PhysicsBody>(entity),
        ) else {
            return;
        };

        let mut desc = BodyDesc::for_shape(
            *shape,
            (*position).into(),
            (*rotation).into(),
            body.mass,
        );
        desc.fixed |= world.has::<Static>(entity);
        desc.report_contacts = world.has::<Player>(entity) || world.has::<Projectile>(entity);

        let handle = self.backend.insert_body(&desc);
        if let Some(impulse) = world.remove::<PendingImpulse>(entity) {
            self.backend.add_force(handle, impulse.into());
        }
        self.bodies.insert(entity, handle);
        self.entities.insert(handle, entity);
        debug!(entity = ?entity, body = ?handle, fixed = desc.fixed, "Created body");
    }

    /// Removes an entity's body right away. Returns `false` if it had none.
    ///
    /// The tracked query still reports the entity as exited on the next
    /// sync, which is then a no-op.
    pub fn detach(&mut self, entity: EntityId) -> bool {
        let Some(handle) = self.bodies.remove(&entity) else {
            return false;
        };
        self.entities.remove(&handle);
        self.backend.remove_body(handle)
    }

    /// Advances the engine and queues every started contact as two
    /// [`ContactEvent`]s, one per side.
    pub fn step(&mut self, dt_sec: f32, events: &mut EventBus) {
        self.contacts.clear();
        self.backend.step(dt_sec, &mut self.contacts);

        for contact in self.contacts.drain(..) {
            let (Some(&a), Some(&b)) = (
                self.entities.get(&contact.a),
                self.entities.get(&contact.b),
            ) else {
                continue;
            };
            // The engine normal points from `a` to `b`.
            events.push(ContactEvent {
                entity: b,
                other: a,
                normal: contact.normal,
            });
            events.push(ContactEvent {
                entity: a,
                other: b,
                normal: -contact.normal,
            });
        }
    }

    /// Copies every body pose into `Position`/`Rotation`.
    pub fn write_back(&self, world: &mut World) {
        for (&entity, &handle) in &self.bodies {
            let Some((position, rotation)) = self.backend.pose(handle) else {
                continue;
            };
            if let Some(p) = world.get_mut::<Position>(entity) {
                *p = position.into();
            }
            if let Some(r) = world.get_mut::<Rotation>(entity) {
                *r = rotation.into();
            }
        }
    }

    pub fn body_of(&self, entity: EntityId) -> Option<BodyHandle> {
        self.bodies.get(&entity).copied()
    }

    pub fn entity_of(&self, body: BodyHandle) -> Option<EntityId> {
        self.entities.get(&body).copied()
    }

    /// Number of entities currently backed by a body.
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Queues a force for the next step. `false` if the entity has no
    /// movable body.
    pub fn apply_force(&mut self, entity: EntityId, force: Vec3) -> bool {
        match self.body_of(entity) {
            Some(handle) => self.backend.add_force(handle, force),
            None => false,
        }
    }

    pub fn linear_velocity(&self, entity: EntityId) -> Option<Vec3> {
        self.backend.linear_velocity(self.body_of(entity)?)
    }

    pub fn set_linear_velocity(&mut self, entity: EntityId, velocity: Vec3) -> bool {
        match self.body_of(entity) {
            Some(handle) => self.backend.set_linear_velocity(handle, velocity),
            None => false,
        }
    }

    /// First entity hit by a ray, skipping `exclude`'s body.
    ///
    /// Hits on bodies whose entity is already gone count as a miss.
    pub fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        exclude: Option<EntityId>,
    ) -> Option<(EntityId, f32)> {
        let skip = exclude.and_then(|e| self.body_of(e));
        let hit = self
            .backend
            .cast_ray(origin, direction, max_distance, skip)?;
        Some((self.entity_of(hit.body)?, hit.distance))
    }
}
