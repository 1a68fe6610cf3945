//! Entity spawners: floor, players, balls and test content.

use rand::Rng;
use splat_shared::{
    components::{
        Color, ModelRef, PendingImpulse, PhysicsBody, Player, Position, Projectile, Rotation, Shape,
        Static,
    },
    config::GameplayConfig,
    ecs::{EntityId, World},
    math::{Quat, Vec3},
};
use tracing::debug;

pub const FLOOR_COLOR: u32 = 0xa8_99_71;
pub const BALL_COLOR: u32 = 0xb0_97_07;
pub const WALL_COLOR: u32 = 0x00_ff_00;

pub const PLAYER_RADIUS: f32 = 0.3;
pub const PLAYER_HEIGHT: f32 = 1.7;

const CRATE_MASS: f32 = 60.0;
const WALL_BRICK_MASS: f32 = 5.0;
const TEST_CONTENT_COUNT: usize = 10;

fn spawn_body(
    world: &mut World,
    shape: Shape,
    position: Vec3,
    rotation: Quat,
    mass: f32,
) -> EntityId {
    let e = world.spawn();
    world.insert(e, Position::from(position));
    world.insert(e, Rotation::from(rotation));
    world.insert(e, shape);
    world.insert(e, PhysicsBody { mass });
    e
}

fn scatter(rng: &mut impl Rng, extent: f32, y_min: f32, y_span: f32) -> Vec3 {
    Vec3::new(
        rng.gen_range(-extent..=extent),
        y_min + rng.gen::<f32>() * y_span,
        rng.gen_range(-extent..=extent),
    )
}

/// The static ground slab, top face at y = 0.
pub fn spawn_floor(world: &mut World) -> EntityId {
    let e = spawn_body(
        world,
        Shape::Box {
            width: 15.0,
            height: 1.0,
            depth: 15.0,
        },
        Vec3::new(0.0, -0.5, 0.0),
        Quat::IDENTITY,
        0.0,
    );
    world.mark::<Static>(e);
    world.insert(e, Color { value: FLOOR_COLOR });
    e
}

/// A player capsule dropped at a random spot above the floor.
pub fn spawn_player(world: &mut World, rng: &mut impl Rng, cfg: &GameplayConfig) -> EntityId {
    let e = spawn_body(
        world,
        Shape::Cylinder {
            radius: PLAYER_RADIUS,
            height: PLAYER_HEIGHT,
        },
        scatter(rng, cfg.spawn_extent, 3.0, 4.0),
        Quat::IDENTITY,
        cfg.player_mass,
    );
    world.insert(
        e,
        Color {
            value: rng.gen_range(0..=0xff_ff_ff),
        },
    );
    world.insert(e, ModelRef::PLAYER);
    world.insert(e, Player::default());
    debug!(entity = ?e, "Spawned player");
    e
}

/// A ball. `impulse` becomes its one-shot launch force.
pub fn spawn_projectile(
    world: &mut World,
    position: Vec3,
    impulse: Option<Vec3>,
    cfg: &GameplayConfig,
) -> EntityId {
    let e = spawn_body(
        world,
        Shape::Sphere {
            radius: cfg.projectile_radius,
        },
        position,
        Quat::IDENTITY,
        cfg.projectile_mass,
    );
    world.insert(e, Color { value: BALL_COLOR });
    world.insert(e, Projectile::default());
    if let Some(impulse) = impulse {
        world.insert(e, PendingImpulse::from(impulse));
    }
    e
}

pub fn spawn_crate(world: &mut World, rng: &mut impl Rng, cfg: &GameplayConfig) -> EntityId {
    let e = spawn_body(
        world,
        Shape::Box {
            width: 1.4,
            height: 1.1,
            depth: 0.7,
        },
        scatter(rng, cfg.spawn_extent, 20.0, 4.0),
        Quat::IDENTITY,
        CRATE_MASS,
    );
    world.insert(e, ModelRef::CRATE);
    e
}

/// A thin mat dropped with a random tilt.
pub fn spawn_mat(world: &mut World, rng: &mut impl Rng, cfg: &GameplayConfig) -> EntityId {
    let tilt = Quat::new(rng.gen(), rng.gen(), rng.gen(), 1.0).normalized();
    let e = spawn_body(
        world,
        Shape::Box {
            width: 1.0,
            height: 0.1,
            depth: 2.0,
        },
        scatter(rng, cfg.spawn_extent, 20.0, 4.0),
        tilt,
        CRATE_MASS,
    );
    world.insert(e, ModelRef::MAT);
    e
}

/// Loose balls lying around for players to pick up.
pub fn scatter_balls(
    world: &mut World,
    rng: &mut impl Rng,
    count: usize,
    cfg: &GameplayConfig,
) -> Vec<EntityId> {
    (0..count)
        .map(|_| {
            let at = scatter(rng, cfg.spawn_extent, 3.0, 4.0);
            let e = spawn_projectile(world, at, None, cfg);
            if let Some(p) = world.get_mut::<Projectile>(e) {
                p.has_landed_once = true;
            }
            e
        })
        .collect()
}

/// A stepped pyramid of unit bricks along the z axis: `width` bricks on the
/// bottom row, one fewer on each row above.
pub fn spawn_wall(world: &mut World, width: u32) -> Vec<EntityId> {
    let mut bricks = Vec::new();
    for row in 0..width {
        let count = width - row;
        for col in 0..count {
            let z = col as f32 * 1.1 - count as f32 / 2.0;
            let e = spawn_body(
                world,
                Shape::Box {
                    width: 1.0,
                    height: 1.0,
                    depth: 1.0,
                },
                Vec3::new(0.0, row as f32 + 0.5, z),
                Quat::IDENTITY,
                WALL_BRICK_MASS,
            );
            world.insert(e, Color { value: WALL_COLOR });
            bricks.push(e);
        }
    }
    bricks
}

/// Test entities spawned at startup and by the `reset`/`wall` console
/// commands. Each rebuild destroys the previous batch first.
#[derive(Debug, Default)]
pub struct TestContent {
    entities: Vec<EntityId>,
}

impl TestContent {
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Destroys every test entity still alive. Returns how many were.
    pub fn clear(&mut self, world: &mut World) -> usize {
        self.entities
            .drain(..)
            .filter(|e| world.despawn(*e))
            .count()
    }

    /// Crates, mats and loose balls.
    pub fn populate(&mut self, world: &mut World, rng: &mut impl Rng, cfg: &GameplayConfig) {
        self.clear(world);
        for _ in 0..TEST_CONTENT_COUNT {
            let e = spawn_crate(world, rng, cfg);
            self.entities.push(e);
        }
        for _ in 0..TEST_CONTENT_COUNT {
            let e = spawn_mat(world, rng, cfg);
            self.entities.push(e);
        }
        let balls = scatter_balls(world, rng, TEST_CONTENT_COUNT, cfg);
        self.entities.extend(balls);
        debug!(count = self.entities.len(), "Spawned test content");
    }

    pub fn build_wall(&mut self, world: &mut World, width: u32) {
        self.clear(world);
        self.entities = spawn_wall(world, width);
    }
}
