//! Gameplay rules.
//!
//! Runs once per tick after the physics writeback: first the contacts that
//! started during the step, then every in-game session's intent. Anything
//! referring to an entity that no longer exists is skipped.

use splat_shared::{
    components::{Player, Position, Projectile},
    config::GameplayConfig,
    ecs::{EntityId, World},
    event::{ContactEvent, EventBus},
    math::Vec3,
    net::InputIntent,
    physics::PhysicsBackend,
};
use tracing::debug;

use crate::{physics::PhysicsAdapter, spawn};

/// Drains the tick's contact events.
///
/// Players become grounded on contacts pushing them upward and are knocked
/// back by projectiles; projectiles remember their first non-player contact.
pub fn apply_contacts<B: PhysicsBackend>(
    world: &mut World,
    physics: &mut PhysicsAdapter<B>,
    events: &mut EventBus,
    cfg: &GameplayConfig,
) {
    for contact in events.drain::<ContactEvent>() {
        let other_is_player = world.has::<Player>(contact.other);
        let other_is_projectile = world.has::<Projectile>(contact.other);

        if let Some(player) = world.get_mut::<Player>(contact.entity) {
            if contact.normal.y > cfg.ground_normal_threshold {
                player.can_jump = true;
            }
            if other_is_projectile {
                physics.apply_force(contact.entity, contact.normal * cfg.knockback);
                debug!(player = ?contact.entity, ball = ?contact.other, "Knockback");
            }
        }

        if !other_is_player {
            if let Some(projectile) = world.get_mut::<Projectile>(contact.entity) {
                projectile.has_landed_once = true;
            }
        }
    }
}

/// Locomotion force for one tick. Zero input gives zero force.
pub fn locomotion_force(intent: &InputIntent, cfg: &GameplayConfig) -> Vec3 {
    let vertical = (f32::from(u8::from(intent.jump)) - f32::from(u8::from(intent.crouch)))
        * cfg.vertical_force_factor;
    let direction = Vec3::new(intent.move_x, vertical, intent.move_z).normalize_or_zero();
    direction * cfg.move_force
}

fn eye_point(world: &World, entity: EntityId, cfg: &GameplayConfig) -> Option<Vec3> {
    let position = Vec3::from(*world.get::<Position>(entity)?);
    Some(position + Vec3::new(0.0, cfg.eye_height, 0.0))
}

/// Applies each player's intent: locomotion, jump, pickup, refill, throw.
pub fn apply_intents<B: PhysicsBackend>(
    world: &mut World,
    physics: &mut PhysicsAdapter<B>,
    intents: &[(EntityId, InputIntent)],
    cfg: &GameplayConfig,
) {
    for (entity, intent) in intents {
        if world.has::<Player>(*entity) {
            apply_intent(world, physics, *entity, intent, cfg);
        }
    }
}

fn apply_intent<B: PhysicsBackend>(
    world: &mut World,
    physics: &mut PhysicsAdapter<B>,
    entity: EntityId,
    intent: &InputIntent,
    cfg: &GameplayConfig,
) {
    let force = locomotion_force(intent, cfg);
    if force != Vec3::ZERO {
        physics.apply_force(entity, force);
    }

    if intent.jump {
        jump(world, physics, entity, cfg);
    }

    let aim = intent.aim_direction.normalize_or_zero();

    if intent.interact && aim != Vec3::ZERO {
        pick_up(world, physics, entity, aim, cfg);
    }

    if intent.secondary {
        if let Some(player) = world.get_mut::<Player>(entity) {
            player.num_balls = 1;
        }
    }

    if intent.primary && aim != Vec3::ZERO {
        throw(world, entity, aim, cfg);
    }
}

fn jump<B: PhysicsBackend>(
    world: &mut World,
    physics: &mut PhysicsAdapter<B>,
    entity: EntityId,
    cfg: &GameplayConfig,
) {
    let Some(player) = world.get_mut::<Player>(entity) else {
        return;
    };
    let grounded = std::mem::replace(&mut player.can_jump, false);
    if !grounded {
        return;
    }
    if let Some(velocity) = physics.linear_velocity(entity) {
        physics.set_linear_velocity(
            entity,
            Vec3::new(velocity.x, cfg.jump_speed, velocity.z),
        );
    }
}

fn pick_up<B: PhysicsBackend>(
    world: &mut World,
    physics: &mut PhysicsAdapter<B>,
    entity: EntityId,
    aim: Vec3,
    cfg: &GameplayConfig,
) {
    let Some(eye) = eye_point(world, entity, cfg) else {
        return;
    };
    let origin = eye + aim * cfg.pickup_margin;
    let reach = cfg.pickup_range - cfg.pickup_margin;
    let Some((hit, _)) = physics.cast_ray(origin, aim, reach, Some(entity)) else {
        return;
    };
    if !world.has::<Projectile>(hit) {
        return;
    }

    // Drop the body with the entity so later rays this tick miss it.
    world.despawn(hit);
    physics.detach(hit);
    if let Some(player) = world.get_mut::<Player>(entity) {
        player.num_balls += 1;
        debug!(player = ?entity, ball = ?hit, balls = player.num_balls, "Picked up ball");
    }
}

fn throw(world: &mut World, entity: EntityId, aim: Vec3, cfg: &GameplayConfig) {
    let Some(player) = world.get_mut::<Player>(entity) else {
        return;
    };
    if player.num_balls == 0 {
        return;
    }
    player.num_balls -= 1;

    let Some(eye) = eye_point(world, entity, cfg) else {
        return;
    };
    let ball = spawn::spawn_projectile(
        world,
        eye + aim * cfg.throw_offset,
        Some(aim * cfg.throw_speed),
        cfg,
    );
    debug!(player = ?entity, ball = ?ball, "Threw ball");
}
