//! Configuration system.
//!
//! Loads sandbox configuration from JSON strings/files (file IO left to app).
//! Every field has a default, so a partial file only overrides what it names.

use serde::{Deserialize, Serialize};

use crate::physics::PhysicsConfig;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Server listen address, e.g. `127.0.0.1:8080`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// How often the scheduler wakes to check the accumulator.
    pub wake_interval_ms: u64,
    /// Spawn crates, mats and loose balls at startup.
    pub spawn_test_content: bool,
    /// `debug` requests toggle colliders on every physics entity, not just
    /// the caller's own.
    pub global_debug: bool,
    /// Seed for spawn randomness; `None` seeds from the OS.
    pub rng_seed: Option<u64>,
    pub physics: PhysicsConfig,
    pub gameplay: GameplayConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            tick_hz: 30,
            wake_interval_ms: 5,
            spawn_test_content: true,
            global_debug: true,
            rng_seed: None,
            physics: PhysicsConfig::default(),
            gameplay: GameplayConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Fixed step length in seconds.
    pub fn dt(&self) -> f64 {
        1.0 / f64::from(self.tick_hz.max(1))
    }
}

/// Gameplay tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameplayConfig {
    /// Locomotion force magnitude (N), applied once per tick.
    pub move_force: f32,
    /// Multiplier for the jump/crouch component of locomotion. Zero keeps
    /// locomotion horizontal.
    pub vertical_force_factor: f32,
    /// Vertical takeoff speed (m/s).
    pub jump_speed: f32,
    /// Minimum upward normal component for a contact to count as ground.
    pub ground_normal_threshold: f32,
    /// Height of the eye point above the player origin.
    pub eye_height: f32,
    /// Pickup ray starts this far in front of the eye.
    pub pickup_margin: f32,
    /// Pickup ray ends this far from the eye.
    pub pickup_range: f32,
    /// Thrown balls spawn this far along the aim direction.
    pub throw_offset: f32,
    /// Initial force on a thrown ball (N).
    pub throw_speed: f32,
    /// Force pushing a player hit by a ball (N).
    pub knockback: f32,
    pub player_mass: f32,
    pub projectile_mass: f32,
    pub projectile_radius: f32,
    /// Players spawn within `[-spawn_extent, spawn_extent]` on x and z.
    pub spawn_extent: f32,
}

impl Default for GameplayConfig {
    fn default() -> Self {
        Self {
            move_force: 500.0,
            vertical_force_factor: 0.0,
            jump_speed: 12.0,
            ground_normal_threshold: 0.5,
            eye_height: 0.8,
            pickup_margin: 1.2,
            pickup_range: 5.0,
            throw_offset: 1.1,
            throw_speed: 4000.0,
            knockback: 20000.0,
            player_mass: 30.0,
            projectile_mass: 5.0,
            projectile_radius: 0.3,
            spawn_extent: 7.0,
        }
    }
}
