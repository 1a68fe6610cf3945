//! Input handling.
//!
//! A windowed client would sample keyboard and mouse here. The headless
//! client drives [`InputState`] from console commands and turns it into the
//! world-space [`InputIntent`] the server expects.

use splat_shared::{math::Vec3, net::InputIntent};

/// Sampled controls. Yaw 0 looks down -z; positive pitch looks up.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub forward: f32,
    pub right: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub jump: bool,
    pub crouch: bool,
    pub interact: bool,
    pub primary: bool,
    pub secondary: bool,
}

impl InputState {
    /// Unit view direction.
    pub fn aim_direction(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(-sin_yaw * cos_pitch, sin_pitch, -cos_yaw * cos_pitch)
    }

    /// Horizontal move direction in world space, at most unit length.
    pub fn wish_vector(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let forward = Vec3::new(-sin_yaw, 0.0, -cos_yaw);
        let right = Vec3::new(cos_yaw, 0.0, -sin_yaw);
        let wish = forward * self.forward + right * self.right;
        if wish.len_sq() > 1.0 {
            wish.normalize_or_zero()
        } else {
            wish
        }
    }

    pub fn to_intent(&self) -> InputIntent {
        let wish = self.wish_vector();
        InputIntent {
            move_x: wish.x,
            move_z: wish.z,
            jump: self.jump,
            crouch: self.crouch,
            interact: self.interact,
            primary: self.primary,
            secondary: self.secondary,
            aim_direction: self.aim_direction(),
        }
    }

    /// Drops one-shot buttons after they were sent.
    pub fn release_buttons(&mut self) {
        self.jump = false;
        self.interact = false;
        self.primary = false;
        self.secondary = false;
    }
}
