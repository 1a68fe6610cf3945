//! `splat_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - One authoritative world model (`ecs` + `components`) that both sides
//!   understand.
//! - Clear separation of concerns (net, ecs, math, events, snapshots).
//! - Traits at the seams (`PhysicsBackend`) so the server can swap engines.
//! - No `unsafe`.

pub mod components;
pub mod config;
pub mod console;
pub mod ecs;
pub mod event;
pub mod math;
pub mod net;
pub mod physics;
pub mod snapshot;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::components::*;
    pub use crate::config::*;
    pub use crate::ecs::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::snapshot::*;
}
