//! `splat_server`
//!
//! Server-side systems:
//! - Fixed timestep simulation loop
//! - Rigid-body physics behind [`splat_shared::physics::PhysicsBackend`]
//! - Sessions: subscribe, join, leave, intents
//! - Sends `Snapshot`s to subscribers every tick
//!
//! Networking model:
//! - TCP only, length-prefixed JSON frames, one connection per session

pub mod gameplay;
pub mod physics;
pub mod rapier_backend;
pub mod server;
pub mod session;
pub mod simulation;
pub mod spawn;
pub mod tick;

pub use server::GameServer;
pub use simulation::{Outbox, Simulation};
