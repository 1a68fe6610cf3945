//! `splat_client`
//!
//! Client-side systems:
//! - Connection management (single reliable stream)
//! - Input capture and intent generation
//! - A mirror of the server world, rebuilt from snapshots

pub mod client;
pub mod input;

pub use client::GameClient;
