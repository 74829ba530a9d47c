//! Murmur - an anonymous posting board with live score updates
//!
//! This library provides the broadcast hub that fans notifications out to
//! WebSocket clients, the per-client rate limiter, the transactional vote
//! coordinator and the warp routes that tie them to an HTTP surface.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod security;
pub mod storage;

// Re-export main components
pub use config::*;
pub use constants::*;
