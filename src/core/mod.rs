//! Core functionality for the board server

pub mod connection;
pub mod envelope;
pub mod hub;
pub mod ip_extractor;
pub mod rate_limiter;
pub mod server;
pub mod vote;

// Re-export main components for convenience
pub use connection::{Connection, ConnectionId, OutboundQueue};
pub use envelope::{NotificationEnvelope, PostRef, VoteUpdate};
pub use hub::{Hub, HubStats};
pub use rate_limiter::RateLimiter;
pub use server::{BoardHealth, BoardServer};
pub use vote::{VoteCoordinator, VoteOutcome};
