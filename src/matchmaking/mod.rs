//! Pairing queue and connection routing

pub mod queue;
pub mod service;

pub use service::{MatchmakingError, MatchmakingService};
