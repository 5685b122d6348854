//! Authoritative match logic

pub mod board;
pub mod session;
pub mod snapshot;
pub mod state;

pub use session::{MatchEvent, MatchRegistry, MatchSession, Outbound, SessionConfig};
pub use state::{MatchError, Pairing};
