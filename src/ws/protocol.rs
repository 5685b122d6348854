//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::board::Symbol;
use crate::game::state::{MatchError, MatchState};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter the matchmaking queue
    JoinQueue {
        /// Overrides the name given on connect
        #[serde(default)]
        display_name: Option<String>,
    },

    /// Leave the matchmaking queue
    LeaveQueue,

    /// Place the player's symbol
    Move { row: i32, col: i32 },

    /// Leave the current match for good (counts as abandoning it)
    Leave,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        participant_id: Uuid,
        server_time: u64,
    },

    /// Placed in the matchmaking queue
    Queued { queue_size: usize },

    /// Paired with an opponent
    MatchFound {
        match_id: Uuid,
        symbol: Symbol,
        opponent: OpponentInfo,
    },

    /// Authoritative match state
    State(MatchSnapshot),

    /// The sender's last event was refused; nothing changed
    Rejected { code: String, message: String },

    /// The match was stopped by a server fault
    MatchAborted { match_id: Uuid, reason: String },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn rejected(err: &MatchError) -> Self {
        ServerMsg::Rejected {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpponentInfo {
    pub participant_id: Uuid,
    pub display_name: String,
}

/// Numbered copy of a match state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub match_id: Uuid,
    /// Position of this state in the match's published sequence
    pub seq: u64,
    #[serde(flatten)]
    pub state: MatchState,
}
