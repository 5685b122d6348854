//! Snapshot building for network transmission

use std::sync::Arc;

use uuid::Uuid;

use crate::ws::protocol::{MatchSnapshot, ServerMsg};

use super::state::MatchState;

/// Turns published states into numbered wire snapshots.
///
/// `seq` increases by one per published state, so every observer can check it
/// saw the same ordered sequence.
pub struct SnapshotBuilder {
    match_id: Uuid,
    seq: u64,
}

impl SnapshotBuilder {
    pub fn new(match_id: Uuid) -> Self {
        Self { match_id, seq: 0 }
    }

    /// Number the next published state
    pub fn publish(&mut self, state: &Arc<MatchState>) -> ServerMsg {
        self.seq += 1;
        self.current(state)
    }

    /// Re-send the latest state without advancing the sequence (for rejoiners)
    pub fn current(&self, state: &Arc<MatchState>) -> ServerMsg {
        ServerMsg::State(MatchSnapshot {
            match_id: self.match_id,
            seq: self.seq,
            state: MatchState::clone(state),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Pairing;

    fn state() -> Arc<MatchState> {
        let p = |n: &str| Pairing {
            id: Uuid::new_v4(),
            display_name: n.into(),
        };
        Arc::new(MatchState::create(p("a"), p("b"), 7))
    }

    fn seq_of(msg: &ServerMsg) -> u64 {
        match msg {
            ServerMsg::State(s) => s.seq,
            other => panic!("expected state, got {other:?}"),
        }
    }

    #[test]
    fn publish_advances_and_current_repeats() {
        let mut builder = SnapshotBuilder::new(Uuid::new_v4());
        let s = state();
        assert_eq!(seq_of(&builder.current(&s)), 0);
        assert_eq!(seq_of(&builder.publish(&s)), 1);
        assert_eq!(seq_of(&builder.publish(&s)), 2);
        assert_eq!(seq_of(&builder.current(&s)), 2);
    }

    #[test]
    fn wire_snapshot_carries_every_state_field() {
        let mut builder = SnapshotBuilder::new(Uuid::new_v4());
        let json = serde_json::to_value(builder.publish(&state())).unwrap();
        assert_eq!(json["type"], "state");
        for field in [
            "board",
            "active_turn",
            "phase",
            "move_count",
            "result",
            "winning_cells",
            "last_move_time",
            "participants",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["phase"], "playing");
        assert_eq!(json["last_move_time"], 7);
    }
}
