//! Result sink - where finished matches are reported

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::board::Symbol;
use crate::game::state::{MatchResult, MatchState};

use super::supabase::SupabaseError;

/// How a match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultTag {
    WinByLine,
    WinByForfeit,
    Draw,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedParticipant {
    pub id: Uuid,
    pub display_name: String,
    pub symbol: Symbol,
}

/// Terminal outcome of a match, sent to the sink exactly once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchReport {
    pub match_id: Uuid,
    pub participant_a: ReportedParticipant,
    pub participant_b: ReportedParticipant,
    pub tag: ResultTag,
    pub winning_symbol: Option<Symbol>,
    /// Set only for abandoned matches
    pub departed: Option<Uuid>,
    pub move_count: u32,
    pub finished_at: u64,
}

/// A single player's view of a finished match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerOutcome {
    Win,
    Loss,
    Draw,
}

impl MatchReport {
    /// Build the report for a terminal state. Returns `None` while the match is live.
    pub fn from_state(match_id: Uuid, state: &MatchState, finished_at: u64) -> Option<Self> {
        let (tag, departed) = match state.result {
            MatchResult::Ongoing => return None,
            MatchResult::WinByLine { .. } => (ResultTag::WinByLine, None),
            MatchResult::WinByForfeit { .. } => (ResultTag::WinByForfeit, None),
            MatchResult::Draw => (ResultTag::Draw, None),
            MatchResult::Abandoned { departed } => (ResultTag::Abandoned, Some(departed)),
        };

        let reported = |symbol| {
            let p = state.participant_by_symbol(symbol);
            ReportedParticipant {
                id: p.id,
                display_name: p.display_name.clone(),
                symbol: p.symbol,
            }
        };

        Some(Self {
            match_id,
            participant_a: reported(Symbol::X),
            participant_b: reported(Symbol::O),
            tag,
            winning_symbol: state.result.winner(),
            departed,
            move_count: state.move_count,
            finished_at,
        })
    }

    pub fn participants(&self) -> [&ReportedParticipant; 2] {
        [&self.participant_a, &self.participant_b]
    }

    /// Outcome from `player`'s side. The one who abandons loses.
    pub fn outcome_for(&self, player: Uuid) -> Option<PlayerOutcome> {
        let me = self.participants().into_iter().find(|p| p.id == player)?;
        let outcome = match (self.tag, self.winning_symbol, self.departed) {
            (ResultTag::Draw, _, _) => PlayerOutcome::Draw,
            (ResultTag::Abandoned, _, Some(departed)) if departed == player => PlayerOutcome::Loss,
            (ResultTag::Abandoned, _, _) => PlayerOutcome::Win,
            (_, Some(winner), _) if winner == me.symbol => PlayerOutcome::Win,
            _ => PlayerOutcome::Loss,
        };
        Some(outcome)
    }
}

/// Aggregated record for one player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub player_id: Uuid,
    pub display_name: String,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub games_played: u32,
    /// Consecutive wins, reset by a loss or draw
    pub current_streak: u32,
    pub best_streak: u32,
}

impl PlayerStats {
    pub fn new(player_id: Uuid, display_name: String) -> Self {
        Self {
            player_id,
            display_name,
            wins: 0,
            losses: 0,
            draws: 0,
            games_played: 0,
            current_streak: 0,
            best_streak: 0,
        }
    }

    pub fn apply(&mut self, outcome: PlayerOutcome) {
        self.games_played += 1;
        match outcome {
            PlayerOutcome::Win => {
                self.wins += 1;
                self.current_streak += 1;
                self.best_streak = self.best_streak.max(self.current_streak);
            }
            PlayerOutcome::Loss => {
                self.losses += 1;
                self.current_streak = 0;
            }
            PlayerOutcome::Draw => {
                self.draws += 1;
                self.current_streak = 0;
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("supabase: {0}")]
    Supabase(#[from] SupabaseError),
}

/// Durable aggregation of finished matches
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Fold one finished match into both players' records
    async fn record(&self, report: &MatchReport) -> Result<(), StoreError>;

    async fn player_stats(&self, player_id: Uuid) -> Result<Option<PlayerStats>, StoreError>;

    /// Top players by wins
    async fn leaderboard(&self, limit: usize) -> Result<Vec<PlayerStats>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Pairing;

    fn state() -> MatchState {
        MatchState::create(
            Pairing {
                id: Uuid::new_v4(),
                display_name: "ada".into(),
            },
            Pairing {
                id: Uuid::new_v4(),
                display_name: "grace".into(),
            },
            0,
        )
    }

    #[test]
    fn live_match_has_no_report() {
        assert!(MatchReport::from_state(Uuid::new_v4(), &state(), 1).is_none());
    }

    #[test]
    fn forfeit_report_credits_the_other_symbol() {
        let s = state();
        let done = s.check_timeout(60_000, std::time::Duration::from_secs(30)).unwrap().state;
        let report = MatchReport::from_state(Uuid::new_v4(), &done, 60_000).unwrap();
        assert_eq!(report.tag, ResultTag::WinByForfeit);
        assert_eq!(report.winning_symbol, Some(Symbol::O));
        assert_eq!(report.outcome_for(s.participants[1].id), Some(PlayerOutcome::Win));
        assert_eq!(report.outcome_for(s.participants[0].id), Some(PlayerOutcome::Loss));
        assert_eq!(report.outcome_for(Uuid::new_v4()), None);
    }

    #[test]
    fn abandoning_player_takes_the_loss() {
        let s = state();
        let quitter = s.participants[0].id;
        let done = s.mark_abandoned(quitter).unwrap().state;
        let report = MatchReport::from_state(Uuid::new_v4(), &done, 5).unwrap();
        assert_eq!(report.tag, ResultTag::Abandoned);
        assert_eq!(report.departed, Some(quitter));
        assert_eq!(report.outcome_for(quitter), Some(PlayerOutcome::Loss));
        assert_eq!(report.outcome_for(s.participants[1].id), Some(PlayerOutcome::Win));
    }

    #[test]
    fn streaks_track_consecutive_wins() {
        let mut stats = PlayerStats::new(Uuid::new_v4(), "ada".into());
        for outcome in [
            PlayerOutcome::Win,
            PlayerOutcome::Win,
            PlayerOutcome::Draw,
            PlayerOutcome::Win,
            PlayerOutcome::Loss,
        ] {
            stats.apply(outcome);
        }
        assert_eq!(stats.games_played, 5);
        assert_eq!((stats.wins, stats.losses, stats.draws), (3, 1, 1));
        assert_eq!(stats.current_streak, 0);
        assert_eq!(stats.best_streak, 2);
    }
}
