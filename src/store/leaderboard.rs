//! In-memory stats aggregation, used when no database is configured

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::sink::{MatchReport, PlayerStats, ResultSink, StoreError};

#[derive(Default)]
pub struct InMemoryLeaderboard {
    players: DashMap<Uuid, PlayerStats>,
}

impl InMemoryLeaderboard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultSink for InMemoryLeaderboard {
    async fn record(&self, report: &MatchReport) -> Result<(), StoreError> {
        for participant in report.participants() {
            let Some(outcome) = report.outcome_for(participant.id) else {
                continue;
            };
            let mut entry = self
                .players
                .entry(participant.id)
                .or_insert_with(|| PlayerStats::new(participant.id, participant.display_name.clone()));
            entry.display_name = participant.display_name.clone();
            entry.apply(outcome);
        }

        debug!(match_id = %report.match_id, tag = ?report.tag, "Recorded match result in memory");
        Ok(())
    }

    async fn player_stats(&self, player_id: Uuid) -> Result<Option<PlayerStats>, StoreError> {
        Ok(self.players.get(&player_id).map(|s| s.value().clone()))
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<PlayerStats>, StoreError> {
        let mut all: Vec<PlayerStats> = self.players.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            b.wins
                .cmp(&a.wins)
                .then(b.best_streak.cmp(&a.best_streak))
                .then(a.losses.cmp(&b.losses))
        });
        all.truncate(limit);
        Ok(all)
    }
}
