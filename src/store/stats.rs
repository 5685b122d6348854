//! Player stats persisted in the Supabase `player_stats` table

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::sink::{MatchReport, PlayerStats, ResultSink, StoreError};
use super::supabase::SupabaseClient;

const TABLE: &str = "player_stats";

/// Row shape in `player_stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatsRow {
    #[serde(flatten)]
    stats: PlayerStats,
    updated_at: chrono::DateTime<chrono::Utc>,
}

/// Result sink backed by Supabase.
///
/// Each record is a read-modify-upsert per player, so two matches finishing
/// for the same player at the same instant can lose one update.
#[derive(Clone)]
pub struct SupabaseStatsStore {
    client: SupabaseClient,
}

impl SupabaseStatsStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    async fn load(&self, player_id: Uuid) -> Result<Option<PlayerStats>, StoreError> {
        let params = [("player_id", format!("eq.{}", player_id))];
        let row: Option<StatsRow> = self.client.select_one(TABLE, &params).await?;
        Ok(row.map(|r| r.stats))
    }
}

#[async_trait]
impl ResultSink for SupabaseStatsStore {
    async fn record(&self, report: &MatchReport) -> Result<(), StoreError> {
        for participant in report.participants() {
            let Some(outcome) = report.outcome_for(participant.id) else {
                continue;
            };

            let mut stats = self
                .load(participant.id)
                .await?
                .unwrap_or_else(|| PlayerStats::new(participant.id, participant.display_name.clone()));
            stats.display_name = participant.display_name.clone();
            stats.apply(outcome);

            let row = StatsRow {
                stats,
                updated_at: chrono::Utc::now(),
            };
            self.client.upsert(TABLE, &row, "player_id").await?;
        }

        info!(match_id = %report.match_id, tag = ?report.tag, "Match result stored in Supabase");
        Ok(())
    }

    async fn player_stats(&self, player_id: Uuid) -> Result<Option<PlayerStats>, StoreError> {
        self.load(player_id).await
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<PlayerStats>, StoreError> {
        let params = [
            ("order", "wins.desc,best_streak.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<StatsRow> = self.client.select(TABLE, &params).await?;
        Ok(rows.into_iter().map(|r| r.stats).collect())
    }
}
