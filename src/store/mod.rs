//! Result sink and stats stores

pub mod leaderboard;
pub mod sink;
pub mod stats;
pub mod supabase;

pub use leaderboard::InMemoryLeaderboard;
pub use sink::{MatchReport, PlayerStats, ResultSink, StoreError};
pub use stats::SupabaseStatsStore;
pub use supabase::SupabaseClient;
