//! Matchmaking queue implementation

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Player waiting for an opponent
#[derive(Debug, Clone)]
pub struct QueuedPlayer {
    pub participant_id: Uuid,
    pub display_name: String,
    pub queued_at: Instant,
}

impl QueuedPlayer {
    pub fn new(participant_id: Uuid, display_name: String) -> Self {
        Self {
            participant_id,
            display_name,
            queued_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// FIFO queue, paired two at a time
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queue: VecDeque<QueuedPlayer>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player to the queue
    pub fn enqueue(&mut self, player: QueuedPlayer) {
        // Remove if already in queue (rejoin)
        self.queue.retain(|p| p.participant_id != player.participant_id);
        self.queue.push_back(player);
    }

    /// Remove a player from the queue
    pub fn dequeue(&mut self, participant_id: Uuid) -> Option<QueuedPlayer> {
        let pos = self
            .queue
            .iter()
            .position(|p| p.participant_id == participant_id)?;
        self.queue.remove(pos)
    }

    /// Check if a player is in the queue
    pub fn contains(&self, participant_id: &Uuid) -> bool {
        self.queue.iter().any(|p| &p.participant_id == participant_id)
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Longest current wait, if anyone is queued
    pub fn oldest_wait(&self) -> Option<Duration> {
        self.queue.front().map(QueuedPlayer::wait_time)
    }

    /// Take every complete pair from the front of the queue, oldest first
    pub fn drain_pairs(&mut self) -> Vec<(QueuedPlayer, QueuedPlayer)> {
        let mut pairs = Vec::with_capacity(self.queue.len() / 2);
        while self.queue.len() >= 2 {
            if let (Some(a), Some(b)) = (self.queue.pop_front(), self.queue.pop_front()) {
                pairs.push((a, b));
            }
        }
        pairs
    }
}
