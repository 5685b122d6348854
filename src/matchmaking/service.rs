//! Matchmaking service - manages connections, the queue and match creation

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::board::Symbol;
use crate::game::{
    MatchError, MatchEvent, MatchRegistry, MatchSession, Outbound, Pairing, SessionConfig,
};
use crate::store::ResultSink;
use crate::util::time::SharedClock;
use crate::ws::protocol::{OpponentInfo, ServerMsg};

use super::queue::{MatchmakingQueue, QueuedPlayer};

/// How often the queue is scanned for pairs
const PAIRING_INTERVAL: Duration = Duration::from_millis(500);

/// A live socket for one participant
#[derive(Clone)]
pub struct PlayerConnection {
    pub connection_id: Uuid,
    pub display_name: String,
    /// Channel drained by the socket writer
    pub outbound: Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchmakingError {
    #[error("already in a match")]
    AlreadyInMatch,

    #[error("not connected")]
    NotConnected,

    #[error("not in a match")]
    NotInMatch,

    #[error(transparent)]
    Match(#[from] MatchError),
}

impl MatchmakingError {
    pub fn code(&self) -> &'static str {
        match self {
            MatchmakingError::AlreadyInMatch => "already_in_match",
            MatchmakingError::NotConnected => "not_connected",
            MatchmakingError::NotInMatch => "not_in_match",
            MatchmakingError::Match(e) => e.code(),
        }
    }

    pub fn to_msg(&self) -> ServerMsg {
        match self {
            MatchmakingError::Match(e) => ServerMsg::rejected(e),
            other => ServerMsg::error(other.code(), other.to_string()),
        }
    }
}

/// Matchmaking service
pub struct MatchmakingService {
    queue: Mutex<MatchmakingQueue>,
    registry: Arc<MatchRegistry>,
    players: DashMap<Uuid, PlayerConnection>,
    session_config: SessionConfig,
    clock: SharedClock,
    sink: Arc<dyn ResultSink>,
}

impl MatchmakingService {
    pub fn new(
        registry: Arc<MatchRegistry>,
        session_config: SessionConfig,
        clock: SharedClock,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            queue: Mutex::new(MatchmakingQueue::new()),
            registry,
            players: DashMap::new(),
            session_config,
            clock,
            sink,
        }
    }

    /// Register a socket for `participant_id` (called when a WebSocket connects).
    ///
    /// Returns the connection record and the receiver the socket writer drains.
    /// A participant already seated in a match is re-attached to it.
    pub fn register_player(
        &self,
        participant_id: Uuid,
        display_name: String,
    ) -> (PlayerConnection, mpsc::UnboundedReceiver<ServerMsg>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();

        let connection = PlayerConnection {
            connection_id,
            display_name,
            outbound: outbound.clone(),
        };
        if self.players.insert(participant_id, connection.clone()).is_some() {
            info!(participant = %participant_id, "Connection replaced by a newer socket");
        }

        if let Some(handle) = self.registry.for_participant(&participant_id) {
            info!(participant = %participant_id, match_id = %handle.id, "Re-attaching to match");
            let attach = MatchEvent::Connected {
                participant: participant_id,
                connection: connection_id,
                outbound,
            };
            if handle.post(attach).is_err() {
                debug!(match_id = %handle.id, "Match ended before re-attach");
            }
        }

        (connection, outbound_rx)
    }

    /// Unregister a socket (called when a WebSocket disconnects).
    /// Ignored when a newer socket already replaced it.
    pub async fn unregister_player(&self, participant_id: Uuid, connection_id: Uuid) {
        let removed = self
            .players
            .remove_if(&participant_id, |_, c| c.connection_id == connection_id);
        if removed.is_none() {
            return;
        }

        self.queue.lock().await.dequeue(participant_id);

        if let Some(handle) = self.registry.for_participant(&participant_id) {
            let _ = handle.post(MatchEvent::Disconnected {
                participant: participant_id,
                connection: connection_id,
            });
        }

        info!(participant = %participant_id, "Player unregistered from matchmaking");
    }

    /// Join matchmaking queue, returning the queue size
    pub async fn join_queue(
        &self,
        participant_id: Uuid,
        display_name: Option<String>,
    ) -> Result<usize, MatchmakingError> {
        if self.registry.for_participant(&participant_id).is_some() {
            return Err(MatchmakingError::AlreadyInMatch);
        }

        let name = {
            let mut conn = self
                .players
                .get_mut(&participant_id)
                .ok_or(MatchmakingError::NotConnected)?;
            if let Some(name) = display_name {
                conn.display_name = name;
            }
            conn.display_name.clone()
        };

        let mut queue = self.queue.lock().await;
        let rejoin = queue.contains(&participant_id);
        queue.enqueue(QueuedPlayer::new(participant_id, name));

        info!(participant = %participant_id, queue_size = queue.len(), rejoin, "Player joined matchmaking queue");
        Ok(queue.len())
    }

    /// Leave matchmaking queue
    pub async fn leave_queue(&self, participant_id: Uuid) {
        self.queue.lock().await.dequeue(participant_id);
    }

    /// Forward a move to the participant's match
    pub fn submit_move(&self, participant_id: Uuid, row: i32, col: i32) -> Result<(), MatchmakingError> {
        self.post_to_match(
            participant_id,
            MatchEvent::Move {
                participant: participant_id,
                row,
                col,
            },
        )
    }

    /// Leave the current match for good
    pub fn leave_match(&self, participant_id: Uuid) -> Result<(), MatchmakingError> {
        self.post_to_match(
            participant_id,
            MatchEvent::Leave {
                participant: participant_id,
            },
        )
    }

    fn post_to_match(&self, participant_id: Uuid, event: MatchEvent) -> Result<(), MatchmakingError> {
        let handle = self
            .registry
            .for_participant(&participant_id)
            .ok_or(MatchmakingError::NotInMatch)?;
        handle
            .post(event)
            .map_err(|_| MatchmakingError::Match(MatchError::MatchAlreadyFinished))
    }

    /// Create a match for two queued players and start its session
    async fn create_match(&self, first: QueuedPlayer, second: QueuedPlayer) {
        // whoever plays X moves first, so pick the seat at random
        let (a, b) = if rand::random::<bool>() {
            (first, second)
        } else {
            (second, first)
        };

        let match_id = Uuid::new_v4();
        let (session, handle) = MatchSession::new(
            match_id,
            Pairing {
                id: a.participant_id,
                display_name: a.display_name.clone(),
            },
            Pairing {
                id: b.participant_id,
                display_name: b.display_name.clone(),
            },
            self.session_config,
            self.clock.clone(),
            self.sink.clone(),
        );

        self.registry.insert(handle.clone());
        info!(match_id = %match_id, x = %a.participant_id, o = %b.participant_id, "Created new match");

        let registry = self.registry.clone();
        tokio::spawn(async move {
            session.run().await;
            registry.remove(&match_id);
            info!(match_id = %match_id, "Match removed from registry");
        });

        let state = handle.snapshot();
        for (me, opponent) in [(&a, &b), (&b, &a)] {
            let Some(conn) = self.players.get(&me.participant_id).map(|c| c.clone()) else {
                // socket closed between pairing and now; start the reconnect window
                warn!(match_id = %match_id, participant = %me.participant_id, "Paired player not connected");
                let _ = handle.post(MatchEvent::Absent {
                    participant: me.participant_id,
                });
                continue;
            };
            let symbol = state
                .participant(me.participant_id)
                .map(|p| p.symbol)
                .unwrap_or(Symbol::X);

            let _ = conn.outbound.send(ServerMsg::MatchFound {
                match_id,
                symbol,
                opponent: OpponentInfo {
                    participant_id: opponent.participant_id,
                    display_name: opponent.display_name.clone(),
                },
            });
            let _ = handle.post(MatchEvent::Connected {
                participant: me.participant_id,
                connection: conn.connection_id,
                outbound: conn.outbound,
            });
        }
    }

    /// Pair everyone currently waiting. Returns the number of matches created.
    pub async fn pair_waiting(&self) -> usize {
        let pairs = {
            let mut queue = self.queue.lock().await;
            if queue.is_empty() {
                return 0;
            }
            if let Some(wait) = queue.oldest_wait() {
                debug!(queue_size = queue.len(), oldest_wait_ms = wait.as_millis() as u64, "Scanning queue");
            }
            queue.drain_pairs()
        };

        let created = pairs.len();
        for (a, b) in pairs {
            self.create_match(a, b).await;
        }
        created
    }

    /// Run the matchmaking service (periodic queue processing)
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(PAIRING_INTERVAL);

        loop {
            interval.tick().await;
            self.pair_waiting().await;
        }
    }

    /// Get current queue size
    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn connected_players(&self) -> usize {
        self.players.len()
    }
}
