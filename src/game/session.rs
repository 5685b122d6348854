//! Match session - the single authority around one match
//!
//! Every inbound event (moves, presence changes, leaves, timer ticks) for a
//! match is funnelled through one unbounded queue and applied to the state
//! machine one at a time by the session task. The state machine therefore
//! needs no locking, and a move racing a timeout is settled by queue order.

use dashmap::DashMap;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::store::{MatchReport, ResultSink};
use crate::util::time::SharedClock;
use crate::ws::protocol::ServerMsg;

use super::snapshot::SnapshotBuilder;
use super::state::{MatchError, MatchState, Outcome, Pairing, Transition};

/// Per-participant outbound channel. Unbounded so a stalled reader can never
/// hold up the session.
pub type Outbound = mpsc::UnboundedSender<ServerMsg>;

/// Timing policy for a session
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Time the participant on turn has to move
    pub move_deadline: Duration,
    /// Time a disconnected participant has to come back
    pub reconnect_grace: Duration,
    /// Period of the timer tick injected into the queue
    pub tick_interval: Duration,
}

/// Events accepted by a session
#[derive(Debug)]
pub enum MatchEvent {
    Move {
        participant: Uuid,
        row: i32,
        col: i32,
    },
    /// A connection for `participant` came up. `connection` tells sockets of
    /// the same participant apart across reconnects.
    Connected {
        participant: Uuid,
        connection: Uuid,
        outbound: Outbound,
    },
    Disconnected {
        participant: Uuid,
        connection: Uuid,
    },
    /// `participant` has no live socket at all, e.g. it closed before the
    /// match was created. Ignored if a connection is attached by then.
    Absent { participant: Uuid },
    /// Permanent departure
    Leave { participant: Uuid },
    Tick,
}

#[derive(Debug, thiserror::Error)]
#[error("match {0} is no longer accepting events")]
pub struct SessionClosed(pub Uuid);

/// Handle to a running session
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub participants: [Uuid; 2],
    events: mpsc::UnboundedSender<MatchEvent>,
    latest: watch::Receiver<Arc<MatchState>>,
}

impl MatchHandle {
    /// Queue an event for the session. Never waits on processing.
    pub fn post(&self, event: MatchEvent) -> Result<(), SessionClosed> {
        self.events.send(event).map_err(|_| SessionClosed(self.id))
    }

    /// Latest published state
    pub fn snapshot(&self) -> Arc<MatchState> {
        self.latest.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
    by_participant: DashMap<Uuid, Uuid>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
            by_participant: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        for participant in handle.participants {
            self.by_participant.insert(participant, handle.id);
        }
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        let (_, handle) = self.matches.remove(id)?;
        for participant in handle.participants {
            self.by_participant
                .remove_if(&participant, |_, match_id| match_id == id);
        }
        Some(handle)
    }

    /// The live match `participant` is currently seated in. A session that
    /// already finished but is not yet removed does not count.
    pub fn for_participant(&self, participant: &Uuid) -> Option<MatchHandle> {
        let match_id = *self.by_participant.get(participant)?;
        self.get(&match_id).filter(|handle| !handle.is_closed())
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn seated_players(&self) -> usize {
        self.by_participant.len()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct Attachment {
    connection: Uuid,
    outbound: Outbound,
}

/// The authority loop for one match
pub struct MatchSession {
    id: Uuid,
    state: Arc<MatchState>,
    events_rx: mpsc::UnboundedReceiver<MatchEvent>,
    events_tx: mpsc::WeakUnboundedSender<MatchEvent>,
    latest_tx: watch::Sender<Arc<MatchState>>,
    attached: HashMap<Uuid, Attachment>,
    disconnected_at: HashMap<Uuid, u64>,
    snapshots: SnapshotBuilder,
    config: SessionConfig,
    clock: SharedClock,
    sink: Arc<dyn ResultSink>,
}

impl MatchSession {
    /// Create a session for a freshly paired match. `a` plays X.
    pub fn new(
        id: Uuid,
        a: Pairing,
        b: Pairing,
        config: SessionConfig,
        clock: SharedClock,
        sink: Arc<dyn ResultSink>,
    ) -> (Self, MatchHandle) {
        let state = Arc::new(MatchState::create(a, b, clock.now_millis()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (latest_tx, latest_rx) = watch::channel(state.clone());

        let handle = MatchHandle {
            id,
            participants: [state.participants[0].id, state.participants[1].id],
            events: events_tx.clone(),
            latest: latest_rx,
        };

        let session = Self {
            id,
            state,
            events_rx,
            events_tx: events_tx.downgrade(),
            latest_tx,
            attached: HashMap::new(),
            disconnected_at: HashMap::new(),
            snapshots: SnapshotBuilder::new(id),
            config,
            clock,
            sink,
        };

        (session, handle)
    }

    /// Run until the match ends or every handle is dropped
    pub async fn run(mut self) {
        info!(match_id = %self.id, "Match session started");
        let ticker = self.spawn_ticker();

        while let Some(event) = self.events_rx.recv().await {
            if self.handle_event(event).await.is_break() {
                break;
            }
        }

        ticker.abort();
        self.events_rx.close();
        while let Ok(event) = self.events_rx.try_recv() {
            self.reject_late(event);
        }

        info!(
            match_id = %self.id,
            phase = ?self.state.phase,
            moves = self.state.move_count,
            "Match session ended"
        );
    }

    /// Inject `Tick` into the queue. Holds only a weak sender so it never keeps
    /// the session alive on its own.
    fn spawn_ticker(&self) -> JoinHandle<()> {
        let events = self.events_tx.clone();
        let period = self.config.tick_interval;
        tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                let Some(tx) = events.upgrade() else { break };
                if tx.send(MatchEvent::Tick).is_err() {
                    break;
                }
            }
        })
    }

    async fn handle_event(&mut self, event: MatchEvent) -> ControlFlow<()> {
        let now = self.clock.now_millis();

        match event {
            MatchEvent::Move {
                participant,
                row,
                col,
            } => {
                let result = self.state.submit_move(participant, row, col, now);
                self.apply(result, Some(participant)).await
            }
            MatchEvent::Connected {
                participant,
                connection,
                outbound,
            } => {
                if self.state.participant(participant).is_none() {
                    let _ = outbound.send(ServerMsg::rejected(&MatchError::NotAParticipant));
                    return ControlFlow::Continue(());
                }

                self.attached.insert(
                    participant,
                    Attachment {
                        connection,
                        outbound,
                    },
                );
                self.disconnected_at.remove(&participant);
                debug!(match_id = %self.id, participant = %participant, "Participant attached");

                let result = self.state.set_presence(participant, true, now);
                if matches!(&result, Ok(t) if t.outcome == Outcome::Unchanged) {
                    // nothing new to broadcast, but the newcomer needs the state
                    let msg = self.snapshots.current(&self.state);
                    self.send_to(participant, msg);
                }
                self.apply(result, Some(participant)).await
            }
            MatchEvent::Disconnected {
                participant,
                connection,
            } => {
                let current = self
                    .attached
                    .get(&participant)
                    .is_some_and(|a| a.connection == connection);
                if !current {
                    // a newer connection already took over
                    return ControlFlow::Continue(());
                }

                self.attached.remove(&participant);
                info!(match_id = %self.id, participant = %participant, "Participant disconnected");
                self.mark_absent(participant, now).await
            }
            MatchEvent::Absent { participant } => {
                if self.attached.contains_key(&participant) {
                    return ControlFlow::Continue(());
                }
                info!(match_id = %self.id, participant = %participant, "Participant absent at start");
                self.mark_absent(participant, now).await
            }
            MatchEvent::Leave { participant } => {
                info!(match_id = %self.id, participant = %participant, "Participant left match");
                let result = self.state.mark_abandoned(participant);
                self.apply(result, Some(participant)).await
            }
            MatchEvent::Tick => {
                let grace = self.config.reconnect_grace.as_millis();
                let expired = self
                    .disconnected_at
                    .iter()
                    .filter(|(_, since)| u128::from(now.saturating_sub(**since)) >= grace)
                    .min_by_key(|(_, since)| **since)
                    .map(|(participant, _)| *participant);

                let result = match expired {
                    Some(participant) => {
                        info!(
                            match_id = %self.id,
                            participant = %participant,
                            "Reconnect window elapsed"
                        );
                        self.state.mark_abandoned(participant)
                    }
                    None => self.state.check_timeout(now, self.config.move_deadline),
                };
                self.apply(result, None).await
            }
        }
    }

    /// Flip presence off and start the reconnect window
    async fn mark_absent(&mut self, participant: Uuid, now: u64) -> ControlFlow<()> {
        let result = self.state.set_presence(participant, false, now);
        if result.is_ok() {
            self.disconnected_at.entry(participant).or_insert(now);
        }
        self.apply(result, None).await
    }

    /// Publish a transition, or report a rejection to `origin` only
    async fn apply(
        &mut self,
        result: Result<Transition, MatchError>,
        origin: Option<Uuid>,
    ) -> ControlFlow<()> {
        let transition = match result {
            Ok(t) => t,
            Err(err) if err.is_rejection() => {
                debug!(match_id = %self.id, origin = ?origin, error = %err, "Event rejected");
                if let Some(participant) = origin {
                    self.send_to(participant, ServerMsg::rejected(&err));
                }
                return ControlFlow::Continue(());
            }
            Err(err) => {
                error!(match_id = %self.id, error = %err, "Aborting match");
                let abort = ServerMsg::MatchAborted {
                    match_id: self.id,
                    reason: err.to_string(),
                };
                for attachment in self.attached.values() {
                    let _ = attachment.outbound.send(abort.clone());
                }
                return ControlFlow::Break(());
            }
        };

        if transition.outcome == Outcome::Unchanged {
            return ControlFlow::Continue(());
        }

        self.state = Arc::new(transition.state);
        self.latest_tx.send_replace(self.state.clone());
        self.broadcast(origin);

        if transition.outcome == Outcome::Terminal {
            self.report().await;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    /// Send the new state to everyone attached, `origin` first
    fn broadcast(&mut self, origin: Option<Uuid>) {
        let msg = self.snapshots.publish(&self.state);

        if let Some(first) = origin {
            self.send_to(first, msg.clone());
        }
        let rest: Vec<Uuid> = self
            .attached
            .keys()
            .copied()
            .filter(|p| Some(*p) != origin)
            .collect();
        for participant in rest {
            self.send_to(participant, msg.clone());
        }
    }

    fn send_to(&self, participant: Uuid, msg: ServerMsg) {
        if let Some(attachment) = self.attached.get(&participant) {
            if attachment.outbound.send(msg).is_err() {
                debug!(match_id = %self.id, participant = %participant, "Outbound channel closed");
            }
        }
    }

    async fn report(&self) {
        let Some(report) = MatchReport::from_state(self.id, &self.state, self.clock.now_millis())
        else {
            return;
        };

        info!(
            match_id = %self.id,
            tag = ?report.tag,
            winner = ?report.winning_symbol,
            "Match finished"
        );

        if let Err(e) = self.sink.record(&report).await {
            error!(match_id = %self.id, error = %e, "Failed to record match result");
        }
    }

    /// Events still queued after the terminal transition
    fn reject_late(&self, event: MatchEvent) {
        match event {
            MatchEvent::Move { participant, .. } | MatchEvent::Leave { participant } => {
                self.send_to(
                    participant,
                    ServerMsg::rejected(&MatchError::MatchAlreadyFinished),
                );
            }
            MatchEvent::Connected { outbound, .. } => {
                let _ = outbound.send(self.snapshots.current(&self.state));
                let _ = outbound.send(ServerMsg::rejected(&MatchError::MatchAlreadyFinished));
            }
            MatchEvent::Disconnected { .. } | MatchEvent::Absent { .. } | MatchEvent::Tick => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Symbol;
    use crate::game::state::{MatchPhase, MatchResult};
    use crate::store::sink::ResultTag;
    use crate::store::{PlayerStats, StoreError};
    use crate::util::time::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;
    use tokio::time::timeout;

    #[derive(Default)]
    struct RecordingSink {
        calls: AtomicUsize,
        reports: Mutex<Vec<MatchReport>>,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn record(&self, report: &MatchReport) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reports.lock().await.push(report.clone());
            Ok(())
        }

        async fn player_stats(&self, _: Uuid) -> Result<Option<PlayerStats>, StoreError> {
            Ok(None)
        }

        async fn leaderboard(&self, _: usize) -> Result<Vec<PlayerStats>, StoreError> {
            Ok(Vec::new())
        }
    }

    const DEADLINE: Duration = Duration::from_secs(30);
    const GRACE: Duration = Duration::from_secs(10);

    struct Harness {
        handle: MatchHandle,
        task: JoinHandle<()>,
        clock: Arc<ManualClock>,
        sink: Arc<RecordingSink>,
        x: Uuid,
        o: Uuid,
        x_rx: mpsc::UnboundedReceiver<ServerMsg>,
        o_rx: mpsc::UnboundedReceiver<ServerMsg>,
        x_conn: Uuid,
        o_conn: Uuid,
    }

    /// Start a session with both players attached. `tick` is the real-time
    /// period of the injected timer.
    async fn start(tick: Duration) -> Harness {
        let clock = ManualClock::starting_at(1_000_000);
        let sink = Arc::new(RecordingSink::default());
        let (x, o) = (Uuid::new_v4(), Uuid::new_v4());
        let config = SessionConfig {
            move_deadline: DEADLINE,
            reconnect_grace: GRACE,
            tick_interval: tick,
        };
        let (session, handle) = MatchSession::new(
            Uuid::new_v4(),
            Pairing {
                id: x,
                display_name: "xena".into(),
            },
            Pairing {
                id: o,
                display_name: "otto".into(),
            },
            config,
            clock.clone(),
            sink.clone(),
        );
        let task = tokio::spawn(session.run());

        let (x_tx, mut x_rx) = mpsc::unbounded_channel();
        let (o_tx, mut o_rx) = mpsc::unbounded_channel();
        let (x_conn, o_conn) = (Uuid::new_v4(), Uuid::new_v4());
        handle
            .post(MatchEvent::Connected {
                participant: x,
                connection: x_conn,
                outbound: x_tx,
            })
            .unwrap();
        handle
            .post(MatchEvent::Connected {
                participant: o,
                connection: o_conn,
                outbound: o_tx,
            })
            .unwrap();

        // each gets the initial state on attach
        assert_eq!(next_state(&mut x_rx).await.seq, 0);
        assert_eq!(next_state(&mut o_rx).await.seq, 0);

        Harness {
            handle,
            task,
            clock,
            sink,
            x,
            o,
            x_rx,
            o_rx,
            x_conn,
            o_conn,
        }
    }

    /// Long enough that ticks never interfere with a test
    const QUIET: Duration = Duration::from_secs(3600);

    async fn next_msg(rx: &mut mpsc::UnboundedReceiver<ServerMsg>) -> ServerMsg {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    async fn next_state(
        rx: &mut mpsc::UnboundedReceiver<ServerMsg>,
    ) -> crate::ws::protocol::MatchSnapshot {
        match next_msg(rx).await {
            ServerMsg::State(s) => s,
            other => panic!("expected state, got {other:?}"),
        }
    }

    fn mv(participant: Uuid, row: i32, col: i32) -> MatchEvent {
        MatchEvent::Move {
            participant,
            row,
            col,
        }
    }

    #[tokio::test]
    async fn both_participants_see_the_same_ordered_states() {
        let mut h = start(QUIET).await;
        h.handle.post(mv(h.x, 0, 0)).unwrap();
        h.handle.post(mv(h.o, 1, 1)).unwrap();
        h.handle.post(mv(h.x, 2, 2)).unwrap();

        for expected_seq in 1..=3 {
            let a = next_state(&mut h.x_rx).await;
            let b = next_state(&mut h.o_rx).await;
            assert_eq!(a.seq, expected_seq);
            assert_eq!(a.seq, b.seq);
            assert_eq!(a.state, b.state);
            assert_eq!(a.state.move_count as u64, expected_seq);
        }
        assert_eq!(h.handle.snapshot().active_turn, Symbol::O);
        h.task.abort();
    }

    #[tokio::test]
    async fn rejections_only_reach_the_sender() {
        let mut h = start(QUIET).await;
        h.handle.post(mv(h.o, 0, 0)).unwrap();
        match next_msg(&mut h.o_rx).await {
            ServerMsg::Rejected { code, .. } => assert_eq!(code, "not_your_turn"),
            other => panic!("unexpected {other:?}"),
        }

        h.handle.post(mv(h.x, 3, 0)).unwrap();
        match next_msg(&mut h.x_rx).await {
            ServerMsg::Rejected { code, .. } => assert_eq!(code, "out_of_bounds"),
            other => panic!("unexpected {other:?}"),
        }

        // a valid move afterwards is the first thing O sees since its rejection
        h.handle.post(mv(h.x, 0, 0)).unwrap();
        assert_eq!(next_state(&mut h.o_rx).await.seq, 1);
        assert_eq!(next_state(&mut h.x_rx).await.seq, 1);
        assert_eq!(h.handle.snapshot().move_count, 1);
        h.task.abort();
    }

    #[tokio::test]
    async fn win_reports_once_and_closes_the_session() {
        let mut h = start(QUIET).await;
        for (who, row, col) in [(h.x, 0, 0), (h.o, 1, 0), (h.x, 0, 1), (h.o, 1, 1), (h.x, 0, 2)] {
            h.handle.post(mv(who, row, col)).unwrap();
        }

        timeout(Duration::from_secs(2), &mut h.task).await.unwrap().unwrap();

        let last = h.handle.snapshot();
        assert_eq!(last.phase, MatchPhase::Finished);
        assert_eq!(last.result, MatchResult::WinByLine { winner: Symbol::X });

        assert_eq!(h.sink.calls.load(Ordering::SeqCst), 1);
        let reports = h.sink.reports.lock().await;
        assert_eq!(reports[0].tag, ResultTag::WinByLine);
        assert_eq!(reports[0].winning_symbol, Some(Symbol::X));
        assert_eq!(reports[0].participant_a.id, h.x);
        assert_eq!(reports[0].participant_b.id, h.o);

        assert!(h.handle.is_closed());
        assert!(h.handle.post(mv(h.o, 2, 2)).is_err());

        let mut seen = Vec::new();
        while let Ok(ServerMsg::State(s)) = h.o_rx.try_recv() {
            seen.push(s.seq);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn timer_tick_forfeits_the_idle_player() {
        let mut h = start(Duration::from_millis(10)).await;
        h.handle.post(mv(h.x, 1, 1)).unwrap();
        assert_eq!(next_state(&mut h.o_rx).await.seq, 1);

        h.clock.advance(DEADLINE + Duration::from_secs(1));
        let last = next_state(&mut h.o_rx).await;
        assert_eq!(last.state.phase, MatchPhase::Finished);
        assert_eq!(last.state.result, MatchResult::WinByForfeit { winner: Symbol::X });

        timeout(Duration::from_secs(2), &mut h.task).await.unwrap().unwrap();
        let reports = h.sink.reports.lock().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].tag, ResultTag::WinByForfeit);
        assert_eq!(reports[0].winning_symbol, Some(Symbol::X));
    }

    #[tokio::test]
    async fn reconnect_within_grace_resumes_play() {
        let mut h = start(QUIET).await;
        h.handle
            .post(MatchEvent::Disconnected {
                participant: h.o,
                connection: h.o_conn,
            })
            .unwrap();
        let paused = next_state(&mut h.x_rx).await;
        assert_eq!(paused.state.phase, MatchPhase::Waiting);
        assert!(!paused.state.participants[1].present);

        h.clock.advance(GRACE / 2);
        h.handle.post(MatchEvent::Tick).unwrap();

        let (o_tx, mut o_rx) = mpsc::unbounded_channel();
        h.handle
            .post(MatchEvent::Connected {
                participant: h.o,
                connection: Uuid::new_v4(),
                outbound: o_tx,
            })
            .unwrap();
        let resumed = next_state(&mut o_rx).await;
        assert_eq!(resumed.state.phase, MatchPhase::Playing);
        assert_eq!(resumed.state.participants[1].symbol, Symbol::O);
        assert_eq!(next_state(&mut h.x_rx).await.seq, resumed.seq);

        // the stale socket closing later must not detach the new one
        h.handle
            .post(MatchEvent::Disconnected {
                participant: h.o,
                connection: h.o_conn,
            })
            .unwrap();
        h.handle.post(mv(h.x, 0, 0)).unwrap();
        let after = next_state(&mut o_rx).await;
        assert_eq!(after.state.phase, MatchPhase::Playing);
        assert_eq!(after.state.move_count, 1);
        assert_eq!(h.sink.calls.load(Ordering::SeqCst), 0);
        h.task.abort();
    }

    #[tokio::test]
    async fn grace_expiry_abandons_the_match() {
        let mut h = start(QUIET).await;
        h.handle
            .post(MatchEvent::Disconnected {
                participant: h.x,
                connection: h.x_conn,
            })
            .unwrap();
        assert_eq!(next_state(&mut h.o_rx).await.state.phase, MatchPhase::Waiting);

        h.clock.advance(GRACE);
        h.handle.post(MatchEvent::Tick).unwrap();
        let last = next_state(&mut h.o_rx).await;
        assert_eq!(last.state.phase, MatchPhase::Abandoned);
        assert_eq!(last.state.result, MatchResult::Abandoned { departed: h.x });

        timeout(Duration::from_secs(2), &mut h.task).await.unwrap().unwrap();
        let reports = h.sink.reports.lock().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].tag, ResultTag::Abandoned);
        assert_eq!(reports[0].departed, Some(h.x));
    }

    #[tokio::test]
    async fn explicit_leave_abandons_immediately() {
        let mut h = start(QUIET).await;
        h.handle.post(MatchEvent::Leave { participant: h.o }).unwrap();
        let last = next_state(&mut h.x_rx).await;
        assert_eq!(last.state.phase, MatchPhase::Abandoned);
        timeout(Duration::from_secs(2), &mut h.task).await.unwrap().unwrap();
        assert_eq!(h.sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stranger_cannot_attach() {
        let h = start(QUIET).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.handle
            .post(MatchEvent::Connected {
                participant: Uuid::new_v4(),
                connection: Uuid::new_v4(),
                outbound: tx,
            })
            .unwrap();
        match next_msg(&mut rx).await {
            ServerMsg::Rejected { code, .. } => assert_eq!(code, "not_a_participant"),
            other => panic!("unexpected {other:?}"),
        }
        h.task.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_terminal_events_report_exactly_once() {
        for _ in 0..20 {
            let h = start(Duration::from_millis(1)).await;
            // one move away from a win for X, with the deadline already blown
            for (who, row, col) in [(h.x, 0, 0), (h.o, 1, 0), (h.x, 0, 1), (h.o, 1, 1)] {
                h.handle.post(mv(who, row, col)).unwrap();
            }
            h.clock.advance(DEADLINE * 2);

            let mut posters = Vec::new();
            for i in 0..8 {
                let handle = h.handle.clone();
                let (x, o) = (h.x, h.o);
                posters.push(tokio::spawn(async move {
                    let event = match i % 4 {
                        0 => mv(x, 0, 2),
                        1 => MatchEvent::Leave { participant: o },
                        2 => MatchEvent::Tick,
                        _ => mv(o, 2, 2),
                    };
                    let _ = handle.post(event);
                }));
            }
            for p in posters {
                p.await.unwrap();
            }

            timeout(Duration::from_secs(2), h.task).await.unwrap().unwrap();
            assert_eq!(h.sink.calls.load(Ordering::SeqCst), 1);
            assert!(h.handle.snapshot().phase.is_terminal());
        }
    }

    #[test]
    fn registry_tracks_participants() {
        let registry = MatchRegistry::new();
        let (events, _rx) = mpsc::unbounded_channel();
        let (_tx, latest) = watch::channel(Arc::new(MatchState::create(
            Pairing {
                id: Uuid::new_v4(),
                display_name: "a".into(),
            },
            Pairing {
                id: Uuid::new_v4(),
                display_name: "b".into(),
            },
            0,
        )));
        let participants = {
            let state = latest.borrow();
            [state.participants[0].id, state.participants[1].id]
        };
        let handle = MatchHandle {
            id: Uuid::new_v4(),
            participants,
            events,
            latest,
        };

        registry.insert(handle.clone());
        assert_eq!(registry.active_matches(), 1);
        assert_eq!(registry.seated_players(), 2);
        assert_eq!(registry.for_participant(&participants[1]).unwrap().id, handle.id);

        registry.remove(&handle.id);
        assert_eq!(registry.active_matches(), 0);
        assert!(registry.for_participant(&participants[0]).is_none());
    }

    #[tokio::test]
    async fn registry_skips_finished_sessions_not_yet_removed() {
        let mut h = start(QUIET).await;
        let registry = MatchRegistry::new();
        registry.insert(h.handle.clone());
        assert!(registry.for_participant(&h.x).is_some());

        h.handle.post(MatchEvent::Leave { participant: h.x }).unwrap();
        timeout(Duration::from_secs(2), &mut h.task).await.unwrap().unwrap();

        // still registered until the spawner removes it, but no longer live
        assert_eq!(registry.active_matches(), 1);
        assert!(registry.for_participant(&h.x).is_none());
    }

    #[tokio::test]
    async fn abandoned_match_ignores_everything_after() {
        let mut h = start(QUIET).await;
        h.handle.post(MatchEvent::Leave { participant: h.x }).unwrap();
        let queued_after = [
            h.handle.post(mv(h.o, 1, 1)),
            h.handle.post(MatchEvent::Leave { participant: h.o }),
        ]
        .into_iter()
        .filter(Result::is_ok)
        .count();
        let _ = h.handle.post(MatchEvent::Tick);

        timeout(Duration::from_secs(2), &mut h.task).await.unwrap().unwrap();

        let last = h.handle.snapshot();
        assert_eq!(last.phase, MatchPhase::Abandoned);
        assert_eq!(last.result, MatchResult::Abandoned { departed: h.x });
        assert_eq!(last.move_count, 0);

        assert_eq!(h.sink.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.sink.reports.lock().await[0].tag, ResultTag::Abandoned);

        let mut states = 0;
        let mut finished_rejections = 0;
        while let Ok(msg) = h.o_rx.try_recv() {
            match msg {
                ServerMsg::State(_) => states += 1,
                ServerMsg::Rejected { code, .. } if code == "match_already_finished" => {
                    finished_rejections += 1
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(states, 1);
        assert_eq!(finished_rejections, queued_after);
    }
}
