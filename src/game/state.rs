//! Match state machine
//!
//! Every operation takes the current `MatchState` by reference and returns a
//! brand new state. A published state is never edited afterwards, so a
//! snapshot handed to a participant stays valid forever.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::board::{Board, BoardError, Coord, Evaluation, Symbol};

/// Match lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Fewer than two participants present
    Waiting,
    /// Both present, moves accepted
    Playing,
    /// A win or draw has been decided
    Finished,
    /// A participant left for good before a result
    Abandoned,
}

impl MatchPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchPhase::Finished | MatchPhase::Abandoned)
    }
}

/// Result of the match so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchResult {
    Ongoing,
    WinByLine { winner: Symbol },
    WinByForfeit { winner: Symbol },
    Draw,
    Abandoned { departed: Uuid },
}

impl MatchResult {
    pub fn winner(&self) -> Option<Symbol> {
        match self {
            MatchResult::WinByLine { winner } | MatchResult::WinByForfeit { winner } => {
                Some(*winner)
            }
            _ => None,
        }
    }
}

/// One of the two seats in a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub display_name: String,
    pub symbol: Symbol,
    pub present: bool,
}

/// Identity and name handed over by matchmaking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub id: Uuid,
    pub display_name: String,
}

/// Authoritative state of one match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchState {
    pub board: Board,
    pub active_turn: Symbol,
    pub phase: MatchPhase,
    pub move_count: u32,
    pub result: MatchResult,
    /// Unix millis of the last accepted move (or of the last resume)
    pub last_move_time: u64,
    pub winning_cells: Option<[Coord; 3]>,
    /// Seat A (X) first, seat B (O) second
    pub participants: [Participant; 2],
}

/// What a transition did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing changed; the returned state equals the input
    Unchanged,
    /// State changed and the match goes on
    Advanced,
    /// State changed and the match reached a terminal phase
    Terminal,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: MatchState,
    pub outcome: Outcome,
}

impl Transition {
    fn unchanged(state: &MatchState) -> Self {
        Self {
            state: state.clone(),
            outcome: Outcome::Unchanged,
        }
    }

    fn from_next(state: MatchState) -> Self {
        let outcome = if state.phase.is_terminal() {
            Outcome::Terminal
        } else {
            Outcome::Advanced
        };
        Self { state, outcome }
    }
}

/// Rejections and faults raised by the state machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("cell ({row}, {col}) is outside the board")]
    OutOfBounds { row: i32, col: i32 },

    #[error("cell ({row}, {col}) is already occupied")]
    CellOccupied { row: usize, col: usize },

    #[error("not your turn")]
    NotYourTurn,

    #[error("match already finished")]
    MatchAlreadyFinished,

    #[error("not a participant in this match")]
    NotAParticipant,

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl MatchError {
    /// Rejections leave the match untouched and go back to the sender only.
    /// Anything else is a bug and aborts the match.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, MatchError::InvariantViolation(_))
    }

    /// Stable machine-readable code for the wire
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::OutOfBounds { .. } => "out_of_bounds",
            MatchError::CellOccupied { .. } => "cell_occupied",
            MatchError::NotYourTurn => "not_your_turn",
            MatchError::MatchAlreadyFinished => "match_already_finished",
            MatchError::NotAParticipant => "not_a_participant",
            MatchError::InvariantViolation(_) => "internal",
        }
    }
}

impl From<BoardError> for MatchError {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::OutOfBounds { row, col } => MatchError::OutOfBounds { row, col },
            BoardError::CellOccupied { row, col } => MatchError::CellOccupied { row, col },
        }
    }
}

impl MatchState {
    /// Start a match. Both participants are present by construction and `a` plays X.
    pub fn create(a: Pairing, b: Pairing, now: u64) -> Self {
        let seat = |p: Pairing, symbol| Participant {
            id: p.id,
            display_name: p.display_name,
            symbol,
            present: true,
        };

        Self {
            board: Board::new(),
            active_turn: Symbol::X,
            phase: MatchPhase::Playing,
            move_count: 0,
            result: MatchResult::Ongoing,
            last_move_time: now,
            winning_cells: None,
            participants: [seat(a, Symbol::X), seat(b, Symbol::O)],
        }
    }

    pub fn participant(&self, id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn participant_by_symbol(&self, symbol: Symbol) -> &Participant {
        match symbol {
            Symbol::X => &self.participants[0],
            Symbol::O => &self.participants[1],
        }
    }

    fn guard_live(&self) -> Result<(), MatchError> {
        if self.phase.is_terminal() {
            Err(MatchError::MatchAlreadyFinished)
        } else {
            Ok(())
        }
    }

    /// Validate and apply a move from `participant`
    pub fn submit_move(
        &self,
        participant: Uuid,
        row: i32,
        col: i32,
        now: u64,
    ) -> Result<Transition, MatchError> {
        self.guard_live()?;
        let symbol = self
            .participant(participant)
            .ok_or(MatchError::NotAParticipant)?
            .symbol;

        if self.phase != MatchPhase::Playing || symbol != self.active_turn {
            return Err(MatchError::NotYourTurn);
        }

        let board = self.board.apply(row, col, symbol)?;
        let at = Coord::new(row as usize, col as usize);

        let mut next = self.clone();
        next.board = board;
        next.move_count += 1;
        next.last_move_time = now;

        match board.evaluate(at, symbol) {
            Evaluation::Win(line) => {
                if board.has_line(symbol.opponent()) {
                    return Err(MatchError::InvariantViolation(format!(
                        "both {:?} and {:?} hold a complete line",
                        symbol,
                        symbol.opponent()
                    )));
                }
                next.phase = MatchPhase::Finished;
                next.result = MatchResult::WinByLine { winner: symbol };
                next.winning_cells = Some(line);
            }
            Evaluation::Draw => {
                next.phase = MatchPhase::Finished;
                next.result = MatchResult::Draw;
            }
            Evaluation::Ongoing => {
                next.active_turn = symbol.opponent();
            }
        }

        Ok(Transition::from_next(next))
    }

    /// Forfeit the participant on turn once the deadline has elapsed
    pub fn check_timeout(&self, now: u64, deadline: Duration) -> Result<Transition, MatchError> {
        self.guard_live()?;
        if self.phase != MatchPhase::Playing {
            return Ok(Transition::unchanged(self));
        }

        let elapsed = now.saturating_sub(self.last_move_time);
        if u128::from(elapsed) < deadline.as_millis() {
            return Ok(Transition::unchanged(self));
        }

        let mut next = self.clone();
        next.phase = MatchPhase::Finished;
        next.result = MatchResult::WinByForfeit {
            winner: self.active_turn.opponent(),
        };
        next.winning_cells = None;
        Ok(Transition::from_next(next))
    }

    /// End the match because `departed` left for good
    pub fn mark_abandoned(&self, departed: Uuid) -> Result<Transition, MatchError> {
        self.guard_live()?;
        if self.participant(departed).is_none() {
            return Err(MatchError::NotAParticipant);
        }

        let mut next = self.clone();
        next.phase = MatchPhase::Abandoned;
        next.result = MatchResult::Abandoned { departed };
        for p in next.participants.iter_mut().filter(|p| p.id == departed) {
            p.present = false;
        }
        Ok(Transition::from_next(next))
    }

    /// Record a connect or disconnect.
    ///
    /// Losing a participant pauses play (`Waiting`); getting both back resumes
    /// it and restarts the move clock at `now`.
    pub fn set_presence(
        &self,
        participant: Uuid,
        present: bool,
        now: u64,
    ) -> Result<Transition, MatchError> {
        self.guard_live()?;
        let seat = self
            .participants
            .iter()
            .position(|p| p.id == participant)
            .ok_or(MatchError::NotAParticipant)?;

        if self.participants[seat].present == present {
            return Ok(Transition::unchanged(self));
        }

        let mut next = self.clone();
        next.participants[seat].present = present;

        let all_present = next.participants.iter().all(|p| p.present);
        next.phase = if all_present {
            if self.phase == MatchPhase::Waiting {
                next.last_move_time = now;
            }
            MatchPhase::Playing
        } else {
            MatchPhase::Waiting
        };

        Ok(Transition::from_next(next))
    }
}
