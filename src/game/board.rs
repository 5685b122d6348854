//! Board model - 3x3 grid and line evaluation

use serde::{Deserialize, Serialize};

/// Side length of the grid
pub const BOARD_SIZE: usize = 3;

/// Symbol a participant plays with. `X` always moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    X,
    O,
}

impl Symbol {
    pub fn opponent(self) -> Self {
        match self {
            Symbol::X => Symbol::O,
            Symbol::O => Symbol::X,
        }
    }
}

/// Contents of a single cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cell {
    #[default]
    Empty,
    Taken(Symbol),
}

/// Row/column pair on the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coord {
    pub row: usize,
    pub col: usize,
}

impl Coord {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Validate raw wire coordinates. Negative or >= 3 values are rejected.
    pub fn checked(row: i32, col: i32) -> Result<Self, BoardError> {
        let in_range = |v: i32| (0..BOARD_SIZE as i32).contains(&v);
        if in_range(row) && in_range(col) {
            Ok(Self::new(row as usize, col as usize))
        } else {
            Err(BoardError::OutOfBounds { row, col })
        }
    }
}

/// Result of evaluating the board after a move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Win([Coord; 3]),
    Draw,
    Ongoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("cell ({row}, {col}) is outside the board")]
    OutOfBounds { row: i32, col: i32 },

    #[error("cell ({row}, {col}) is already occupied")]
    CellOccupied { row: usize, col: usize },
}

/// Every line that completes a game
const LINES: [[Coord; 3]; 8] = [
    [Coord::new(0, 0), Coord::new(0, 1), Coord::new(0, 2)],
    [Coord::new(1, 0), Coord::new(1, 1), Coord::new(1, 2)],
    [Coord::new(2, 0), Coord::new(2, 1), Coord::new(2, 2)],
    [Coord::new(0, 0), Coord::new(1, 0), Coord::new(2, 0)],
    [Coord::new(0, 1), Coord::new(1, 1), Coord::new(2, 1)],
    [Coord::new(0, 2), Coord::new(1, 2), Coord::new(2, 2)],
    [Coord::new(0, 0), Coord::new(1, 1), Coord::new(2, 2)],
    [Coord::new(0, 2), Coord::new(1, 1), Coord::new(2, 0)],
];

/// The grid. Values are never edited once published; `apply` returns a new board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn from_rows(cells: [[Cell; BOARD_SIZE]; BOARD_SIZE]) -> Self {
        Self { cells }
    }

    pub fn get(&self, at: Coord) -> Cell {
        self.cells[at.row][at.col]
    }

    /// Number of non-empty cells
    pub fn filled(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|c| **c != Cell::Empty)
            .count()
    }

    pub fn is_full(&self) -> bool {
        self.filled() == BOARD_SIZE * BOARD_SIZE
    }

    /// Place `symbol` at (row, col), returning the new board
    pub fn apply(&self, row: i32, col: i32, symbol: Symbol) -> Result<Board, BoardError> {
        let at = Coord::checked(row, col)?;
        if self.get(at) != Cell::Empty {
            return Err(BoardError::CellOccupied {
                row: at.row,
                col: at.col,
            });
        }

        let mut next = *self;
        next.cells[at.row][at.col] = Cell::Taken(symbol);
        Ok(next)
    }

    /// Evaluate the board from the cell just played.
    ///
    /// Only lines through `last` are checked, in the order row, column, main
    /// diagonal, anti-diagonal. A line can only become complete on the move
    /// that fills its last cell, so this matches a full scan.
    pub fn evaluate(&self, last: Coord, symbol: Symbol) -> Evaluation {
        let mut candidates: Vec<[Coord; 3]> = Vec::with_capacity(4);
        candidates.push([0, 1, 2].map(|c| Coord::new(last.row, c)));
        candidates.push([0, 1, 2].map(|r| Coord::new(r, last.col)));
        if last.row == last.col {
            candidates.push([0, 1, 2].map(|i| Coord::new(i, i)));
        }
        if last.row + last.col == BOARD_SIZE - 1 {
            candidates.push([0, 1, 2].map(|i| Coord::new(i, BOARD_SIZE - 1 - i)));
        }

        let mine = Cell::Taken(symbol);
        if let Some(line) = candidates
            .into_iter()
            .find(|line| line.iter().all(|c| self.get(*c) == mine))
        {
            return Evaluation::Win(line);
        }

        if self.is_full() {
            Evaluation::Draw
        } else {
            Evaluation::Ongoing
        }
    }

    /// Whether `symbol` holds any complete line anywhere on the board
    pub fn has_line(&self, symbol: Symbol) -> bool {
        let mine = Cell::Taken(symbol);
        LINES
            .iter()
            .any(|line| line.iter().all(|c| self.get(*c) == mine))
    }
}
