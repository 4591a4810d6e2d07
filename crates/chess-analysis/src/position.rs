//! Positions and game records handed over by the game importer.

use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, Position};
use thiserror::Error;

use crate::evaluation::Terminal;

/// Errors for malformed game input.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("Invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("Game has no positions")]
    Empty,

    #[error("Expected {expected} positions for {moves} moves, got {actual}")]
    LengthMismatch {
        moves: usize,
        expected: usize,
        actual: usize,
    },
}

/// The side to move, or the side that played a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl From<Color> for Side {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

/// A validated position, identified by its FEN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamePosition {
    fen: String,
    side_to_move: Side,
    terminal: Option<Terminal>,
}

impl GamePosition {
    /// Parses and validates a FEN, recording whether the side to move has
    /// any legal move left.
    pub fn from_fen(fen: &str) -> Result<Self, GameError> {
        let fen = fen.trim();
        let board = parse_board(fen)?;
        let terminal = if board.is_checkmate() {
            Some(Terminal::Checkmate)
        } else if board.is_stalemate() {
            Some(Terminal::Stalemate)
        } else {
            None
        };

        Ok(Self {
            fen: fen.to_string(),
            side_to_move: board.turn().into(),
            terminal,
        })
    }

    /// The standard starting position.
    pub fn startpos() -> Self {
        Self {
            fen: STARTPOS_FEN.to_string(),
            side_to_move: Side::White,
            terminal: None,
        }
    }

    pub fn fen(&self) -> &str {
        &self.fen
    }

    pub fn side_to_move(&self) -> Side {
        self.side_to_move
    }

    /// Checkmate or stalemate, when the side to move cannot move.
    pub fn terminal(&self) -> Option<Terminal> {
        self.terminal
    }

    pub(crate) fn board(&self) -> Result<Chess, GameError> {
        parse_board(&self.fen)
    }
}

fn parse_board(fen: &str) -> Result<Chess, GameError> {
    let invalid = |reason: String| GameError::InvalidFen {
        fen: fen.to_string(),
        reason,
    };
    let parsed: Fen = fen.parse().map_err(|e| invalid(format!("{}", e)))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|e| invalid(format!("{}", e)))
}

pub const STARTPOS_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Raw game as produced by the importer: `positions[i]` is the position
/// before `moves[i]`, and the last position follows the last move.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameRecord {
    #[serde(default)]
    pub white: String,
    #[serde(default)]
    pub black: String,
    pub positions: Vec<String>,
    #[serde(default)]
    pub moves: Vec<String>,
}

impl GameRecord {
    /// Checks the shape of the record and parses every position.
    pub fn validate(&self) -> Result<Vec<GamePosition>, GameError> {
        if self.positions.is_empty() {
            return Err(GameError::Empty);
        }
        if self.positions.len() != self.moves.len() + 1 {
            return Err(GameError::LengthMismatch {
                moves: self.moves.len(),
                expected: self.moves.len() + 1,
                actual: self.positions.len(),
            });
        }
        self.positions
            .iter()
            .map(|fen| GamePosition::from_fen(fen))
            .collect()
    }

    /// Number of plies in the game.
    pub fn plies(&self) -> usize {
        self.moves.len()
    }
}
