//! Move quality classification and per-player statistics.

use std::fmt;

use serde::Serialize;

use crate::config::Metric;
use crate::evaluation::Evaluation;
use crate::position::Side;

/// Classification of move quality based on evaluation loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveQuality {
    /// No loss at all (expected-score metric)
    Best,
    /// Loss below the "good" threshold but above zero
    Excellent,
    /// Small expected-score loss
    Good,
    /// Below the inaccuracy threshold (centipawn metric)
    Ok,
    /// Inaccuracy (noticeable loss)
    Inaccuracy,
    /// Mistake (significant loss)
    Mistake,
    /// Blunder (major loss)
    Blunder,
}

impl MoveQuality {
    /// Classifies a centipawn loss.
    pub fn from_cpl(cpl: i32) -> Self {
        match cpl {
            c if c >= 300 => MoveQuality::Blunder,
            c if c >= 150 => MoveQuality::Mistake,
            c if c >= 70 => MoveQuality::Inaccuracy,
            _ => MoveQuality::Ok,
        }
    }

    /// Classifies an expected-score loss in `[0, 1]`.
    pub fn from_expected_score_loss(loss: f64) -> Self {
        match loss {
            l if l >= 0.20 => MoveQuality::Blunder,
            l if l >= 0.10 => MoveQuality::Mistake,
            l if l >= 0.05 => MoveQuality::Inaccuracy,
            l if l >= 0.02 => MoveQuality::Good,
            l if l > 0.0 => MoveQuality::Excellent,
            _ => MoveQuality::Best,
        }
    }

    /// Annotation glyph, empty for unremarkable moves.
    pub fn symbol(self) -> &'static str {
        match self {
            MoveQuality::Blunder => "??",
            MoveQuality::Mistake => "?",
            MoveQuality::Inaccuracy => "?!",
            _ => "",
        }
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            MoveQuality::Inaccuracy | MoveQuality::Mistake | MoveQuality::Blunder
        )
    }
}

impl fmt::Display for MoveQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MoveQuality::Best => "Best",
            MoveQuality::Excellent => "Excellent",
            MoveQuality::Good => "Good",
            MoveQuality::Ok => "OK",
            MoveQuality::Inaccuracy => "Inaccuracy",
            MoveQuality::Mistake => "Mistake",
            MoveQuality::Blunder => "Blunder",
        };
        f.write_str(name)
    }
}

/// Why a move could or could not be annotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationStatus {
    Annotated,
    /// The position before or after the move failed to analyze.
    Failed,
    /// The run was cancelled before one of the positions was analyzed.
    Abandoned,
    /// An evaluation exists but has no rank-1 line.
    Unavailable,
}

/// Analysis result for a single move.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveAnnotation {
    /// 1-based ply number of the move
    pub ply: usize,
    /// The move that was played (in UCI notation)
    pub played_move: String,
    /// The side that played it
    pub side: Side,
    /// Rank-1 evaluation before the move, from White's point of view
    pub eval_before: Option<Evaluation>,
    /// Rank-1 evaluation after the move, from White's point of view
    pub eval_after: Option<Evaluation>,
    /// Loss for the mover: centipawns or expected score, never negative
    pub delta: Option<f64>,
    pub quality: Option<MoveQuality>,
    /// The engine's first choice in the position before the move
    pub suggested_move: Option<String>,
    pub status: AnnotationStatus,
}

/// Statistics for a player's performance in a game.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerStats {
    /// Moves with an annotation
    pub total_moves: u32,
    /// Moves that could not be annotated
    pub failed_moves: u32,
    pub best_moves: u32,
    pub excellent_moves: u32,
    pub good_moves: u32,
    pub ok_moves: u32,
    pub inaccuracies: u32,
    pub mistakes: u32,
    pub blunders: u32,
    /// Mean loss over annotated moves, in the active metric's unit
    pub avg_loss: f64,
    /// Performance rating estimated from the mean loss
    pub estimated_rating: Option<f64>,
}

impl PlayerStats {
    pub(crate) fn record(&mut self, quality: MoveQuality) {
        self.total_moves += 1;
        match quality {
            MoveQuality::Best => self.best_moves += 1,
            MoveQuality::Excellent => self.excellent_moves += 1,
            MoveQuality::Good => self.good_moves += 1,
            MoveQuality::Ok => self.ok_moves += 1,
            MoveQuality::Inaccuracy => self.inaccuracies += 1,
            MoveQuality::Mistake => self.mistakes += 1,
            MoveQuality::Blunder => self.blunders += 1,
        }
    }

    pub fn count(&self, quality: MoveQuality) -> u32 {
        match quality {
            MoveQuality::Best => self.best_moves,
            MoveQuality::Excellent => self.excellent_moves,
            MoveQuality::Good => self.good_moves,
            MoveQuality::Ok => self.ok_moves,
            MoveQuality::Inaccuracy => self.inaccuracies,
            MoveQuality::Mistake => self.mistakes,
            MoveQuality::Blunder => self.blunders,
        }
    }
}

/// Per-side summary of a game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameSummary {
    pub metric: Metric,
    pub white_player: String,
    pub black_player: String,
    pub white_stats: PlayerStats,
    pub black_stats: PlayerStats,
}

impl GameSummary {
    pub fn stats(&self, side: Side) -> &PlayerStats {
        match side {
            Side::White => &self.white_stats,
            Side::Black => &self.black_stats,
        }
    }
}
