//! Chess position evaluation types.

use std::fmt;

use serde::Serialize;
use uci::{Bound, EngineInfo, Score, Wdl};

use crate::position::Side;

/// Represents a chess position evaluation.
///
/// Evaluations can be either centipawn scores (for normal positions)
/// or mate scores (when a forced mate is found). Engine output is always
/// relative to the side to move; use [`Evaluation::for_white`] to get a
/// fixed perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Evaluation {
    /// Centipawn evaluation
    Centipawns(i32),
    /// Mate in N moves (positive = the evaluated side mates, negative = it gets mated).
    /// `Mate(0)` means the evaluated side is already mated.
    Mate(i32),
}

impl Evaluation {
    /// Builds an evaluation from the raw `score cp` / `score mate` fields.
    /// Mate takes precedence when both are present.
    pub fn from_uci_score(cp: Option<i32>, mate: Option<i32>) -> Option<Self> {
        match (cp, mate) {
            (_, Some(m)) => Some(Evaluation::Mate(m)),
            (Some(c), None) => Some(Evaluation::Centipawns(c)),
            (None, None) => None,
        }
    }

    /// The same evaluation from the opponent's point of view.
    ///
    /// `Mate(0)` carries no sign and is returned unchanged; use
    /// [`PositionEvaluation::white_centipawns`] when the mated side matters.
    pub fn flip(self) -> Self {
        match self {
            Evaluation::Centipawns(cp) => Evaluation::Centipawns(-cp),
            Evaluation::Mate(n) => Evaluation::Mate(-n),
        }
    }

    /// Converts a side-to-move evaluation into White's point of view.
    pub fn for_white(self, side_to_move: Side) -> Self {
        match side_to_move {
            Side::White => self,
            Side::Black => self.flip(),
        }
    }

    /// Centipawn value with mates mapped to `±mate_value`, shortened by the
    /// distance so that faster mates rank higher.
    pub fn to_centipawns(self, mate_value: i32) -> i32 {
        match self {
            Evaluation::Centipawns(cp) => cp,
            Evaluation::Mate(0) => -mate_value,
            Evaluation::Mate(n) if n > 0 => mate_value - n,
            Evaluation::Mate(n) => -mate_value - n,
        }
    }
}

impl From<Score> for Evaluation {
    fn from(score: Score) -> Self {
        match score {
            Score::Cp(cp) => Evaluation::Centipawns(cp),
            Score::Mate(m) => Evaluation::Mate(m),
        }
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Evaluation::Centipawns(cp) => {
                let pawns = cp as f64 / 100.0;
                if pawns >= 0.0 {
                    write!(f, "+{:.2}", pawns)
                } else {
                    write!(f, "{:.2}", pawns)
                }
            }
            Evaluation::Mate(n) => write!(f, "Mate in {}", n),
        }
    }
}

/// One principal variation at one search depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationLine {
    /// 1-based MultiPV rank.
    pub rank: u32,
    pub depth: u32,
    pub seldepth: Option<u32>,
    /// Score from the side to move.
    pub score: Evaluation,
    /// Win/draw/loss from the side to move, when the engine reports it.
    pub wdl: Option<Wdl>,
    pub nodes: Option<u64>,
    pub time_ms: Option<u64>,
    /// Moves in UCI notation.
    pub pv: Vec<String>,
}

impl EvaluationLine {
    /// Extracts a line from an `info` record.
    ///
    /// Only exact scores with a principal variation qualify; bound-only
    /// scores, `currmove` updates and `info string` chatter yield `None`.
    pub fn from_info(info: &EngineInfo) -> Option<Self> {
        let score = info.score?;
        if info.pv.is_empty() || matches!(info.bound, Some(Bound::Lower | Bound::Upper)) {
            return None;
        }

        Some(Self {
            rank: info.multipv.unwrap_or(1).max(1),
            depth: info.depth.unwrap_or(0),
            seldepth: info.seldepth,
            score: score.into(),
            wdl: info.wdl,
            nodes: info.nodes,
            time_ms: info.time,
            pv: info.pv.clone(),
        })
    }

    /// First move of the line, the engine's recommendation.
    pub fn first_move(&self) -> Option<&str> {
        self.pv.first().map(String::as_str)
    }
}

/// Why a position needs no search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Checkmate,
    Stalemate,
}

/// Lifecycle of a [`PositionEvaluation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// Search still running; lines may be missing or shallow.
    Searching,
    /// The engine finished on its own.
    Complete,
    /// The budget ran out before the engine answered; lines are best effort.
    TimedOut,
    /// The search was stopped by cancellation.
    Interrupted,
    /// No search was needed.
    Terminal(Terminal),
}

/// The ranked lines known for one position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionEvaluation {
    pub fen: String,
    pub side_to_move: Side,
    /// Sorted by rank; at most one line per rank.
    pub lines: Vec<EvaluationLine>,
    pub status: EvaluationStatus,
    /// The move the engine settled on (`bestmove`), if any.
    pub best_move: Option<String>,
}

impl PositionEvaluation {
    /// Empty snapshot for a search that just started.
    pub fn searching(fen: impl Into<String>, side_to_move: Side) -> Self {
        Self {
            fen: fen.into(),
            side_to_move,
            lines: Vec::new(),
            status: EvaluationStatus::Searching,
            best_move: None,
        }
    }

    /// Synthesized result for a position with no legal moves.
    pub fn terminal(fen: impl Into<String>, side_to_move: Side, terminal: Terminal) -> Self {
        let (score, wdl) = match terminal {
            Terminal::Checkmate => (Evaluation::Mate(0), Wdl::new(0, 0, 1000)),
            Terminal::Stalemate => (Evaluation::Centipawns(0), Wdl::new(0, 1000, 0)),
        };
        Self {
            fen: fen.into(),
            side_to_move,
            lines: vec![EvaluationLine {
                rank: 1,
                depth: 0,
                seldepth: None,
                score,
                wdl: Some(wdl),
                nodes: None,
                time_ms: None,
                pv: Vec::new(),
            }],
            status: EvaluationStatus::Terminal(terminal),
            best_move: None,
        }
    }

    /// Merges a streamed line into the snapshot.
    ///
    /// The newest line for a rank replaces the previous one unless it comes
    /// from a shallower depth. Returns whether the snapshot changed.
    pub fn apply(&mut self, line: EvaluationLine) -> bool {
        match self.lines.binary_search_by_key(&line.rank, |l| l.rank) {
            Ok(idx) => {
                if line.depth < self.lines[idx].depth || self.lines[idx] == line {
                    return false;
                }
                self.lines[idx] = line;
            }
            Err(idx) => self.lines.insert(idx, line),
        }
        true
    }

    /// The rank-1 line.
    pub fn best_line(&self) -> Option<&EvaluationLine> {
        self.lines.first().filter(|l| l.rank == 1)
    }

    /// Rank-1 score from White's point of view.
    pub fn white_score(&self) -> Option<Evaluation> {
        self.best_line()
            .map(|l| l.score.for_white(self.side_to_move))
    }

    /// Rank-1 score in centipawns from White's point of view, mates mapped
    /// through `mate_value`.
    pub fn white_centipawns(&self, mate_value: i32) -> Option<i32> {
        let cp = self.best_line()?.score.to_centipawns(mate_value);
        Some(match self.side_to_move {
            Side::White => cp,
            Side::Black => -cp,
        })
    }

    /// Rank-1 win/draw/loss from White's point of view.
    pub fn white_wdl(&self) -> Option<Wdl> {
        let wdl = self.best_line()?.wdl?;
        Some(match self.side_to_move {
            Side::White => wdl,
            Side::Black => wdl.flip(),
        })
    }

    /// The engine's recommended move: the rank-1 PV head, else `bestmove`.
    pub fn recommended_move(&self) -> Option<&str> {
        self.best_line()
            .and_then(EvaluationLine::first_move)
            .or(self.best_move.as_deref())
    }

    /// True once the search is over, whether it finished or not.
    pub fn is_final(&self) -> bool {
        self.status != EvaluationStatus::Searching
    }

    /// True when the result is final and carries a rank-1 line.
    pub fn is_complete(&self) -> bool {
        self.is_final() && self.best_line().is_some()
    }
}
