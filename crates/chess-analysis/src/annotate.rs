//! Turns ordered per-position results into move annotations and a summary.
//!
//! Everything here is a pure function of its inputs: the same evaluations
//! always produce the same annotations.

use crate::config::{AnnotationConfig, Metric};
use crate::evaluation::PositionEvaluation;
use crate::pool::PlyOutcome;
use crate::position::{GamePosition, Side};
use crate::quality::{AnnotationStatus, GameSummary, MoveAnnotation, MoveQuality, PlayerStats};

/// Annotates every move of a game.
///
/// `outcomes[i]` is the result for `positions[i]`, and `moves[i]` leads from
/// `positions[i]` to `positions[i + 1]`. A move is judged by comparing the
/// rank-1 score of the position before it with the one after it.
pub fn annotate_game(
    positions: &[GamePosition],
    moves: &[String],
    outcomes: &[PlyOutcome],
    config: &AnnotationConfig,
) -> Vec<MoveAnnotation> {
    moves
        .iter()
        .enumerate()
        .map(|(idx, played)| {
            let ply = idx + 1;
            let side = positions
                .get(idx)
                .map(GamePosition::side_to_move)
                .unwrap_or(if ply % 2 == 1 { Side::White } else { Side::Black });
            annotate_move(ply, played, side, outcomes.get(idx), outcomes.get(ply), config)
        })
        .collect()
}

fn annotate_move(
    ply: usize,
    played: &str,
    side: Side,
    before: Option<&PlyOutcome>,
    after: Option<&PlyOutcome>,
    config: &AnnotationConfig,
) -> MoveAnnotation {
    let before_eval = before.and_then(PlyOutcome::evaluation);
    let after_eval = after.and_then(PlyOutcome::evaluation);

    let mut annotation = MoveAnnotation {
        ply,
        played_move: played.to_string(),
        side,
        eval_before: before_eval.and_then(PositionEvaluation::white_score),
        eval_after: after_eval.and_then(PositionEvaluation::white_score),
        delta: None,
        quality: None,
        suggested_move: before_eval
            .and_then(PositionEvaluation::best_line)
            .and_then(|line| line.first_move())
            .map(str::to_string),
        status: AnnotationStatus::Annotated,
    };

    let (before_eval, after_eval) = match (usable(before), usable(after)) {
        (Ok(b), Ok(a)) => (b, a),
        (b, a) => {
            annotation.status = worst(b.err(), a.err());
            return annotation;
        }
    };

    if let Some((delta, quality)) = move_loss(before_eval, after_eval, side, config) {
        annotation.delta = Some(delta);
        annotation.quality = Some(quality);
    }
    annotation
}

/// Loss of one move for `mover` under `config.metric`, with its label.
///
/// `None` while either position has no rank-1 line yet.
pub fn move_loss(
    before: &PositionEvaluation,
    after: &PositionEvaluation,
    mover: Side,
    config: &AnnotationConfig,
) -> Option<(f64, MoveQuality)> {
    before.best_line()?;
    after.best_line()?;
    Some(match config.metric {
        Metric::Cpl => {
            let cpl = centipawn_loss(before, after, mover, config);
            (cpl as f64, MoveQuality::from_cpl(cpl))
        }
        Metric::Wdl => {
            let loss = expected_score_loss(before, after, mover, config);
            (loss, MoveQuality::from_expected_score_loss(loss))
        }
    })
}

fn usable(outcome: Option<&PlyOutcome>) -> Result<&PositionEvaluation, AnnotationStatus> {
    match outcome {
        Some(PlyOutcome::Evaluated(evaluation)) if evaluation.best_line().is_some() => Ok(evaluation),
        Some(PlyOutcome::Evaluated(_)) => Err(AnnotationStatus::Unavailable),
        Some(PlyOutcome::AnalysisFailed { .. }) => Err(AnnotationStatus::Failed),
        Some(PlyOutcome::Abandoned) | None => Err(AnnotationStatus::Abandoned),
    }
}

fn worst(a: Option<AnnotationStatus>, b: Option<AnnotationStatus>) -> AnnotationStatus {
    let rank = |status: &AnnotationStatus| match status {
        AnnotationStatus::Failed => 3,
        AnnotationStatus::Abandoned => 2,
        AnnotationStatus::Unavailable => 1,
        AnnotationStatus::Annotated => 0,
    };
    a.into_iter()
        .chain(b)
        .max_by_key(rank)
        .unwrap_or(AnnotationStatus::Unavailable)
}

fn clamped_white_cp(evaluation: &PositionEvaluation, config: &AnnotationConfig) -> i32 {
    evaluation
        .white_centipawns(config.mate_value)
        .unwrap_or(0)
        .clamp(-config.clamp_cp, config.clamp_cp)
}

/// Centipawns the mover gave away, clamped scores on both sides.
fn centipawn_loss(
    before: &PositionEvaluation,
    after: &PositionEvaluation,
    mover: Side,
    config: &AnnotationConfig,
) -> i32 {
    let change = clamped_white_cp(after, config) - clamped_white_cp(before, config);
    let for_mover = match mover {
        Side::White => change,
        Side::Black => -change,
    };
    (-for_mover).max(0)
}

/// Expected score for White in `[0, 1]`: from WDL when reported, otherwise
/// from the centipawn score through the logistic curve.
pub fn white_expected_score(evaluation: &PositionEvaluation, config: &AnnotationConfig) -> f64 {
    if let Some(score) = evaluation.white_wdl().and_then(|wdl| wdl.expected_score()) {
        return score;
    }
    let cp = evaluation.white_centipawns(config.mate_value).unwrap_or(0);
    1.0 / (1.0 + (-config.cp_logistic_scale * cp as f64).exp())
}

fn expected_score_loss(
    before: &PositionEvaluation,
    after: &PositionEvaluation,
    mover: Side,
    config: &AnnotationConfig,
) -> f64 {
    let change = white_expected_score(after, config) - white_expected_score(before, config);
    let for_mover = match mover {
        Side::White => change,
        Side::Black => -change,
    };
    (-for_mover).max(0.0)
}

/// Aggregates annotations per side.
///
/// Moves that could not be annotated are counted as failed and left out of
/// the averages. A side without annotated moves gets no rating.
pub fn summarize(
    annotations: &[MoveAnnotation],
    config: &AnnotationConfig,
    white_player: &str,
    black_player: &str,
) -> GameSummary {
    let mut white = SideTotals::default();
    let mut black = SideTotals::default();

    for annotation in annotations {
        let totals = match annotation.side {
            Side::White => &mut white,
            Side::Black => &mut black,
        };
        match (annotation.quality, annotation.delta) {
            (Some(quality), Some(delta)) => {
                totals.stats.record(quality);
                totals.loss_sum += delta;
            }
            _ => totals.stats.failed_moves += 1,
        }
    }

    GameSummary {
        metric: config.metric,
        white_player: white_player.to_string(),
        black_player: black_player.to_string(),
        white_stats: white.finish(config),
        black_stats: black.finish(config),
    }
}

#[derive(Default)]
struct SideTotals {
    stats: PlayerStats,
    loss_sum: f64,
}

impl SideTotals {
    fn finish(mut self, config: &AnnotationConfig) -> PlayerStats {
        if self.stats.total_moves == 0 {
            return self.stats;
        }
        let avg = self.loss_sum / self.stats.total_moves as f64;
        self.stats.avg_loss = avg;
        self.stats.estimated_rating = match config.metric {
            Metric::Cpl => Some(config.rating.estimate(avg)),
            Metric::Wdl => config.wdl_rating.map(|model| model.estimate(avg)),
        };
        self.stats
    }
}
