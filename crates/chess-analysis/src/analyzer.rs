//! Game analysis with move quality classification.
//!
//! This module provides the [`GameAnalyzer`] which runs the analysis pool
//! over every position of a game and annotates the moves in between.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::annotate::{annotate_game, summarize};
use crate::config::{AnalysisOptions, AnnotationConfig, ConfigError};
use crate::evaluation::EvaluationStatus;
use crate::pool::{AnalysisPool, PlyOutcome, PoolEvent, ProcessSessionFactory, SessionFactory};
use crate::position::{GameError, GameRecord};
use crate::quality::{GameSummary, MoveAnnotation};
use crate::session::SearchLimits;

/// Errors that abort a whole game analysis.
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// The options were rejected before any engine started.
    #[error("Invalid analysis options: {0}")]
    Config(#[from] ConfigError),
    /// Invalid game data was provided.
    #[error("Invalid game data: {0}")]
    InvalidGame(#[from] GameError),
    /// The pool coordinator died.
    #[error("Analysis pool failed: {0}")]
    Pool(#[from] tokio::task::JoinError),
}

/// Everything known about a game after an analysis run.
#[derive(Debug, Clone, Serialize)]
pub struct GameReport {
    /// One outcome per position, initial position first.
    pub positions: Vec<PlyOutcome>,
    /// One annotation per move.
    pub moves: Vec<MoveAnnotation>,
    pub summary: GameSummary,
    /// True when cancellation left positions abandoned or searches
    /// interrupted. A cancel that arrives after the last position finished
    /// leaves the report complete.
    pub cancelled: bool,
    /// Wall-clock duration of the run.
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Number of pool workers for a requested thread count, bounded by the
/// available CPUs.
pub fn worker_count(threads: u32) -> usize {
    (threads as usize).min(num_cpus::get()).max(1)
}

/// Analyzes chess games to classify move quality.
pub struct GameAnalyzer<F> {
    pool: AnalysisPool<F>,
    annotation: AnnotationConfig,
}

impl GameAnalyzer<ProcessSessionFactory> {
    /// Creates an analyzer that launches the engine binary at `engine_path`.
    ///
    /// Each worker runs its own engine process with a single search thread.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzerError::Config`] if `options` are out of range.
    pub fn for_binary(engine_path: impl Into<PathBuf>, options: &AnalysisOptions) -> Result<Self, AnalyzerError> {
        let factory = ProcessSessionFactory::new(engine_path, options.worker_session_config());
        Self::new(factory, options)
    }
}

impl<F: SessionFactory> GameAnalyzer<F> {
    /// Creates an analyzer drawing sessions from `factory`.
    ///
    /// # Arguments
    ///
    /// * `factory` - Starts engine sessions for the pool workers.
    /// * `options` - Validated before anything else happens.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzerError::Config`] if `options` are out of range.
    pub fn new(factory: F, options: &AnalysisOptions) -> Result<Self, AnalyzerError> {
        options.validate()?;
        let workers = worker_count(options.threads);
        Ok(Self {
            pool: AnalysisPool::new(factory, workers, SearchLimits::from(options)),
            annotation: options.annotation_config(),
        })
    }

    /// Replaces the annotation constants, keeping nothing from the options.
    pub fn with_annotation(mut self, annotation: AnnotationConfig) -> Self {
        self.annotation = annotation;
        self
    }

    /// Analyzes a complete chess game.
    ///
    /// Pool events are handed to `on_event` in ply order while the run is
    /// in progress. Cancelling `cancel` stops the engines; the report then
    /// covers whatever was finished.
    ///
    /// # Errors
    ///
    /// Returns an error if the game record is malformed. Engine failures do
    /// not abort the run; they show up as failed positions in the report.
    pub async fn analyze<C>(
        &self,
        game: &GameRecord,
        cancel: CancellationToken,
        mut on_event: C,
    ) -> Result<GameReport, AnalyzerError>
    where
        C: FnMut(&PoolEvent),
    {
        let started = Instant::now();
        let positions = game.validate()?;
        info!(
            white = %game.white,
            black = %game.black,
            plies = game.plies(),
            "Analyzing game"
        );

        let mut run = self.pool.run(positions.clone(), cancel);
        while let Some(event) = run.next_event().await {
            on_event(&event);
        }
        let outcomes = run.finish().await?;
        let cancelled = outcomes.iter().any(is_cut_short);

        let moves = annotate_game(&positions, &game.moves, &outcomes, &self.annotation);
        let summary = summarize(&moves, &self.annotation, &game.white, &game.black);
        let duration = started.elapsed();
        info!(duration = ?duration, "Game analysis finished");

        Ok(GameReport {
            positions: outcomes,
            moves,
            summary,
            cancelled,
            duration,
        })
    }
}

fn is_cut_short(outcome: &PlyOutcome) -> bool {
    match outcome {
        PlyOutcome::Abandoned => true,
        PlyOutcome::Evaluated(evaluation) => evaluation.status == EvaluationStatus::Interrupted,
        PlyOutcome::AnalysisFailed { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_bounds() {
        assert_eq!(worker_count(0), 1);
        assert!(worker_count(8) <= num_cpus::get().max(1));
        assert!(worker_count(1) == 1);
    }

    #[test]
    fn test_rejects_invalid_options() {
        let options = AnalysisOptions {
            multipv: 12,
            ..Default::default()
        };
        let result = GameAnalyzer::for_binary("stockfish", &options);
        assert!(matches!(result, Err(AnalyzerError::Config(_))));
    }

    #[test]
    fn test_only_cut_short_outcomes_mark_report_partial() {
        use crate::evaluation::PositionEvaluation;
        use crate::position::Side;

        let mut finished = PositionEvaluation::searching("fen", Side::White);
        finished.status = EvaluationStatus::Complete;
        let mut stopped = finished.clone();
        stopped.status = EvaluationStatus::Interrupted;

        assert!(!is_cut_short(&PlyOutcome::Evaluated(finished)));
        assert!(!is_cut_short(&PlyOutcome::AnalysisFailed {
            reason: "engine exited".to_string()
        }));
        assert!(is_cut_short(&PlyOutcome::Evaluated(stopped)));
        assert!(is_cut_short(&PlyOutcome::Abandoned));
    }
}
