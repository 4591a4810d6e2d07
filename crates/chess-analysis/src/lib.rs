//! Chess game analysis driven by a UCI engine.
//!
//! This crate runs Stockfish (or any UCI engine) over the positions of a
//! game, streams evaluations while they improve, and turns the results into
//! move quality judgments and per-player statistics.
//!
//! # Overview
//!
//! - [`Provisioner`] - Finds or downloads the engine binary
//! - [`EngineSession`] - One engine process and its protocol state machine
//! - [`PositionEvaluator`] - Folds a search stream into a [`PositionEvaluation`],
//!   judges a single move live ([`MoveComparison`]) and picks moves for play
//! - [`AnalysisPool`] - Evaluates many positions concurrently, delivered in order
//! - [`annotate_game`] / [`summarize`] - Move annotations and the [`GameSummary`]
//! - [`GameAnalyzer`] - All of the above for one [`GameRecord`]
//! - [`format_pv`] - Principal variations as numbered SAN
//!
//! # Example
//!
//! ```ignore
//! use chess_analysis::{AnalysisOptions, GameAnalyzer, GameRecord};
//! use tokio_util::sync::CancellationToken;
//!
//! let analyzer = GameAnalyzer::for_binary("stockfish", &AnalysisOptions::default())?;
//! let report = analyzer.analyze(&game, CancellationToken::new(), |_| {}).await?;
//! println!("White rating: {:?}", report.summary.white_stats.estimated_rating);
//! ```

pub mod analyzer;
pub mod annotate;
pub mod config;
pub mod evaluation;
pub mod evaluator;
pub mod notation;
pub mod pool;
pub mod position;
pub mod provision;
pub mod quality;
pub mod sequencer;
pub mod session;

pub use analyzer::{worker_count, AnalyzerError, GameAnalyzer, GameReport};
pub use annotate::{annotate_game, move_loss, summarize, white_expected_score};
pub use config::{
    AnalysisOptions, AnnotationConfig, ConfigError, Metric, ProvisionConfig, RatingModel,
    SessionConfig,
};
pub use evaluation::{Evaluation, EvaluationLine, EvaluationStatus, PositionEvaluation, Terminal};
pub use evaluator::{EngineMove, EvaluationHandle, MoveComparison, PositionEvaluator};
pub use notation::{format_pv, PV_DISPLAY_PLIES};
pub use pool::{AnalysisPool, PlyOutcome, PoolEvent, PoolRun, ProcessSessionFactory, SessionFactory};
pub use position::{GameError, GamePosition, GameRecord, Side, STARTPOS_FEN};
pub use provision::{Platform, ProvisionError, Provisioner};
pub use quality::{AnnotationStatus, GameSummary, MoveAnnotation, MoveQuality, PlayerStats};
pub use sequencer::Sequencer;
pub use session::{
    EngineSession, Search, SearchEvent, SearchLimits, SessionError, SessionState, MAX_SKILL_LEVEL,
};
