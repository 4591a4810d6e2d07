//! End-to-end game analysis against scripted engines.

mod support;

use std::sync::Arc;

use chess_analysis::{
    AnalysisOptions, AnalyzerError, AnnotationStatus, EvaluationStatus, GameAnalyzer, GameRecord,
    Metric, MoveQuality, PlyOutcome, PoolEvent, Side, Terminal,
};
use support::{
    wdl_line, Counters, FakeEngine, FakeFactory, Finish, Response, GAME_FENS, GAME_MOVES, SCHOLARS_FENS,
    SCHOLARS_MOVES,
};
use tokio_util::sync::CancellationToken;
use uci::InfoBuilder;

fn scholars_mate() -> GameRecord {
    GameRecord {
        white: "Attacker".to_string(),
        black: "Victim".to_string(),
        positions: SCHOLARS_FENS.iter().map(|s| s.to_string()).collect(),
        moves: SCHOLARS_MOVES.iter().map(|s| s.to_string()).collect(),
    }
}

/// Scores from the side to move: White ends up at +0.30, +0.35, +0.40,
/// +0.20, +0.30, +0.60 and then mate in one after 3...Nf6.
fn scripted(counters: Arc<Counters>) -> FakeEngine {
    let scores = [30, -35, 40, -20, 30, -60];
    let best = ["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "d8e7"];
    let mut engine = FakeEngine::new(counters);
    for (idx, (cp, mv)) in scores.iter().zip(best).enumerate() {
        engine = engine.respond(SCHOLARS_FENS[idx], Response::scored(*cp, mv));
    }
    let mate = InfoBuilder::new()
        .depth(20)
        .multipv(1)
        .score_mate(1)
        .pv(vec!["h5f7".to_string()])
        .build();
    engine.respond(SCHOLARS_FENS[6], Response::best(vec![mate], "h5f7"))
}

fn options() -> AnalysisOptions {
    AnalysisOptions {
        threads: 2,
        time_per_position: 1.0,
        ..AnalysisOptions::default()
    }
}

#[tokio::test]
async fn test_scholars_mate_report() {
    let counters = Arc::new(Counters::default());
    let analyzer = GameAnalyzer::new(FakeFactory::uniform(scripted(Arc::clone(&counters))), &options()).unwrap();

    let mut plies = Vec::new();
    let report = analyzer
        .analyze(&scholars_mate(), CancellationToken::new(), |event| plies.push(event.ply()))
        .await
        .unwrap();

    assert!(plies.windows(2).all(|w| w[0] <= w[1]));
    assert!(!report.cancelled);
    assert_eq!(report.positions.len(), 8);
    assert_eq!(report.moves.len(), 7);

    // The final position is mate and was never searched.
    let last = report.positions[7].evaluation().unwrap();
    assert_eq!(last.status, EvaluationStatus::Terminal(Terminal::Checkmate));
    assert_eq!(counters.searches(), 7);

    let losses: Vec<f64> = report.moves.iter().map(|m| m.delta.unwrap()).collect();
    assert_eq!(losses, vec![0.0, 5.0, 20.0, 10.0, 0.0, 940.0, 0.0]);

    let blunder = &report.moves[5];
    assert_eq!(blunder.played_move, "g8f6");
    assert_eq!(blunder.side, Side::Black);
    assert_eq!(blunder.quality, Some(MoveQuality::Blunder));
    assert_eq!(blunder.suggested_move.as_deref(), Some("d8e7"));
    assert!(report.moves.iter().all(|m| m.status == AnnotationStatus::Annotated));

    let white = report.summary.stats(Side::White);
    assert_eq!(white.total_moves, 4);
    assert!((white.avg_loss - 5.0).abs() < 1e-9);
    let expected = 3100.0 * (-0.05f64).exp();
    assert!((white.estimated_rating.unwrap() - expected).abs() < 1e-6);

    let black = report.summary.stats(Side::Black);
    assert_eq!(black.total_moves, 3);
    assert_eq!(black.blunders, 1);
    assert!((black.avg_loss - 955.0 / 3.0).abs() < 1e-9);
    assert_eq!(report.summary.white_player, "Attacker");

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["positions"][7]["outcome"], "evaluated");
    assert_eq!(json["summary"]["metric"], "cpl");
    assert!(json["duration_secs"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn test_wdl_metric_flips_for_black() {
    // White's expected score goes 0.75 -> 0.625 -> 0.875.
    let counters = Arc::new(Counters::default());
    let engine = FakeEngine::new(Arc::clone(&counters))
        .respond(GAME_FENS[0], Response::best(vec![wdl_line(12, 60, (500, 500, 0), &["d2d4"])], "d2d4"))
        .respond(GAME_FENS[1], Response::best(vec![wdl_line(12, -30, (250, 250, 500), &["c7c5"])], "c7c5"))
        .respond(GAME_FENS[2], Response::best(vec![wdl_line(12, 150, (800, 150, 50), &["g1f3"])], "g1f3"));
    let options = AnalysisOptions {
        metric: Metric::Wdl,
        ..options()
    };
    let analyzer = GameAnalyzer::new(FakeFactory::uniform(engine), &options).unwrap();
    let game = GameRecord {
        white: "White".to_string(),
        black: "Black".to_string(),
        positions: GAME_FENS[..3].iter().map(|s| s.to_string()).collect(),
        moves: GAME_MOVES[..2].iter().map(|s| s.to_string()).collect(),
    };

    let report = analyzer
        .analyze(&game, CancellationToken::new(), |_| {})
        .await
        .unwrap();

    let white_move = &report.moves[0];
    assert_eq!(white_move.side, Side::White);
    assert_eq!(white_move.delta, Some(0.125));
    assert_eq!(white_move.quality, Some(MoveQuality::Mistake));
    assert_eq!(white_move.suggested_move.as_deref(), Some("d2d4"));

    let black_move = &report.moves[1];
    assert_eq!(black_move.side, Side::Black);
    assert_eq!(black_move.delta, Some(0.25));
    assert_eq!(black_move.quality, Some(MoveQuality::Blunder));

    let white = report.summary.stats(Side::White);
    assert_eq!(white.mistakes, 1);
    assert!((white.avg_loss - 0.125).abs() < 1e-12);
    // No rating model is configured for expected-score loss.
    assert_eq!(white.estimated_rating, None);
    assert_eq!(report.summary.stats(Side::Black).blunders, 1);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["summary"]["metric"], "wdl");
}

#[tokio::test]
async fn test_cancel_after_last_ply_keeps_report_complete() {
    let counters = Arc::new(Counters::default());
    let analyzer = GameAnalyzer::new(FakeFactory::uniform(scripted(counters)), &options()).unwrap();
    let cancel = CancellationToken::new();
    let last_ply = SCHOLARS_FENS.len() - 1;

    let trigger = cancel.clone();
    let report = analyzer
        .analyze(&scholars_mate(), cancel, |event| {
            if matches!(event, PoolEvent::Completed { ply, .. } if *ply == last_ply) {
                trigger.cancel();
            }
        })
        .await
        .unwrap();

    assert!(!report.cancelled);
    assert!(report
        .positions
        .iter()
        .all(|p| matches!(p, PlyOutcome::Evaluated(_))));
    assert!(report.moves.iter().all(|m| m.status == AnnotationStatus::Annotated));
}

#[tokio::test]
async fn test_failed_position_excluded_from_summary() {
    let counters = Arc::new(Counters::default());
    let engine = scripted(Arc::clone(&counters))
        .respond(SCHOLARS_FENS[3], Response::with_finish(Finish::Exit));
    let analyzer = GameAnalyzer::new(FakeFactory::uniform(engine), &options()).unwrap();

    let report = analyzer
        .analyze(&scholars_mate(), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert!(matches!(report.positions[3], PlyOutcome::AnalysisFailed { .. }));
    // Moves into and out of the failed position.
    assert_eq!(report.moves[2].status, AnnotationStatus::Failed);
    assert_eq!(report.moves[3].status, AnnotationStatus::Failed);
    assert_eq!(report.moves[2].delta, None);

    let white = report.summary.stats(Side::White);
    assert_eq!(white.failed_moves, 1);
    assert_eq!(white.total_moves, 3);
    let black = report.summary.stats(Side::Black);
    assert_eq!(black.failed_moves, 1);
    assert_eq!(black.total_moves, 2);
    assert!((black.avg_loss - 945.0 / 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let counters = Arc::new(Counters::default());
    let analyzer = GameAnalyzer::new(FakeFactory::uniform(scripted(counters)), &options()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut completed = 0;
    let report = analyzer
        .analyze(&scholars_mate(), cancel, |event| {
            if matches!(event, PoolEvent::Completed { .. }) {
                completed += 1;
            }
        })
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(completed, 8);
    assert!(report.positions.iter().all(|p| *p == PlyOutcome::Abandoned));
    assert!(report
        .moves
        .iter()
        .all(|m| m.status == AnnotationStatus::Abandoned));
    assert_eq!(report.summary.stats(Side::White).estimated_rating, None);
}

#[tokio::test]
async fn test_invalid_game_is_rejected() {
    let counters = Arc::new(Counters::default());
    let analyzer = GameAnalyzer::new(FakeFactory::uniform(FakeEngine::new(Arc::clone(&counters))), &options())
        .unwrap();
    let mut game = scholars_mate();
    game.moves.pop();

    let result = analyzer.analyze(&game, CancellationToken::new(), |_| {}).await;

    assert!(matches!(result, Err(AnalyzerError::InvalidGame(_))));
    assert_eq!(counters.searches(), 0);
}
