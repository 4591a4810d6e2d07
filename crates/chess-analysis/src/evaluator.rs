//! Single-position analysis on top of an [`EngineSession`].

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::annotate::move_loss;
use crate::config::AnnotationConfig;
use crate::evaluation::{Evaluation, EvaluationStatus, PositionEvaluation};
use crate::position::{GamePosition, Side};
use crate::quality::MoveQuality;
use crate::session::{EngineSession, SearchEvent, SearchLimits, SessionError};

/// Runs one search per position and folds its stream into a snapshot.
#[derive(Debug, Clone, Default)]
pub struct PositionEvaluator {
    limits: SearchLimits,
}

impl PositionEvaluator {
    pub fn new(limits: SearchLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SearchLimits {
        &self.limits
    }

    /// Evaluates `position`, calling `on_update` with the snapshot every time
    /// it changes and once more with the final result.
    ///
    /// Terminal positions are answered without a search. When `cancel`
    /// fires, the engine is stopped and the snapshot so far is returned with
    /// [`EvaluationStatus::Interrupted`].
    pub async fn evaluate<F>(
        &self,
        session: &mut EngineSession,
        position: &GamePosition,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<PositionEvaluation, SessionError>
    where
        F: FnMut(&PositionEvaluation),
    {
        if let Some(terminal) = position.terminal() {
            debug!(fen = position.fen(), ?terminal, "Terminal position, skipping search");
            let evaluation =
                PositionEvaluation::terminal(position.fen(), position.side_to_move(), terminal);
            on_update(&evaluation);
            return Ok(evaluation);
        }

        let mut snapshot = PositionEvaluation::searching(position.fen(), position.side_to_move());
        let mut search = session.analyze(position, &self.limits).await?;

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = search.next_event() => Some(event),
            };

            let Some(event) = step else {
                snapshot.best_move = match search.interrupt().await {
                    Ok(mv) => mv,
                    Err(err) => {
                        debug!(error = %err, "Engine did not confirm stop");
                        None
                    }
                };
                snapshot.status = EvaluationStatus::Interrupted;
                on_update(&snapshot);
                return Ok(snapshot);
            };

            match event? {
                Some(SearchEvent::Line(line)) => {
                    if snapshot.apply(line) {
                        on_update(&snapshot);
                    }
                }
                Some(SearchEvent::BestMove { mv, timed_out, .. }) => {
                    snapshot.best_move = mv;
                    snapshot.status = if timed_out {
                        EvaluationStatus::TimedOut
                    } else {
                        EvaluationStatus::Complete
                    };
                    on_update(&snapshot);
                    return Ok(snapshot);
                }
                None => {
                    snapshot.status = EvaluationStatus::Complete;
                    on_update(&snapshot);
                    return Ok(snapshot);
                }
            }
        }
    }

    /// Judges a move while it is being analyzed.
    ///
    /// `before` is searched to the end first. `after` is then streamed, and
    /// `on_update` sees the mover's loss recomputed for every snapshot of
    /// it, next to the ranked lines and suggestion of `before`. On
    /// cancellation during the first search, `after` is not searched and
    /// keeps an empty [`EvaluationStatus::Interrupted`] snapshot.
    pub async fn compare<F>(
        &self,
        session: &mut EngineSession,
        before: &GamePosition,
        after: &GamePosition,
        config: &AnnotationConfig,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<MoveComparison, SessionError>
    where
        F: FnMut(&MoveComparison),
    {
        let prior = self.evaluate(session, before, cancel, |_| {}).await?;
        debug!(
            fen = before.fen(),
            suggestion = prior.recommended_move().unwrap_or("-"),
            "Position before the move analyzed"
        );

        let mut comparison = MoveComparison {
            mover: before.side_to_move(),
            before: prior,
            after: PositionEvaluation::searching(after.fen(), after.side_to_move()),
            loss: None,
            quality: None,
        };
        if cancel.is_cancelled() {
            comparison.after.status = EvaluationStatus::Interrupted;
            on_update(&comparison);
            return Ok(comparison);
        }

        self.evaluate(session, after, cancel, |snapshot| {
            comparison.after = snapshot.clone();
            comparison.refresh(config);
            on_update(&comparison);
        })
        .await?;
        Ok(comparison)
    }

    /// Picks a move the way an engine set to `skill_level` would play it.
    ///
    /// The level is clamped to `0..=20` and stays in effect on `session`.
    /// Only the rank-1 line is searched.
    pub async fn choose_move(
        &self,
        session: &mut EngineSession,
        position: &GamePosition,
        skill_level: u32,
        cancel: &CancellationToken,
    ) -> Result<EngineMove, SessionError> {
        session.set_skill_level(skill_level).await?;
        let single = PositionEvaluator::new(SearchLimits {
            multipv: 1,
            ..self.limits
        });
        let evaluation = single.evaluate(session, position, cancel, |_| {}).await?;

        Ok(EngineMove {
            mv: evaluation.recommended_move().map(str::to_string),
            score: evaluation.white_score(),
            pv: evaluation
                .best_line()
                .map(|line| line.pv.clone())
                .unwrap_or_default(),
        })
    }

    /// Evaluates `position` on a background task that owns `session`.
    pub fn spawn(&self, mut session: EngineSession, position: GamePosition) -> EvaluationHandle {
        let (tx, rx) = watch::channel(PositionEvaluation::searching(
            position.fen(),
            position.side_to_move(),
        ));
        let cancel = CancellationToken::new();
        let evaluator = self.clone();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let result = evaluator
                .evaluate(&mut session, &position, &token, |snapshot| {
                    tx.send_replace(snapshot.clone());
                })
                .await;
            result.map(|evaluation| (evaluation, session))
        });

        EvaluationHandle { rx, cancel, task }
    }
}

/// A position being evaluated in the background.
///
/// [`latest`](Self::latest) reads the current best estimate at any time;
/// [`wait`](Self::wait) blocks until the search is over.
pub struct EvaluationHandle {
    rx: watch::Receiver<PositionEvaluation>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(PositionEvaluation, EngineSession), SessionError>>,
}

impl EvaluationHandle {
    /// Current snapshot. Check [`PositionEvaluation::is_final`] to tell a
    /// partial estimate from the finished result.
    pub fn latest(&self) -> PositionEvaluation {
        self.rx.borrow().clone()
    }

    /// Waits for the next snapshot. Returns `None` once no more will come.
    pub async fn changed(&mut self) -> Option<PositionEvaluation> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Stops the search; [`wait`](Self::wait) then returns the partial result.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the final evaluation and hands the session back.
    pub async fn wait(self) -> Result<(PositionEvaluation, EngineSession), SessionError> {
        self.task.await?
    }
}

/// A played move judged against the engine's view of the position before it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveComparison {
    /// The side that played the move.
    pub mover: Side,
    /// Final result for the position before the move.
    pub before: PositionEvaluation,
    /// Latest snapshot of the position after the move.
    pub after: PositionEvaluation,
    /// Loss for the mover under the configured metric, centipawns clamped.
    pub loss: Option<f64>,
    pub quality: Option<MoveQuality>,
}

impl MoveComparison {
    /// What the engine would have played instead.
    pub fn suggested_move(&self) -> Option<&str> {
        self.before.recommended_move()
    }

    fn refresh(&mut self, config: &AnnotationConfig) {
        let judged = move_loss(&self.before, &self.after, self.mover, config);
        self.loss = judged.map(|(loss, _)| loss);
        self.quality = judged.map(|(_, quality)| quality);
    }
}

/// The move an engine chose to play.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineMove {
    /// `None` when the position has no legal move.
    #[serde(rename = "move")]
    pub mv: Option<String>,
    /// Rank-1 score from White's point of view.
    pub score: Option<Evaluation>,
    /// The line the engine expects, in UCI notation.
    pub pv: Vec<String>,
}
