//! Concurrent analysis of every position of a game.
//!
//! A fixed number of workers each own one engine session and pull the next
//! unclaimed ply from a shared counter. A coordinator task reorders their
//! results so that consumers always see plies in game order.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::evaluation::PositionEvaluation;
use crate::evaluator::PositionEvaluator;
use crate::position::GamePosition;
use crate::sequencer::Sequencer;
use crate::session::{EngineSession, SearchLimits, SessionError};

/// Starts fresh engine sessions for pool workers.
pub trait SessionFactory: Send + Sync + 'static {
    fn start(&self) -> impl Future<Output = Result<EngineSession, SessionError>> + Send;
}

/// Launches the engine binary at a fixed path.
#[derive(Debug, Clone)]
pub struct ProcessSessionFactory {
    path: PathBuf,
    config: SessionConfig,
}

impl ProcessSessionFactory {
    pub fn new(path: impl Into<PathBuf>, config: SessionConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }
}

impl SessionFactory for ProcessSessionFactory {
    fn start(&self) -> impl Future<Output = Result<EngineSession, SessionError>> + Send {
        EngineSession::start(self.path.clone(), &self.config)
    }
}

/// Final result for one position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlyOutcome {
    /// The position was searched, possibly only partially.
    Evaluated(PositionEvaluation),
    /// The engine failed on this position twice.
    AnalysisFailed { reason: String },
    /// Cancelled before any worker took the position.
    Abandoned,
}

impl PlyOutcome {
    pub fn evaluation(&self) -> Option<&PositionEvaluation> {
        match self {
            PlyOutcome::Evaluated(evaluation) => Some(evaluation),
            _ => None,
        }
    }
}

/// What the pool delivers, in non-decreasing ply order.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// Live snapshot of the earliest unfinished ply.
    Progress {
        ply: usize,
        evaluation: PositionEvaluation,
    },
    /// Final result for a ply; every earlier ply has been completed already.
    Completed { ply: usize, outcome: PlyOutcome },
}

impl PoolEvent {
    pub fn ply(&self) -> usize {
        match self {
            PoolEvent::Progress { ply, .. } | PoolEvent::Completed { ply, .. } => *ply,
        }
    }
}

enum WorkerEvent {
    Progress {
        ply: usize,
        evaluation: PositionEvaluation,
    },
    Done {
        ply: usize,
        outcome: PlyOutcome,
    },
}

/// A bounded set of engine sessions analyzing positions concurrently.
pub struct AnalysisPool<F> {
    factory: Arc<F>,
    workers: usize,
    evaluator: PositionEvaluator,
}

impl<F: SessionFactory> AnalysisPool<F> {
    /// Creates a pool running up to `workers` sessions at once.
    pub fn new(factory: F, workers: usize, limits: SearchLimits) -> Self {
        Self {
            factory: Arc::new(factory),
            workers: workers.max(1),
            evaluator: PositionEvaluator::new(limits),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Starts analyzing `positions`. Events stream out of the returned
    /// [`PoolRun`] as they become available in order.
    pub fn run(&self, positions: Vec<GamePosition>, cancel: CancellationToken) -> PoolRun {
        let total = positions.len();
        let positions: Arc<[GamePosition]> = positions.into();
        let next = Arc::new(AtomicUsize::new(0));
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker_count = self.workers.min(total);
        info!(positions = total, workers = worker_count, "Starting analysis pool");

        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            let worker = Worker {
                id,
                factory: Arc::clone(&self.factory),
                evaluator: self.evaluator.clone(),
                positions: Arc::clone(&positions),
                next: Arc::clone(&next),
                cancel: cancel.clone(),
                tx: worker_tx.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(worker_tx);

        let task = tokio::spawn(coordinate(total, workers, worker_rx, event_tx, cancel));
        PoolRun {
            events: event_rx,
            task,
        }
    }
}

/// Handle to a running pool.
pub struct PoolRun {
    events: mpsc::UnboundedReceiver<PoolEvent>,
    task: JoinHandle<Vec<PlyOutcome>>,
}

impl PoolRun {
    /// Next event in ply order, or `None` when every ply has completed.
    pub async fn next_event(&mut self) -> Option<PoolEvent> {
        self.events.recv().await
    }

    /// Waits for the run to end and returns one outcome per position.
    pub async fn finish(self) -> Result<Vec<PlyOutcome>, tokio::task::JoinError> {
        drop(self.events);
        self.task.await
    }
}

async fn coordinate(
    total: usize,
    mut workers: JoinSet<()>,
    mut worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    event_tx: mpsc::UnboundedSender<PoolEvent>,
    cancel: CancellationToken,
) -> Vec<PlyOutcome> {
    let mut sequencer = Sequencer::new();
    let mut outcomes = Vec::with_capacity(total);

    let mut release = |sequencer: &mut Sequencer<PlyOutcome>, ply: usize, outcome: PlyOutcome| {
        for (ply, outcome) in sequencer.push(ply, outcome) {
            let _ = event_tx.send(PoolEvent::Completed {
                ply,
                outcome: outcome.clone(),
            });
            outcomes.push(outcome);
        }
    };

    while let Some(event) = worker_rx.recv().await {
        match event {
            WorkerEvent::Progress { ply, evaluation } => {
                if ply == sequencer.next_index() {
                    let _ = event_tx.send(PoolEvent::Progress { ply, evaluation });
                }
            }
            WorkerEvent::Done { ply, outcome } => release(&mut sequencer, ply, outcome),
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            warn!(error = %err, "Pool worker panicked");
        }
    }

    // Every worker is gone; whatever was never claimed gets a verdict now.
    for ply in sequencer.next_index()..total {
        let outcome = if cancel.is_cancelled() {
            PlyOutcome::Abandoned
        } else {
            PlyOutcome::AnalysisFailed {
                reason: "no engine session available".to_string(),
            }
        };
        release(&mut sequencer, ply, outcome);
    }

    info!(
        positions = total,
        cancelled = cancel.is_cancelled(),
        "Analysis pool finished"
    );
    outcomes
}

struct Worker<F> {
    id: usize,
    factory: Arc<F>,
    evaluator: PositionEvaluator,
    positions: Arc<[GamePosition]>,
    next: Arc<AtomicUsize>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl<F: SessionFactory> Worker<F> {
    async fn run(self) {
        let mut session = self.start_session().await;

        while session.is_some() && !self.cancel.is_cancelled() {
            let ply = self.next.fetch_add(1, Ordering::SeqCst);
            let Some(position) = self.positions.get(ply) else {
                break;
            };
            let outcome = self.analyze(ply, position, &mut session).await;
            let _ = self.tx.send(WorkerEvent::Done { ply, outcome });
        }

        if let Some(session) = session {
            if let Err(err) = session.close().await {
                debug!(worker = self.id, error = %err, "Failed to close session");
            }
        }
        debug!(worker = self.id, "Worker finished");
    }

    /// Evaluates one ply, replacing a broken session and trying once more.
    async fn analyze(
        &self,
        ply: usize,
        position: &GamePosition,
        slot: &mut Option<EngineSession>,
    ) -> PlyOutcome {
        let mut attempt = 1;
        loop {
            let Some(session) = slot.as_mut() else {
                return PlyOutcome::AnalysisFailed {
                    reason: "no engine session available".to_string(),
                };
            };

            let tx = &self.tx;
            let result = self
                .evaluator
                .evaluate(session, position, &self.cancel, |snapshot| {
                    let _ = tx.send(WorkerEvent::Progress {
                        ply,
                        evaluation: snapshot.clone(),
                    });
                })
                .await;

            let err = match result {
                Ok(evaluation) => return PlyOutcome::Evaluated(evaluation),
                Err(err) => err,
            };
            warn!(worker = self.id, ply, attempt, error = %err, "Position analysis failed");

            if err.is_fatal() {
                if let Some(broken) = slot.take() {
                    let _ = broken.close().await;
                }
                if !self.cancel.is_cancelled() {
                    *slot = self.start_session().await;
                }
            }
            if attempt >= 2 || self.cancel.is_cancelled() {
                return PlyOutcome::AnalysisFailed {
                    reason: err.to_string(),
                };
            }
            attempt += 1;
        }
    }

    /// Starts a session, retrying once. Gives up early on cancellation.
    async fn start_session(&self) -> Option<EngineSession> {
        for attempt in 1..=2 {
            let started = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                started = self.factory.start() => started,
            };

            match started {
                Ok(mut session) => match session.new_game().await {
                    Ok(()) => return Some(session),
                    Err(err) => {
                        warn!(worker = self.id, attempt, error = %err, "Engine rejected new game")
                    }
                },
                Err(err) => warn!(worker = self.id, attempt, error = %err, "Engine failed to start"),
            }
        }
        warn!(worker = self.id, "Giving up on engine sessions");
        None
    }
}
