//! One running engine process and the UCI conversation with it.
//!
//! An [`EngineSession`] walks through `NotStarted -> Ready -> Searching ->
//! Ready -> Closed`. Searches are exposed as a [`Search`] stream that borrows
//! the session, so a second search cannot start while one is running. Any
//! protocol violation closes the session for good and kills the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};
use uci::{EngineMessage, GoOptions, GuiCommand, OptionDecl};

use crate::config::{AnalysisOptions, SessionConfig};
use crate::evaluation::EvaluationLine;
use crate::position::GamePosition;

type EngineReader = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;
type EngineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Strongest `Skill Level` Stockfish accepts.
pub const MAX_SKILL_LEVEL: u32 = 20;

/// Errors raised by an engine session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to launch engine '{path}': {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine did not answer {waiting_for} within {after:?}")]
    Unresponsive {
        waiting_for: &'static str,
        after: Duration,
    },

    #[error("Engine process exited")]
    EngineExited,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session is busy with a search")]
    Busy,

    #[error("Session is closed")]
    Closed,

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Evaluation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SessionError {
    /// True for failures that leave the session unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Busy)
    }
}

/// Lifecycle of an engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Ready,
    Searching,
    Closed,
}

/// Budget for a single search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchLimits {
    /// Passed to the engine as `movetime`.
    pub time: Duration,
    pub multipv: u32,
    pub depth: Option<u32>,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            time: Duration::from_secs(1),
            multipv: 1,
            depth: None,
        }
    }
}

impl From<&AnalysisOptions> for SearchLimits {
    fn from(opts: &AnalysisOptions) -> Self {
        Self {
            time: opts.time_budget(),
            multipv: opts.multipv,
            depth: opts.depth,
        }
    }
}

/// A running engine process speaking UCI.
pub struct EngineSession {
    child: Option<Child>,
    reader: EngineReader,
    writer: EngineWriter,
    state: SessionState,
    config: SessionConfig,
    name: Option<String>,
    options: Vec<OptionDecl>,
    /// Option values already sent, keyed by the engine's spelling.
    applied: HashMap<String, String>,
}

impl EngineSession {
    /// Launches the engine at `path` and completes the handshake.
    pub async fn start(path: impl AsRef<Path>, config: &SessionConfig) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let spawn_error = |source| SessionError::Spawn {
            path: path.to_path_buf(),
            source,
        };

        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let missing = |pipe: &str| {
            spawn_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("engine {} not captured", pipe),
            ))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        info!(path = %path.display(), pid = ?child.id(), "Starting engine");
        let mut session = Self::new(Box::new(stdout), Box::new(stdin), config);
        session.child = Some(child);
        session.handshake().await?;
        Ok(session)
    }

    /// Runs the handshake over arbitrary streams instead of a child process.
    pub async fn from_io<R, W>(reader: R, writer: W, config: &SessionConfig) -> Result<Self, SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut session = Self::new(Box::new(reader), Box::new(writer), config);
        session.handshake().await?;
        Ok(session)
    }

    fn new(reader: Box<dyn AsyncRead + Send + Unpin>, writer: EngineWriter, config: &SessionConfig) -> Self {
        Self {
            child: None,
            reader: BufReader::new(reader).lines(),
            writer,
            state: SessionState::NotStarted,
            config: config.clone(),
            name: None,
            options: Vec::new(),
            applied: HashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The `id name` the engine reported.
    pub fn engine_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Options advertised during the handshake.
    pub fn options(&self) -> &[OptionDecl] {
        &self.options
    }

    pub fn supports_option(&self, name: &str) -> bool {
        self.find_option(name).is_some()
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        let limit = self.config.handshake_timeout;
        match timeout(limit, self.initialize()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(self.close_with(err)),
            Err(_) => Err(self.close_with(SessionError::Unresponsive {
                waiting_for: "the uci handshake",
                after: limit,
            })),
        }
    }

    async fn initialize(&mut self) -> Result<(), SessionError> {
        self.send(&GuiCommand::Uci).await?;
        loop {
            let line = self.read_line().await?;
            match EngineMessage::parse(&line) {
                Ok(EngineMessage::Id { name: Some(name), .. }) => self.name = Some(name),
                Ok(EngineMessage::Option(decl)) => self.options.push(decl),
                Ok(EngineMessage::UciOk) => break,
                // Banners and copyright lines before `uciok`.
                _ => {}
            }
        }

        self.state = SessionState::Ready;
        let threads = self.config.threads.to_string();
        let hash = self.config.hash_mb.to_string();
        self.set_option("Threads", threads).await?;
        self.set_option("Hash", hash).await?;
        if self.config.show_wdl {
            self.set_option("UCI_ShowWDL", "true".to_string()).await?;
        }
        self.await_ready().await?;

        info!(
            engine = self.name.as_deref().unwrap_or("unknown"),
            options = self.options.len(),
            threads = self.config.threads,
            "Engine session ready"
        );
        Ok(())
    }

    /// Sets thread count and MultiPV between searches.
    ///
    /// Values already in effect are not sent again, and options the engine
    /// did not advertise are skipped.
    pub async fn configure(&mut self, threads: u32, multipv: u32) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let mut changed = self.set_option("Threads", threads.to_string()).await?;
        changed |= self.set_option("MultiPV", multipv.to_string()).await?;
        if changed {
            self.sync().await?;
        }
        Ok(())
    }

    /// Tells the engine the next search belongs to a new game.
    pub async fn new_game(&mut self) -> Result<(), SessionError> {
        self.ensure_ready()?;
        self.send(&GuiCommand::UciNewGame).await?;
        self.sync().await
    }

    /// Weakens the engine for play. Levels are clamped to `0..=20`; engines
    /// without a `Skill Level` option are left as they are.
    pub async fn set_skill_level(&mut self, level: u32) -> Result<(), SessionError> {
        self.ensure_ready()?;
        let level = level.min(MAX_SKILL_LEVEL);
        if self.set_option("Skill Level", level.to_string()).await? {
            self.sync().await?;
        }
        Ok(())
    }

    /// Starts searching `position` and returns the stream of its results.
    pub async fn analyze(
        &mut self,
        position: &GamePosition,
        limits: &SearchLimits,
    ) -> Result<Search<'_>, SessionError> {
        self.ensure_ready()?;
        if self.set_option("MultiPV", limits.multipv.to_string()).await? {
            self.sync().await?;
        }

        let budget_ms = limits.time.as_millis().max(1) as u64;
        self.send(&GuiCommand::Position {
            fen: Some(position.fen().to_string()),
            moves: Vec::new(),
        })
        .await?;
        self.send(&GuiCommand::Go(GoOptions {
            movetime: Some(budget_ms),
            depth: limits.depth,
            ..GoOptions::default()
        }))
        .await?;
        self.state = SessionState::Searching;

        Ok(Search {
            deadline: Instant::now() + limits.time + self.config.search_overhead,
            multipv: limits.multipv,
            fen: position.fen().to_string(),
            last_best: None,
            session: self,
        })
    }

    /// Stops a running search, asks the engine to quit and reaps the process.
    ///
    /// A process that has not exited after the stop grace period is killed.
    pub async fn close(mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Searching {
            if let Err(err) = self.stop_and_drain().await {
                debug!(error = %err, "Engine did not stop cleanly");
            }
        }
        if self.state != SessionState::Closed {
            if let Err(err) = self.send(&GuiCommand::Quit).await {
                debug!(error = %err, "Failed to send quit");
            }
        }
        self.state = SessionState::Closed;

        if let Some(mut child) = self.child.take() {
            match timeout(self.config.stop_grace, child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "Engine exited"),
                Ok(Err(err)) => warn!(error = %err, "Failed to wait for engine"),
                Err(_) => {
                    warn!(grace = ?self.config.stop_grace, "Engine ignored quit, killing it");
                    child.kill().await?;
                }
            }
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Searching => Err(SessionError::Busy),
            SessionState::NotStarted | SessionState::Closed => Err(SessionError::Closed),
        }
    }

    fn find_option(&self, name: &str) -> Option<&OptionDecl> {
        self.options.iter().find(|o| o.name.eq_ignore_ascii_case(name))
    }

    /// Returns whether a `setoption` was actually sent.
    async fn set_option(&mut self, name: &str, value: String) -> Result<bool, SessionError> {
        let Some(decl) = self.find_option(name) else {
            debug!(option = name, "Engine does not support option, skipping");
            return Ok(false);
        };
        let name = decl.name.clone();
        if self.applied.get(&name) == Some(&value) {
            return Ok(false);
        }
        self.send(&GuiCommand::SetOption {
            name: name.clone(),
            value: Some(value.clone()),
        })
        .await?;
        self.applied.insert(name, value);
        Ok(true)
    }

    /// `isready` round trip bounded by the handshake timeout.
    async fn sync(&mut self) -> Result<(), SessionError> {
        let limit = self.config.handshake_timeout;
        match timeout(limit, self.await_ready()).await {
            Ok(result) => result,
            Err(_) => Err(self.close_with(SessionError::Unresponsive {
                waiting_for: "isready",
                after: limit,
            })),
        }
    }

    async fn await_ready(&mut self) -> Result<(), SessionError> {
        self.send(&GuiCommand::IsReady).await?;
        loop {
            let line = self.read_line().await?;
            if let Ok(EngineMessage::ReadyOk) = EngineMessage::parse(&line) {
                return Ok(());
            }
        }
    }

    /// Sends `stop` and waits for the `bestmove` that ends the search,
    /// discarding any info lines on the way.
    async fn stop_and_drain(&mut self) -> Result<Option<String>, SessionError> {
        self.send(&GuiCommand::Stop).await?;
        let grace = self.config.stop_grace;
        let drained = timeout(grace, async {
            loop {
                let line = self.read_line().await?;
                if let Ok(EngineMessage::BestMove { mv, .. }) = EngineMessage::parse(&line) {
                    return Ok::<_, SessionError>(mv);
                }
            }
        })
        .await;

        match drained {
            Ok(Ok(mv)) => {
                self.state = SessionState::Ready;
                Ok(mv)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(self.close_with(SessionError::Unresponsive {
                waiting_for: "stop",
                after: grace,
            })),
        }
    }

    async fn send(&mut self, command: &GuiCommand) -> Result<(), SessionError> {
        let line = command.to_uci();
        debug!(cmd = %line, "engine <");
        let written = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await
        }
        .await;
        written.map_err(|err| self.close_with(err.into()))
    }

    async fn read_line(&mut self) -> Result<String, SessionError> {
        let next = self.reader.next_line().await;
        self.take_line(next)
    }

    fn take_line(&mut self, next: std::io::Result<Option<String>>) -> Result<String, SessionError> {
        match next {
            Ok(Some(line)) => {
                debug!(line = %line, "engine >");
                Ok(line)
            }
            Ok(None) => Err(self.close_with(SessionError::EngineExited)),
            Err(err) => Err(self.close_with(err.into())),
        }
    }

    /// Marks the session unusable and kills the process.
    fn close_with(&mut self, err: SessionError) -> SessionError {
        if self.state != SessionState::Closed {
            warn!(error = %err, "Closing engine session");
        }
        self.state = SessionState::Closed;
        if let Some(child) = self.child.as_mut() {
            if let Err(kill_err) = child.start_kill() {
                debug!(error = %kill_err, "Engine already gone");
            }
        }
        err
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// An event of a running search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    /// A principal variation update.
    Line(EvaluationLine),
    /// The search is over.
    BestMove {
        mv: Option<String>,
        ponder: Option<String>,
        /// The budget ran out and `mv` was taken from the last rank-1 line.
        timed_out: bool,
    },
}

/// A search in flight on an [`EngineSession`].
pub struct Search<'a> {
    session: &'a mut EngineSession,
    deadline: Instant,
    multipv: u32,
    fen: String,
    /// First move of the most recent rank-1 line.
    last_best: Option<String>,
}

impl Search<'_> {
    /// Waits for the next line or the final best move.
    ///
    /// Returns `Ok(None)` once the search has ended. Cancel-safe: dropping
    /// the future between lines loses nothing.
    pub async fn next_event(&mut self) -> Result<Option<SearchEvent>, SessionError> {
        if self.session.state != SessionState::Searching {
            return Ok(None);
        }

        loop {
            let next = match timeout_at(self.deadline, self.session.reader.next_line()).await {
                Ok(next) => next,
                Err(_) => return Ok(Some(self.expire().await)),
            };
            let line = self.session.take_line(next)?;

            match EngineMessage::parse(&line) {
                Ok(EngineMessage::Info(info)) => {
                    let Some(pv_line) = EvaluationLine::from_info(&info) else {
                        continue;
                    };
                    if pv_line.rank > self.multipv {
                        continue;
                    }
                    if pv_line.rank == 1 {
                        if let Some(mv) = pv_line.first_move() {
                            self.last_best = Some(mv.to_string());
                        }
                    }
                    return Ok(Some(SearchEvent::Line(pv_line)));
                }
                Ok(EngineMessage::BestMove { mv, ponder }) => {
                    self.session.state = SessionState::Ready;
                    return Ok(Some(SearchEvent::BestMove {
                        mv,
                        ponder,
                        timed_out: false,
                    }));
                }
                Ok(other) => {
                    return Err(self.session.close_with(SessionError::Protocol(format!(
                        "unexpected '{}' while searching",
                        other.to_uci()
                    ))));
                }
                Err(err) => {
                    return Err(self
                        .session
                        .close_with(SessionError::Protocol(err.to_string())));
                }
            }
        }
    }

    /// Stops the search early, returning the engine's final move.
    pub async fn interrupt(&mut self) -> Result<Option<String>, SessionError> {
        if self.session.state != SessionState::Searching {
            return Ok(None);
        }
        debug!(fen = %self.fen, "Interrupting search");
        self.session.stop_and_drain().await
    }

    /// Budget exhausted: stop the engine and settle on the last rank-1 move.
    async fn expire(&mut self) -> SearchEvent {
        warn!(fen = %self.fen, "Search exceeded its budget, stopping engine");
        let engine_move = match self.session.stop_and_drain().await {
            Ok(mv) => mv,
            Err(err) => {
                debug!(error = %err, "No bestmove after stop");
                None
            }
        };
        SearchEvent::BestMove {
            mv: self.last_best.clone().or(engine_move),
            ponder: None,
            timed_out: true,
        }
    }
}
