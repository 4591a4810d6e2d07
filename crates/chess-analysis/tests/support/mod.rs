//! Scripted in-process UCI engine for tests.
//!
//! A [`FakeEngine`] serves one session over `tokio::io::duplex`, answering
//! the handshake and replying to `go` according to a per-FEN [`Response`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chess_analysis::{EngineSession, SessionConfig, SessionError, SessionFactory};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use uci::{EngineInfo, EngineMessage, GuiCommand, InfoBuilder, OptionDecl};

pub const GAME_FENS: [&str; 9] = [
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
    "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2",
    "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2",
    "r1bqkbnr/pppp1ppp/2n5/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R w KQkq - 2 3",
    "r1bqkbnr/pppp1ppp/2n5/1B2p3/4P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 3 3",
    "r1bqkbnr/1ppp1ppp/p1n5/1B2p3/4P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 0 4",
    "r1bqkbnr/1ppp1ppp/p1n5/4p3/B3P3/5N2/PPPP1PPP/RNBQK2R b KQkq - 1 4",
    "r1bqkb1r/1ppp1ppp/p1n2n2/4p3/B3P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 2 5",
];

pub const GAME_MOVES: [&str; 8] = [
    "e2e4", "e7e5", "g1f3", "b8c6", "f1b5", "a7a6", "b5a4", "g8f6",
];

/// 1.e4 e5 2.Qh5 Nc6 3.Bc4 Nf6?? 4.Qxf7#
pub const SCHOLARS_FENS: [&str; 8] = [
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
    "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2",
    "rnbqkbnr/pppp1ppp/8/4p2Q/4P3/8/PPPP1PPP/RNB1KBNR b KQkq - 1 2",
    "r1bqkbnr/pppp1ppp/2n5/4p2Q/4P3/8/PPPP1PPP/RNB1KBNR w KQkq - 2 3",
    "r1bqkbnr/pppp1ppp/2n5/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 3 3",
    "r1bqkb1r/pppp1ppp/2n2n2/4p2Q/2B1P3/8/PPPP1PPP/RNB1K1NR w KQkq - 4 4",
    "r1bqkb1r/pppp1Qpp/2n2n2/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 0 4",
];

pub const SCHOLARS_MOVES: [&str; 7] = ["e2e4", "e7e5", "d1h5", "b8c6", "f1c4", "g8f6", "h5f7"];

/// Session settings with short timeouts so failing tests fail fast.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        handshake_timeout: Duration::from_secs(2),
        stop_grace: Duration::from_millis(500),
        search_overhead: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

/// An info line with a principal variation.
pub fn pv_line(depth: u32, rank: u32, cp: i32, pv: &[&str]) -> EngineInfo {
    InfoBuilder::new()
        .depth(depth)
        .multipv(rank)
        .score_cp(cp)
        .nodes(1000 * depth as u64)
        .pv(pv.iter().map(|m| m.to_string()).collect())
        .build()
}

/// A rank-1 info line that also carries `wdl`, all from the side to move.
pub fn wdl_line(depth: u32, cp: i32, wdl: (u32, u32, u32), pv: &[&str]) -> EngineInfo {
    InfoBuilder::new()
        .depth(depth)
        .multipv(1)
        .score_cp(cp)
        .wdl(wdl.0, wdl.1, wdl.2)
        .pv(pv.iter().map(|m| m.to_string()).collect())
        .build()
}

/// How the engine ends a search.
#[derive(Debug, Clone)]
pub enum Finish {
    /// Sends `bestmove` on its own.
    BestMove(Option<String>),
    /// Keeps searching until `stop`, then sends `bestmove`.
    AwaitStop(Option<String>),
    /// Never answers, not even to `stop`.
    IgnoreStop,
    /// Exits as if killed.
    Exit,
    /// Prints a line outside the protocol.
    Garbage,
}

#[derive(Debug, Clone)]
pub struct Response {
    /// Pause before the first line.
    pub delay: Duration,
    pub lines: Vec<EngineInfo>,
    pub finish: Finish,
}

impl Response {
    pub fn best(lines: Vec<EngineInfo>, mv: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            lines,
            finish: Finish::BestMove(Some(mv.to_string())),
        }
    }

    /// A finished search whose rank-1 line scores `cp` for the side to move.
    pub fn scored(cp: i32, mv: &str) -> Self {
        Self::best(vec![pv_line(6, 1, cp - 10, &[mv]), pv_line(12, 1, cp, &[mv])], mv)
    }

    pub fn await_stop(lines: Vec<EngineInfo>, mv: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            lines,
            finish: Finish::AwaitStop(Some(mv.to_string())),
        }
    }

    pub fn with_finish(finish: Finish) -> Self {
        Self {
            delay: Duration::ZERO,
            lines: vec![pv_line(4, 1, 15, &["e2e4"])],
            finish,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Process-level bookkeeping shared by every fake engine of a test.
#[derive(Debug, Default)]
pub struct Counters {
    pub alive: AtomicUsize,
    pub started: AtomicUsize,
    pub searches: AtomicUsize,
}

impl Counters {
    pub fn alive(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Waits until `check` holds, panicking after `limit`.
    pub async fn wait_for(&self, limit: Duration, check: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + limit;
        while !check(self) {
            if tokio::time::Instant::now() > deadline {
                panic!("condition not reached within {:?}: {:?}", limit, self);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

struct AliveGuard(Arc<Counters>);

impl AliveGuard {
    fn new(counters: Arc<Counters>) -> Self {
        counters.alive.fetch_add(1, Ordering::SeqCst);
        counters.started.fetch_add(1, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.alive.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One scripted engine.
#[derive(Debug, Clone)]
pub struct FakeEngine {
    pub name: String,
    pub banner: Option<String>,
    pub options: Vec<OptionDecl>,
    pub handshake_delay: Duration,
    /// Exit instead of answering `uci`.
    pub die_on_uci: bool,
    pub responses: HashMap<String, Response>,
    pub default_response: Response,
    pub counters: Arc<Counters>,
    /// Every command received, in order.
    pub received: Arc<Mutex<Vec<String>>>,
}

impl FakeEngine {
    pub fn new(counters: Arc<Counters>) -> Self {
        Self {
            name: "Fakefish 1.0".to_string(),
            banner: None,
            options: ["Threads", "Hash", "MultiPV", "UCI_ShowWDL", "Skill Level"]
                .iter()
                .map(|name| spin(name))
                .collect(),
            handshake_delay: Duration::ZERO,
            die_on_uci: false,
            responses: HashMap::new(),
            default_response: Response::scored(20, "e2e4"),
            counters,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn respond(mut self, fen: &str, response: Response) -> Self {
        self.responses.insert(fen.to_string(), response);
        self
    }

    pub fn by_default(mut self, response: Response) -> Self {
        self.default_response = response;
        self
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Starts serving and runs the client handshake against it.
    pub async fn connect(self, config: &SessionConfig) -> Result<EngineSession, SessionError> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(self.serve(server));
        let (read, write) = tokio::io::split(client);
        EngineSession::from_io(read, write, config).await
    }

    async fn serve(self, stream: DuplexStream) {
        let _alive = AliveGuard::new(Arc::clone(&self.counters));
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        let mut fen = String::new();

        while let Ok(Some(line)) = lines.next_line().await {
            self.received.lock().unwrap().push(line.clone());
            let Ok(command) = GuiCommand::parse(&line) else {
                continue;
            };
            match command {
                GuiCommand::Uci => {
                    if self.die_on_uci {
                        return;
                    }
                    if pause(&mut lines, self.handshake_delay).await != Pause::Elapsed {
                        return;
                    }
                    if let Some(banner) = &self.banner {
                        emit_raw(&mut write, banner).await;
                    }
                    let mut out = vec![EngineMessage::Id {
                        name: Some(self.name.clone()),
                        author: None,
                    }];
                    out.extend(self.options.iter().cloned().map(EngineMessage::Option));
                    out.push(EngineMessage::UciOk);
                    for message in out {
                        emit(&mut write, &message).await;
                    }
                }
                GuiCommand::IsReady => emit(&mut write, &EngineMessage::ReadyOk).await,
                GuiCommand::Position { fen: Some(f), .. } => fen = f,
                GuiCommand::Go(_) => {
                    self.counters.searches.fetch_add(1, Ordering::SeqCst);
                    let response = self.responses.get(&fen).unwrap_or(&self.default_response).clone();
                    if !self.search(&mut lines, &mut write, response).await {
                        return;
                    }
                }
                GuiCommand::Quit => return,
                _ => {}
            }
        }
    }

    /// Plays one search. Returns false when the engine should exit.
    async fn search(
        &self,
        lines: &mut Lines<BufReader<ReadHalf<DuplexStream>>>,
        write: &mut WriteHalf<DuplexStream>,
        response: Response,
    ) -> bool {
        match pause(lines, response.delay).await {
            Pause::Elapsed => {}
            Pause::Stopped => {
                emit(write, &bestmove(None)).await;
                return true;
            }
            Pause::Gone => return false,
        }
        for info in &response.lines {
            emit(write, &EngineMessage::Info(info.clone())).await;
        }

        match response.finish {
            Finish::BestMove(mv) => {
                emit(write, &bestmove(mv)).await;
                true
            }
            Finish::AwaitStop(mv) => match pause(lines, Duration::from_secs(3600)).await {
                Pause::Stopped => {
                    emit(write, &bestmove(mv)).await;
                    true
                }
                _ => false,
            },
            Finish::IgnoreStop => {
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim() == "quit" {
                        return false;
                    }
                }
                false
            }
            Finish::Exit => false,
            Finish::Garbage => {
                emit_raw(write, "segmentation fault (core dumped)").await;
                true
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Pause {
    Elapsed,
    Stopped,
    Gone,
}

/// Sleeps while still noticing `stop`, `quit` and a closed pipe.
async fn pause(lines: &mut Lines<BufReader<ReadHalf<DuplexStream>>>, duration: Duration) -> Pause {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return Pause::Elapsed,
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim() == "stop" => return Pause::Stopped,
                Ok(Some(line)) if line.trim() == "quit" => return Pause::Gone,
                Ok(Some(_)) => {}
                _ => return Pause::Gone,
            },
        }
    }
}

fn bestmove(mv: Option<String>) -> EngineMessage {
    EngineMessage::BestMove { mv, ponder: None }
}

fn spin(name: &str) -> OptionDecl {
    OptionDecl {
        name: name.to_string(),
        kind: "spin".to_string(),
        default: Some("1".to_string()),
        min: Some(1),
        max: Some(1024),
        vars: Vec::new(),
    }
}

async fn emit(write: &mut WriteHalf<DuplexStream>, message: &EngineMessage) {
    emit_raw(write, &message.to_uci()).await;
}

async fn emit_raw(write: &mut WriteHalf<DuplexStream>, line: &str) {
    let _ = write.write_all(format!("{}\n", line).as_bytes()).await;
}

/// Hands out fake engines in start order; the last one repeats.
pub struct FakeFactory {
    engines: Vec<FakeEngine>,
    config: SessionConfig,
    starts: AtomicUsize,
}

impl FakeFactory {
    pub fn new(engines: Vec<FakeEngine>) -> Self {
        Self {
            engines,
            config: test_config(),
            starts: AtomicUsize::new(0),
        }
    }

    pub fn uniform(engine: FakeEngine) -> Self {
        Self::new(vec![engine])
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl SessionFactory for FakeFactory {
    fn start(&self) -> impl std::future::Future<Output = Result<EngineSession, SessionError>> + Send {
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        let engine = self
            .engines
            .get(n)
            .or_else(|| self.engines.last())
            .cloned()
            .expect("FakeFactory needs at least one engine");
        let config = self.config.clone();
        async move { engine.connect(&config).await }
    }
}
