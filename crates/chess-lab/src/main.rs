//! chess-lab - engine-driven chess analysis from the command line.
//!
//! Provisions Stockfish, evaluates single positions live (optionally judging
//! the move that led to them), picks moves at a chosen strength and annotates
//! whole games. Results go to stdout as JSON, progress to the log.

mod config;

use std::path::{Path, PathBuf};

use anyhow::Context;
use chess_analysis::{
    format_pv, AnalysisOptions, AnnotationConfig, EngineMove, EngineSession, GameAnalyzer, GamePosition,
    GameRecord, Metric, MoveComparison, Platform, PlyOutcome, PoolEvent, PositionEvaluation,
    PositionEvaluator, Provisioner, SearchLimits, MAX_SKILL_LEVEL, PV_DISPLAY_PLIES,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use config::LabConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chess-lab")]
#[command(about = "Engine-driven chess analysis")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value_os_t = LabConfig::config_path())]
    config: PathBuf,

    /// Engine executable to use instead of provisioning one
    #[arg(long, global = true, env = "STOCKFISH_PATH")]
    engine: Option<PathBuf>,

    /// Archive URL to provision the engine from
    #[arg(long, global = true, env = "STOCKFISH_URL")]
    engine_url: Option<String>,

    #[command(flatten)]
    overrides: OptionOverrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make sure an engine binary is installed and print its path
    Provision,
    /// Analyze one position, printing each improvement
    Eval {
        /// Position in FEN
        fen: String,
        /// Position before the last move, to judge that move
        #[arg(long)]
        before: Option<String>,
    },
    /// Let the engine pick a move at a given strength
    Play {
        /// Position in FEN
        fen: String,
        /// Engine skill level
        #[arg(long, default_value_t = MAX_SKILL_LEVEL,
              value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_SKILL_LEVEL)))]
        skill: u32,
    },
    /// Annotate a game and print the report as JSON
    Annotate {
        /// Game file with `white`, `black`, `positions` and `moves`
        game: PathBuf,
    },
}

/// Command-line values that take precedence over the config file.
#[derive(Args, Default)]
struct OptionOverrides {
    /// Pool workers for games, engine threads for single positions
    #[arg(long, global = true)]
    threads: Option<u32>,
    /// Seconds of search per position
    #[arg(long = "time", global = true)]
    time_per_position: Option<f64>,
    /// Number of ranked lines per position
    #[arg(long, global = true)]
    multipv: Option<u32>,
    /// Loss metric used to judge moves
    #[arg(long, global = true, value_enum)]
    metric: Option<MetricArg>,
    /// Depth limit on top of the time budget
    #[arg(long, global = true)]
    depth: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum MetricArg {
    Cpl,
    Wdl,
}

impl From<MetricArg> for Metric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::Cpl => Metric::Cpl,
            MetricArg::Wdl => Metric::Wdl,
        }
    }
}

impl OptionOverrides {
    fn apply(&self, mut options: AnalysisOptions) -> AnalysisOptions {
        if let Some(threads) = self.threads {
            options.threads = threads;
        }
        if let Some(time) = self.time_per_position {
            options.time_per_position = time;
        }
        if let Some(multipv) = self.multipv {
            options.multipv = multipv;
        }
        if let Some(metric) = self.metric {
            options.metric = metric.into();
        }
        if self.depth.is_some() {
            options.depth = self.depth;
        }
        options
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let mut config = LabConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if cli.engine.is_some() {
        config.engine.path = cli.engine.clone();
    }
    if cli.engine_url.is_some() {
        config.engine.url = cli.engine_url.clone();
    }
    let options = cli.overrides.apply(config.analysis.clone());
    options.validate().context("Invalid analysis options")?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping engines");
            token.cancel();
        }
    });

    match cli.command {
        Commands::Provision => {
            let engine = provision(&config).await?;
            println!("{}", engine.display());
        }
        Commands::Eval { fen, before: None } => {
            let engine = provision(&config).await?;
            let evaluation = evaluate(&engine, &fen, &options, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }
        Commands::Eval {
            fen,
            before: Some(before),
        } => {
            let engine = provision(&config).await?;
            let annotation = config.annotation_for(&options);
            let comparison = compare(&engine, &before, &fen, &options, &annotation, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&comparison)?);
        }
        Commands::Play { fen, skill } => {
            let engine = provision(&config).await?;
            let chosen = play(&engine, &fen, skill, &options, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&chosen)?);
        }
        Commands::Annotate { game } => {
            let engine = provision(&config).await?;
            let content = std::fs::read_to_string(&game)
                .with_context(|| format!("Failed to read {}", game.display()))?;
            let record: GameRecord = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", game.display()))?;

            let analyzer = GameAnalyzer::for_binary(&engine, &options)?
                .with_annotation(config.annotation_for(&options));
            let report = analyzer.analyze(&record, cancel, log_event).await?;
            if report.cancelled {
                warn!("Analysis cancelled, report is partial");
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

async fn provision(config: &LabConfig) -> anyhow::Result<PathBuf> {
    let provisioner = Provisioner::new(config.engine.provision_config())?;
    let engine = provisioner
        .ensure_binary(&Platform::current())
        .await
        .context("Failed to provision engine")?;
    Ok(engine)
}

async fn start_session(engine: &Path, options: &AnalysisOptions) -> anyhow::Result<EngineSession> {
    EngineSession::start(engine, &options.session_config())
        .await
        .with_context(|| format!("Failed to start {}", engine.display()))
}

async fn close_session(session: EngineSession) {
    if let Err(err) = session.close().await {
        debug!(error = %err, "Engine did not shut down cleanly");
    }
}

async fn evaluate(
    engine: &Path,
    fen: &str,
    options: &AnalysisOptions,
    cancel: &CancellationToken,
) -> anyhow::Result<PositionEvaluation> {
    let position = GamePosition::from_fen(fen)?;
    let mut session = start_session(engine, options).await?;

    let evaluator = PositionEvaluator::new(SearchLimits::from(options));
    let evaluation = evaluator
        .evaluate(&mut session, &position, cancel, |snapshot| {
            print_snapshot(&position, snapshot)
        })
        .await?;

    close_session(session).await;
    Ok(evaluation)
}

/// Judges the move from `before_fen` to `fen` while `fen` is analyzed.
async fn compare(
    engine: &Path,
    before_fen: &str,
    fen: &str,
    options: &AnalysisOptions,
    annotation: &AnnotationConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<MoveComparison> {
    let before = GamePosition::from_fen(before_fen)?;
    let position = GamePosition::from_fen(fen)?;
    let mut session = start_session(engine, options).await?;

    let evaluator = PositionEvaluator::new(SearchLimits::from(options));
    let mut first = true;
    let comparison = evaluator
        .compare(&mut session, &before, &position, annotation, cancel, |comparison| {
            if std::mem::take(&mut first) {
                print_snapshot(&before, &comparison.before);
                if let Some(mv) = comparison.suggested_move() {
                    println!("suggested {}", format_pv(&before, &[mv.to_string()], 1));
                }
            }
            if let Some(loss) = comparison.loss {
                let symbol = comparison.quality.map(|q| q.symbol()).unwrap_or_default();
                println!("loss {} {}", describe_loss(loss, annotation.metric), symbol);
            }
            print_snapshot(&position, &comparison.after);
        })
        .await?;

    close_session(session).await;
    Ok(comparison)
}

async fn play(
    engine: &Path,
    fen: &str,
    skill: u32,
    options: &AnalysisOptions,
    cancel: &CancellationToken,
) -> anyhow::Result<EngineMove> {
    let position = GamePosition::from_fen(fen)?;
    let mut session = start_session(engine, options).await?;

    let evaluator = PositionEvaluator::new(SearchLimits::from(options));
    let chosen = evaluator
        .choose_move(&mut session, &position, skill, cancel)
        .await?;
    info!(skill, line = %format_pv(&position, &chosen.pv, PV_DISPLAY_PLIES), "Engine move chosen");

    close_session(session).await;
    Ok(chosen)
}

fn describe_loss(loss: f64, metric: Metric) -> String {
    match metric {
        Metric::Cpl => format!("{:.0} cp", loss),
        Metric::Wdl => format!("{:.1}% expected score", loss * 100.0),
    }
}

/// One line per ranked variation in SAN, scores from White's side.
fn print_snapshot(position: &GamePosition, snapshot: &PositionEvaluation) {
    for line in &snapshot.lines {
        println!(
            "depth {:>3}  #{}  {:>10}  {}",
            line.depth,
            line.rank,
            line.score.for_white(snapshot.side_to_move).to_string(),
            format_pv(position, &line.pv, PV_DISPLAY_PLIES)
        );
    }
    if snapshot.is_final() {
        println!("status {:?}", snapshot.status);
    }
    println!();
}

fn log_event(event: &PoolEvent) {
    match event {
        PoolEvent::Progress { ply, evaluation } => {
            if let Some(line) = evaluation.best_line() {
                debug!(ply, depth = line.depth, score = %line.score, "Progress");
            }
        }
        PoolEvent::Completed { ply, outcome } => match outcome {
            PlyOutcome::Evaluated(evaluation) => info!(
                ply,
                score = %evaluation
                    .white_score()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                status = ?evaluation.status,
                "Position analyzed"
            ),
            PlyOutcome::AnalysisFailed { reason } => warn!(ply, reason = %reason, "Position failed"),
            PlyOutcome::Abandoned => debug!(ply, "Position abandoned"),
        },
    }
}
