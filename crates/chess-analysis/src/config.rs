//! Analysis configuration and validation.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
}

/// Which delta drives move classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Centipawn loss.
    #[default]
    Cpl,
    /// Expected-score loss derived from win/draw/loss.
    Wdl,
}

/// The options a presentation layer sends before a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Worker count for game analysis, engine threads for single positions.
    pub threads: u32,
    /// Search budget per position in seconds.
    pub time_per_position: f64,
    pub multipv: u32,
    pub metric: Metric,
    /// Optional depth limit passed along with the time budget.
    pub depth: Option<u32>,
    /// Engine hash table size in MB.
    pub hash_mb: u32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            time_per_position: 1.0,
            multipv: 1,
            metric: Metric::Cpl,
            depth: None,
            hash_mb: 128,
        }
    }
}

impl AnalysisOptions {
    pub const THREADS: (u32, u32) = (1, 8);
    pub const TIME_PER_POSITION: (f64, f64) = (0.1, 60.0);
    pub const MULTIPV: (u32, u32) = (1, 8);

    /// Rejects out-of-range values before any session starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("threads", self.threads as f64, Self::THREADS.0 as f64, Self::THREADS.1 as f64)?;
        check_range(
            "time_per_position",
            self.time_per_position,
            Self::TIME_PER_POSITION.0,
            Self::TIME_PER_POSITION.1,
        )?;
        check_range("multipv", self.multipv as f64, Self::MULTIPV.0 as f64, Self::MULTIPV.1 as f64)?;
        if let Some(depth) = self.depth {
            check_range("depth", depth as f64, 1.0, 245.0)?;
        }
        check_range("hash_mb", self.hash_mb as f64, 1.0, 33_554_432.0)?;
        Ok(())
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs_f64(self.time_per_position)
    }

    /// Session settings for a single-position evaluator using all threads.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            threads: self.threads,
            hash_mb: self.hash_mb,
            show_wdl: self.metric == Metric::Wdl,
            ..SessionConfig::default()
        }
    }

    /// Session settings for a pool worker: one engine thread each.
    pub fn worker_session_config(&self) -> SessionConfig {
        SessionConfig {
            threads: 1,
            ..self.session_config()
        }
    }

    pub fn annotation_config(&self) -> AnnotationConfig {
        AnnotationConfig {
            metric: self.metric,
            ..AnnotationConfig::default()
        }
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_nan() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

/// Settings applied to one engine process.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub threads: u32,
    pub hash_mb: u32,
    /// Ask for `wdl` in info lines when the engine supports it.
    pub show_wdl: bool,
    /// Bound for `uci`..`uciok` plus the first `readyok`.
    pub handshake_timeout: Duration,
    /// How long a stopped engine gets to answer before it is killed.
    pub stop_grace: Duration,
    /// Slack on top of a search budget before the search counts as timed out.
    pub search_overhead: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            hash_mb: 128,
            show_wdl: false,
            handshake_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(2),
            search_overhead: Duration::from_millis(500),
        }
    }
}

/// Exponential performance-rating model: `base * e^(-decay * mean_loss)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingModel {
    pub base: f64,
    pub decay: f64,
}

impl RatingModel {
    pub fn estimate(&self, mean_loss: f64) -> f64 {
        self.base * (-self.decay * mean_loss).exp()
    }
}

impl Default for RatingModel {
    fn default() -> Self {
        Self {
            base: 3100.0,
            decay: 0.01,
        }
    }
}

/// Constants of the annotation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub metric: Metric,
    /// Centipawn scores are clamped to `±clamp_cp` before deltas are taken.
    pub clamp_cp: i32,
    /// Centipawn value of a mate on the board.
    pub mate_value: i32,
    /// `k` in the centipawn to expected-score logistic `1 / (1 + e^(-k*cp))`.
    pub cp_logistic_scale: f64,
    /// Rating model applied to mean centipawn loss.
    pub rating: RatingModel,
    /// Rating model applied to mean expected-score loss. No rating is
    /// reported in WDL mode unless one is configured.
    pub wdl_rating: Option<RatingModel>,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            metric: Metric::Cpl,
            clamp_cp: 1000,
            mate_value: 10_000,
            cp_logistic_scale: 0.003_682_08,
            rating: RatingModel::default(),
            wdl_rating: None,
        }
    }
}

/// Where and how the engine binary is provisioned.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionConfig {
    /// Directory the binary is installed into.
    pub install_dir: PathBuf,
    /// Lower-cased file-name prefix identifying the engine binary.
    pub binary_prefix: String,
    pub user_agent: String,
    /// Executable to use as is, skipping download.
    pub override_path: Option<PathBuf>,
    /// Archive to fetch instead of the platform default.
    pub override_url: Option<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            install_dir: PathBuf::from("engines"),
            binary_prefix: "stockfish".to_string(),
            user_agent: concat!("chess-lab/", env!("CARGO_PKG_VERSION")).to_string(),
            override_path: None,
            override_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AnalysisOptions::default().validate().is_ok());
    }

    #[test]
    fn test_bounds_inclusive() {
        let opts = AnalysisOptions {
            threads: 8,
            time_per_position: 0.1,
            multipv: 8,
            ..Default::default()
        };
        assert!(opts.validate().is_ok());

        let opts = AnalysisOptions {
            time_per_position: 60.0,
            threads: 1,
            multipv: 1,
            ..Default::default()
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let opts = AnalysisOptions {
            threads: 9,
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(ConfigError::OutOfRange { field: "threads", .. })
        ));

        let opts = AnalysisOptions {
            threads: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = AnalysisOptions {
            time_per_position: 0.05,
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(ConfigError::OutOfRange { field: "time_per_position", .. })
        ));

        let opts = AnalysisOptions {
            multipv: 0,
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(ConfigError::OutOfRange { field: "multipv", .. })
        ));

        let opts = AnalysisOptions {
            time_per_position: f64::NAN,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_worker_sessions_use_one_thread() {
        let opts = AnalysisOptions {
            threads: 6,
            metric: Metric::Wdl,
            ..Default::default()
        };
        assert_eq!(opts.session_config().threads, 6);
        assert_eq!(opts.worker_session_config().threads, 1);
        assert!(opts.worker_session_config().show_wdl);
    }

    #[test]
    fn test_rating_model() {
        let model = RatingModel::default();
        assert_eq!(model.estimate(0.0), 3100.0);
        assert!((model.estimate(100.0) - 1140.4).abs() < 0.5);
    }

    #[test]
    fn test_options_from_toml() {
        let opts: AnalysisOptions = toml::from_str(
            r#"
            threads = 4
            time_per_position = 2.5
            metric = "wdl"
            "#,
        )
        .unwrap();
        assert_eq!(opts.threads, 4);
        assert_eq!(opts.time_per_position, 2.5);
        assert_eq!(opts.metric, Metric::Wdl);
        assert_eq!(opts.multipv, 1);
    }
}
