//! Configuration file loading for chess-lab.
//!
//! Settings come from `chess-lab.toml` when it exists; every section is
//! optional and falls back to the library defaults.

use std::path::{Path, PathBuf};

use chess_analysis::{AnalysisOptions, AnnotationConfig, ProvisionConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading or parsing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse the configuration file as valid TOML.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Where the engine comes from.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory downloaded engines are installed into.
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
    /// Use this executable instead of provisioning one.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Download the engine archive from here instead of the release table.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("engines")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            path: None,
            url: None,
        }
    }
}

impl EngineConfig {
    /// Provisioner settings for this engine section.
    pub fn provision_config(&self) -> ProvisionConfig {
        ProvisionConfig {
            install_dir: self.install_dir.clone(),
            override_path: self.path.clone(),
            override_url: self.url.clone(),
            ..ProvisionConfig::default()
        }
    }
}

/// Main chess-lab configuration structure.
#[derive(Debug, Deserialize, Serialize, Default, PartialEq)]
pub struct LabConfig {
    #[serde(default)]
    pub analysis: AnalysisOptions,
    /// Annotation constants. The metric is always taken from `analysis`.
    #[serde(default)]
    pub annotation: AnnotationConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl LabConfig {
    /// Loads the configuration at `path`, or the defaults if there is no
    /// such file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadError`] if the file exists but cannot be read,
    /// or [`ConfigError::ParseError`] if the file contains invalid TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Returns the default path to the configuration file.
    pub fn config_path() -> PathBuf {
        PathBuf::from("chess-lab.toml")
    }

    /// Annotation settings matching the analysis metric.
    pub fn annotation_for(&self, options: &AnalysisOptions) -> AnnotationConfig {
        AnnotationConfig {
            metric: options.metric,
            ..self.annotation.clone()
        }
    }
}
