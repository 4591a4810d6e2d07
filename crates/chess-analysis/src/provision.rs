//! Locating or downloading the engine binary.
//!
//! Resolution order: an explicit executable path, a path resolved earlier by
//! the same [`Provisioner`], a binary already present in the install
//! directory, and finally a download from the override URL or the platform
//! default.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ProvisionConfig;

const RELEASE_BASE: &str = "https://github.com/official-stockfish/Stockfish/releases/latest/download";

/// Platform default archives, keyed by OS and architecture.
const DEFAULT_ARCHIVES: &[(&str, &str, &str)] = &[
    ("linux", "x86_64", "stockfish-ubuntu-x86-64-avx2.tar"),
    ("linux", "aarch64", "stockfish-android-armv8.tar"),
    ("macos", "x86_64", "stockfish-macos-x86-64-avx2.tar"),
    ("macos", "aarch64", "stockfish-macos-m1-apple-silicon.tar"),
    ("windows", "x86_64", "stockfish-windows-x86-64-avx2.zip"),
];

const ARCHIVE_SUFFIXES: &[&str] = &[".zip", ".tar", ".gz", ".bz2", ".xz", ".7z"];

/// Errors raised while making the engine binary available.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("No engine download for {os}/{arch}; set an engine path or download URL")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("Failed to download engine from {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Downloaded file is not a valid archive: {0}")]
    CorruptArchive(String),

    #[error("Archive did not contain an engine binary")]
    MissingExecutable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operating system and CPU architecture, as named by `std::env::consts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Release archive for this platform, if one is published.
    pub fn default_url(&self) -> Option<String> {
        DEFAULT_ARCHIVES
            .iter()
            .find(|(os, arch, _)| *os == self.os && *arch == self.arch)
            .map(|(_, _, file)| format!("{}/{}", RELEASE_BASE, file))
    }
}

/// Resolves the engine binary once and remembers it.
pub struct Provisioner {
    config: ProvisionConfig,
    client: reqwest::Client,
    resolved: OnceCell<PathBuf>,
}

impl Provisioner {
    pub fn new(config: ProvisionConfig) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|source| ProvisionError::Network {
                url: String::new(),
                source,
            })?;
        Ok(Self {
            config,
            client,
            resolved: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Returns an executable engine path for `platform`, downloading it if
    /// needed. Calls after the first success return the same path.
    pub async fn ensure_binary(&self, platform: &Platform) -> Result<PathBuf, ProvisionError> {
        if let Some(path) = &self.config.override_path {
            if is_executable(path) {
                debug!(path = %path.display(), "Using engine override path");
                return Ok(path.clone());
            }
            warn!(path = %path.display(), "Engine override path is not an executable file, ignoring");
        }

        let path = self
            .resolved
            .get_or_try_init(|| self.locate_or_download(platform))
            .await?;
        Ok(path.clone())
    }

    async fn locate_or_download(&self, platform: &Platform) -> Result<PathBuf, ProvisionError> {
        let install_dir = &self.config.install_dir;
        tokio::fs::create_dir_all(install_dir).await?;

        if let Some(existing) = find_binary(install_dir, &self.config.binary_prefix) {
            info!(path = %existing.display(), "Found installed engine");
            return Ok(existing);
        }

        let url = match &self.config.override_url {
            Some(url) => url.clone(),
            None => platform
                .default_url()
                .ok_or_else(|| ProvisionError::UnsupportedPlatform {
                    os: platform.os.clone(),
                    arch: platform.arch.clone(),
                })?,
        };

        info!(%url, "Downloading engine");
        let body = self.download(&url).await?;
        debug!(bytes = body.len(), "Download complete");

        let install_dir = install_dir.clone();
        let prefix = self.config.binary_prefix.clone();
        let installed =
            tokio::task::spawn_blocking(move || install_from_archive(&body, &install_dir, &prefix))
                .await
                .map_err(std::io::Error::other)??;

        info!(path = %installed.display(), "Engine installed");
        Ok(installed)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ProvisionError> {
        let network = |source| ProvisionError::Network {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(network)?;
        let bytes = response.bytes().await.map_err(network)?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Tar,
}

fn detect_archive(body: &[u8]) -> Option<ArchiveKind> {
    if body.starts_with(b"PK\x03\x04") || body.starts_with(b"PK\x05\x06") {
        return Some(ArchiveKind::Zip);
    }
    if body.get(257..262) == Some(b"ustar".as_slice()) {
        return Some(ArchiveKind::Tar);
    }
    None
}

/// Unpacks `body` under `install_dir/download` and moves the engine binary
/// into `install_dir`.
pub(crate) fn install_from_archive(
    body: &[u8],
    install_dir: &Path,
    prefix: &str,
) -> Result<PathBuf, ProvisionError> {
    let kind = detect_archive(body).ok_or_else(|| {
        let first_line = String::from_utf8_lossy(body)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|line| line.chars().take(120).collect::<String>());
        ProvisionError::CorruptArchive(match first_line {
            Some(line) => format!("the host probably returned a web page; first line: {}", line),
            None => "empty or binary response".to_string(),
        })
    })?;

    let extract_dir = install_dir.join("download");
    std::fs::create_dir_all(&extract_dir)?;
    match kind {
        ArchiveKind::Tar => tar::Archive::new(Cursor::new(body))
            .unpack(&extract_dir)
            .map_err(|e| ProvisionError::CorruptArchive(format!("tar extraction failed: {}", e)))?,
        ArchiveKind::Zip => zip::ZipArchive::new(Cursor::new(body))
            .and_then(|mut archive| archive.extract(&extract_dir))
            .map_err(|e| ProvisionError::CorruptArchive(format!("zip extraction failed: {}", e)))?,
    }

    let binary = find_binary(&extract_dir, prefix).ok_or(ProvisionError::MissingExecutable)?;
    let file_name = binary.file_name().ok_or(ProvisionError::MissingExecutable)?;
    let target = install_dir.join(file_name);
    std::fs::rename(&binary, &target)?;
    make_executable(&target)?;
    Ok(target)
}

/// First file, in path order, that looks like the engine binary.
fn find_binary(dir: &Path, prefix: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            name.starts_with(prefix)
                && !name.ends_with(".txt")
                && !ARCHIVE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        })
        .map(walkdir::DirEntry::into_path)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    std::fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
