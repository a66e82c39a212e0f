//! CLI configuration.
//!
//! Reads JSON from `--config` or `~/.config/parcel/config.json`. Every field
//! is optional; a missing default file means built-in defaults.

use std::path::{Path, PathBuf};

use parcel_protocol::UploadParams;
use parcel_transfer::DEFAULT_CHUNK_SIZE;
use serde::Deserialize;

/// On-disk config format.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    chunk_size: Option<usize>,
    #[serde(default)]
    max_resumes: Option<u32>,
    #[serde(default)]
    max_restarts: Option<u32>,
    #[serde(default)]
    params: UploadParams,
}

/// Settings for one CLI run.
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    /// Bytes copied per chunk.
    pub chunk_size: usize,
    /// Resumable errors tolerated per item before the batch is aborted.
    pub max_resumes: u32,
    /// Start errors tolerated per item before the batch is aborted.
    pub max_restarts: u32,
    /// Parameters passed along with every new object.
    pub params: UploadParams,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_resumes: 3,
            max_restarts: 1,
            params: UploadParams::new(),
        }
    }
}

impl CliConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist and parse. The default file is optional
    /// and falls back to defaults with a warning when it cannot be parsed.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                let file = serde_json::from_str::<ConfigFile>(&content)?;
                Ok(Self::from_file(file))
            }
            None => {
                let path = config_file_path();
                if !path.exists() {
                    return Ok(Self::default());
                }
                let content = std::fs::read_to_string(&path)?;
                match serde_json::from_str::<ConfigFile>(&content) {
                    Ok(file) => Ok(Self::from_file(file)),
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to parse config, using defaults"
                        );
                        Ok(Self::default())
                    }
                }
            }
        }
    }

    fn from_file(file: ConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: file
                .chunk_size
                .filter(|&size| size > 0)
                .unwrap_or(defaults.chunk_size),
            max_resumes: file.max_resumes.unwrap_or(defaults.max_resumes),
            max_restarts: file.max_restarts.unwrap_or(defaults.max_restarts),
            params: file.params,
        }
    }
}

fn config_file_path() -> PathBuf {
    config_base_dir().join("parcel").join("config.json")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}
