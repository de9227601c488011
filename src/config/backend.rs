//! Backend configuration
//!
//! Loads the backend's settings from a TOML file. A missing file yields the
//! defaults; command line flags are applied on top by `main`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::pty::DEFAULT_WRITE_BUFFER_SIZE;

/// Default configuration file name
pub const CONFIG_FILE: &str = "ptyhub.toml";

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to convert app settings: {0}")]
    Convert(#[from] serde_json::Error),
}

/// Which clipboard backs CLIPBOARD_READ / CLIPBOARD_WRITE
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardMode {
    /// The host's system clipboard, falling back to memory when unavailable
    #[default]
    System,
    /// A clipboard private to this backend
    Memory,
}

/// Backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Optional authentication token
    pub token: Option<String>,
    /// Working directory for sessions that do not inherit one
    pub default_cwd: Option<PathBuf>,
    /// Directory scanned for themes
    pub themes_dir: Option<PathBuf>,
    /// Directory holding bulk files, the system temp dir when unset
    pub bulk_file_dir: Option<PathBuf>,
    /// Input write buffer capacity per session, in bytes
    pub max_write_buffer_size: usize,
    /// Clipboard backing
    pub clipboard: ClipboardMode,
    /// Application settings served to windows verbatim
    pub app: toml::Table,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 9000,
            token: None,
            default_cwd: None,
            themes_dir: None,
            bulk_file_dir: None,
            max_write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            clipboard: ClipboardMode::default(),
            app: toml::Table::new(),
        }
    }
}

impl BackendConfig {
    /// Load configuration from a file, defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Application settings as the JSON object sent in CONFIG replies
    pub fn app_settings(&self) -> Result<serde_json::Value, ConfigError> {
        Ok(serde_json::to_value(&self.app)?)
    }

    /// Directory holding bulk files
    pub fn bulk_file_dir(&self) -> PathBuf {
        self.bulk_file_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("ptyhub-bulk"))
    }
}
