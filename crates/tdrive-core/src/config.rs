use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{TdriveError, TdriveResult};

/// Telegram-style upload part size; the bridge transfers in fixed 512 KiB chunks.
pub const DEFAULT_CHUNK_SIZE: u64 = 512 * 1024;

/// Top-level client configuration (loaded from tdrive.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TdriveConfig {
    pub transfer: TransferConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Refresh tick interval in milliseconds (default: 50)
    pub refresh_interval_ms: u64,
    /// Chunk size used to estimate progress of restored tasks (default: 512 KiB)
    pub chunk_size: u64,
    /// Capacity of the transfer service input channel (default: 256)
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 50,
            chunk_size: DEFAULT_CHUNK_SIZE,
            event_buffer: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl TdriveConfig {
    /// Parse a TOML document and reject values the transfer layer cannot run with.
    pub fn from_toml(content: &str) -> TdriveResult<Self> {
        let config: TdriveConfig =
            toml::from_str(content).map_err(|e| TdriveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> TdriveResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| TdriveError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> TdriveResult<()> {
        if self.transfer.chunk_size == 0 {
            return Err(TdriveError::Config("transfer.chunk_size must be > 0".into()));
        }
        if self.transfer.refresh_interval_ms == 0 {
            return Err(TdriveError::Config(
                "transfer.refresh_interval_ms must be > 0".into(),
            ));
        }
        if self.transfer.event_buffer == 0 {
            return Err(TdriveError::Config("transfer.event_buffer must be > 0".into()));
        }
        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(TdriveError::Config(format!(
                "logging.format must be \"text\" or \"json\", got {other:?}"
            ))),
        }
    }
}
