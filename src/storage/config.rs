//! Application configuration.
//!
//! Loaded from `config.toml` in the platform data directory. A missing file
//! yields defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// When to send target power to the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPowerPolicy {
    /// Send on every telemetry sample that lands in the timeline
    #[default]
    EveryTick,
    /// Send only when the target differs from the last one sent
    OnChange,
}

impl std::fmt::Display for TargetPowerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetPowerPolicy::EveryTick => write!(f, "every tick"),
            TargetPowerPolicy::OnChange => write!(f, "on change"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Trainer link settings
    pub sensors: SensorSettings,
    /// Workout session settings
    pub session: SessionSettings,
    /// Recording export settings
    pub recording: RecordingSettings,
}

/// Trainer link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// How long to scan for an FTMS trainer
    pub scan_timeout_secs: u64,
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
    /// Only connect to trainers whose name contains this text
    pub device_name_filter: Option<String>,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 10,
            connection_timeout_secs: 10,
            device_name_filter: None,
        }
    }
}

impl SensorSettings {
    /// Scan timeout as a [`Duration`].
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    /// Connection timeout as a [`Duration`].
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

/// Workout session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Abandon a control point write after this many milliseconds
    pub write_timeout_ms: u64,
    /// When to send target power
    pub target_power_policy: TargetPowerPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            write_timeout_ms: 3000,
            target_power_policy: TargetPowerPolicy::EveryTick,
        }
    }
}

impl SessionSettings {
    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Recording export settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Write the finished timeline as CSV
    pub export_csv: bool,
    /// Directory for exports (defaults to the data directory)
    pub output_dir: Option<PathBuf>,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            export_csv: true,
            output_dir: None,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ftmsride", "FtmsRide")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load application configuration from `path`.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("No config at {}, using defaults", path.display());
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save application configuration to `path`.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
