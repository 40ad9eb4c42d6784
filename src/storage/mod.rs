//! Storage module for configuration.

pub mod config;

pub use config::{
    load_config, load_config_from, save_config, save_config_to, AppConfig, ConfigError,
    RecordingSettings, SensorSettings, SessionSettings, TargetPowerPolicy,
};
