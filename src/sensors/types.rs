//! Sensor types for the FTMS trainer link.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

/// Connection state of the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Active connection
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// One decoded Indoor Bike Data notification.
///
/// Raw wire units are kept; use the accessors for scaled values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    /// Instantaneous power in watts
    pub power_watts: i16,
    /// Instantaneous speed in 0.01 km/h units
    pub speed_centi_kmh: u16,
    /// Instantaneous cadence in 0.5 RPM units
    pub cadence_half_rpm: u16,
    /// When the notification was received
    pub timestamp: Instant,
}

impl TelemetrySample {
    /// Speed in km/h.
    pub fn speed_kmh(&self) -> f32 {
        self.speed_centi_kmh as f32 / 100.0
    }

    /// Cadence in RPM.
    pub fn cadence_rpm(&self) -> f32 {
        self.cadence_half_rpm as f32 * 0.5
    }
}

/// A trainer seen while scanning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredTrainer {
    /// BLE device address/identifier
    pub device_id: String,
    /// Advertised local name
    pub name: String,
    /// Signal strength (RSSI)
    pub signal_strength: Option<i16>,
}

/// Errors that can occur on the trainer transport.
#[derive(Debug, Error)]
pub enum SensorError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// Failed to start BLE scanning
    #[error("Failed to start scanning: {0}")]
    ScanFailed(String),

    /// No FTMS trainer found while scanning
    #[error("No FTMS trainer found")]
    TrainerNotFound,

    /// Connection to the trainer failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timed out
    #[error("Connection timed out")]
    ConnectionTimeout,

    /// Operation requires a connection
    #[error("Not connected")]
    NotConnected,

    /// Trainer disconnected unexpectedly
    #[error("Trainer disconnected: {0}")]
    Disconnected(String),

    /// Characteristic missing on the connected trainer
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// Failed to subscribe to notifications
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Failed to write to a characteristic
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}
