//! Transport capability the session talks to.
//!
//! The orchestrator only sees this trait; the BLE implementation lives in
//! [`crate::sensors::manager`].

use crate::sensors::ftms::{FTMS_CONTROL_POINT_UUID, FTMS_SERVICE_UUID, INDOOR_BIKE_DATA_UUID};
use crate::sensors::types::SensorError;
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;
use uuid::Uuid;

/// GATT endpoints used by the ERG runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Fitness Machine Service container
    FitnessMachineService,
    /// Indoor Bike Data (notify)
    IndoorBikeData,
    /// Fitness Machine Control Point (write)
    ControlPoint,
}

impl Characteristic {
    /// 128-bit UUID on the wire.
    pub fn uuid(&self) -> Uuid {
        match self {
            Characteristic::FitnessMachineService => FTMS_SERVICE_UUID,
            Characteristic::IndoorBikeData => INDOOR_BIKE_DATA_UUID,
            Characteristic::ControlPoint => FTMS_CONTROL_POINT_UUID,
        }
    }
}

impl std::fmt::Display for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Characteristic::FitnessMachineService => write!(f, "Fitness Machine Service"),
            Characteristic::IndoorBikeData => write!(f, "Indoor Bike Data"),
            Characteristic::ControlPoint => write!(f, "Fitness Machine Control Point"),
        }
    }
}

/// Identifies the connected trainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    /// Transport-specific device identifier
    pub device_id: String,
    /// Advertised name
    pub name: String,
}

/// Stream of raw notification payloads. Ends when the link drops.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Callback invoked once when the link drops.
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

/// A GATT link to a trainer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the link.
    async fn connect(&self) -> Result<ConnectionHandle, SensorError>;

    /// Tear the link down.
    async fn disconnect(&self) -> Result<(), SensorError>;

    /// Subscribe to notifications. The stream is not restartable after a
    /// disconnect.
    async fn subscribe(&self, characteristic: Characteristic)
        -> Result<NotificationStream, SensorError>;

    /// Write a command and wait for the acknowledgement.
    async fn write(&self, characteristic: Characteristic, bytes: &[u8]) -> Result<(), SensorError>;

    /// Register a callback for link loss.
    fn on_disconnected(&self, callback: DisconnectCallback);
}
