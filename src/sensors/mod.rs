//! Sensor module for the BLE FTMS trainer link.

pub mod ftms;
pub mod manager;
pub mod types;

pub use ftms::{
    decode_indoor_bike_data, encode_request_control, encode_set_target_power, ControlOpcode,
    DecodeError, EncodeError,
};
pub use manager::BleTrainer;
pub use types::{ConnectionState, DiscoveredTrainer, SensorError, TelemetrySample};
