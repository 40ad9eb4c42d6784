//! FTMS (Fitness Machine Service) protocol implementation.
//!
//! Indoor Bike Data (0x2AD2) decoding and Fitness Machine Control Point
//! (0x2AD9) command encoding for ERG-mode trainers.

use crate::sensors::types::TelemetrySample;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// FTMS Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);

/// Indoor Bike Data Characteristic UUID (0x2AD2)
pub const INDOOR_BIKE_DATA_UUID: Uuid = Uuid::from_u128(0x0000_2ad2_0000_1000_8000_0080_5f9b_34fb);

/// Fitness Machine Control Point UUID (0x2AD9)
pub const FTMS_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad9_0000_1000_8000_0080_5f9b_34fb);

/// Minimum length of an Indoor Bike Data notification carrying
/// speed, cadence and power.
pub const INDOOR_BIKE_DATA_MIN_LEN: usize = 8;

const SPEED_OFFSET: usize = 2;
const CADENCE_OFFSET: usize = 4;
const POWER_OFFSET: usize = 6;

/// Errors decoding a telemetry notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Buffer too short for the fixed layout
    #[error("Indoor Bike Data too short: {len} bytes (need 8)")]
    TooShort { len: usize },
}

/// Errors encoding a control point command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Value does not fit in the 16-bit wire field
    #[error("Target power {watts}W does not fit in a signed 16-bit field")]
    OutOfRange { watts: i64 },
}

/// Decode an Indoor Bike Data notification.
///
/// The layout is fixed little-endian:
/// - Bytes 0-1: Flags (not interpreted)
/// - Bytes 2-3: Instantaneous speed, 0.01 km/h units
/// - Bytes 4-5: Instantaneous cadence, 0.5 RPM units
/// - Bytes 6-7: Instantaneous power, signed watts
///
/// `received_at` is the capture time stamped by the caller.
pub fn decode_indoor_bike_data(
    data: &[u8],
    received_at: Instant,
) -> Result<TelemetrySample, DecodeError> {
    if data.len() < INDOOR_BIKE_DATA_MIN_LEN {
        return Err(DecodeError::TooShort { len: data.len() });
    }

    let speed_raw = u16::from_le_bytes([data[SPEED_OFFSET], data[SPEED_OFFSET + 1]]);
    let cadence_raw = u16::from_le_bytes([data[CADENCE_OFFSET], data[CADENCE_OFFSET + 1]]);
    let power = i16::from_le_bytes([data[POWER_OFFSET], data[POWER_OFFSET + 1]]);

    Ok(TelemetrySample {
        power_watts: power,
        speed_centi_kmh: speed_raw,
        cadence_half_rpm: cadence_raw,
        timestamp: received_at,
    })
}

/// FTMS Control Point opcodes used by the ERG runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlOpcode {
    /// Request control of the fitness machine
    RequestControl = 0x00,
    /// Set target power
    SetTargetPower = 0x05,
}

/// Build a control point command to request control.
pub fn encode_request_control() -> Vec<u8> {
    vec![ControlOpcode::RequestControl as u8]
}

/// Build a control point command to set target power (ERG mode).
///
/// Rejects values that do not fit the signed 16-bit wire field rather than
/// truncating them.
pub fn encode_set_target_power(watts: i64) -> Result<Vec<u8>, EncodeError> {
    let wire = i16::try_from(watts).map_err(|_| EncodeError::OutOfRange { watts })?;

    let mut cmd = vec![ControlOpcode::SetTargetPower as u8];
    cmd.extend_from_slice(&wire.to_le_bytes());
    Ok(cmd)
}
