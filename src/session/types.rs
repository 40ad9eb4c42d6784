//! Session commands, events and errors.

use crate::sensors::ftms::{DecodeError, EncodeError};
use crate::sensors::types::SensorError;
use crate::workouts::engine::StartError;
use crate::workouts::types::{StateError, ValidationError, WorkoutPlan};
use thiserror::Error;

/// Commands accepted by the session event loop.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Start a workout now
    Start(WorkoutPlan),
    /// Stop the current workout
    Stop,
    /// The transport reported link loss
    Disconnected,
    /// Stop and leave the event loop
    Shutdown,
}

/// Events reported to observers of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Trainer granted control
    ControlAcquired,
    /// A workout started
    WorkoutStarted { total_seconds: u32 },
    /// Telemetry landed in a timeline slot
    SlotUpdated {
        second_index: u32,
        target_power_watts: u32,
        measured_power_watts: i16,
    },
    /// Telemetry ran past the end of the timeline
    WorkoutComplete,
    /// The workout was stopped and its timeline discarded
    WorkoutStopped,
    /// Trainer acknowledged a target power write
    TargetPowerSent { watts: u32 },
    /// Target power was not queued
    WriteRejected { watts: u32, error: String },
    /// Transport reported a write failure
    WriteFailed { watts: u32, error: String },
    /// Write abandoned after the configured timeout
    WriteTimedOut { watts: u32 },
    /// A telemetry buffer was dropped
    DecodeFailed { error: String },
    /// Link to the trainer was lost
    Disconnected,
}

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Telemetry decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Command encode failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("Invalid workout plan: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid state: {0}")]
    State(#[from] StateError),

    #[error("Transport error: {0}")]
    Transport(#[from] SensorError),

    #[error("Control point write timed out")]
    WriteTimeout,

    #[error("Write queue closed")]
    WriterClosed,
}

impl From<StartError> for SessionError {
    fn from(err: StartError) -> Self {
        match err {
            StartError::Validation(e) => SessionError::Validation(e),
            StartError::State(e) => SessionError::State(e),
        }
    }
}
