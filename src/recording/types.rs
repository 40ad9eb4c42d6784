//! Recording types for workout telemetry export.

use crate::workouts::types::{TimelineSlot, WorkoutSegment};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// A snapshot of a workout timeline with the plan that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    /// Wall-clock start of the workout
    pub started_at: DateTime<Utc>,
    /// Segments of the plan, in order
    pub segments: Vec<WorkoutSegment>,
    /// One slot per planned second
    pub timeline: Vec<TimelineSlot>,
}

impl Recording {
    /// Number of slots that received telemetry.
    pub fn recorded_seconds(&self) -> usize {
        self.timeline.iter().filter(|s| s.is_recorded()).count()
    }

    /// Average measured power over recorded slots.
    pub fn avg_power(&self) -> Option<i32> {
        let powers: Vec<i32> = self
            .timeline
            .iter()
            .filter_map(|s| s.measured_power_watts.map(i32::from))
            .collect();

        if powers.is_empty() {
            return None;
        }
        Some(powers.iter().sum::<i32>() / powers.len() as i32)
    }
}

/// One point of the chart series handed to a renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    /// Seconds from workout start
    pub second_index: u32,
    /// Index of the segment covering this second
    pub segment_index: usize,
    /// Display label: seconds into the current segment
    pub label: String,
    /// Planned target power in watts
    pub target_power_watts: u32,
    /// Measured power in watts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_watts: Option<i16>,
    /// Measured speed in km/h
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f32>,
    /// Measured cadence in RPM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cadence_rpm: Option<f32>,
}

/// Errors exporting a recording.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Nothing was recorded
    #[error("No telemetry recorded")]
    NoData,

    /// Writing the output failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
