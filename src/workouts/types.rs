//! Workout plan types and timeline expansion.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

/// A single segment within a workout plan.
///
/// Serialized as `{ "interval": <seconds>, "target": <watts> }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutSegment {
    /// Duration in seconds (at least 1)
    #[serde(rename = "interval")]
    pub duration_seconds: u32,
    /// Target power in watts
    #[serde(rename = "target")]
    pub target_power_watts: u32,
}

impl WorkoutSegment {
    /// Create a segment.
    pub fn new(duration_seconds: u32, target_power_watts: u32) -> Self {
        Self {
            duration_seconds,
            target_power_watts,
        }
    }
}

/// Segment as it arrives from structured input, before validation.
#[derive(Debug, Deserialize)]
struct SegmentInput {
    interval: i64,
    target: i64,
}

/// An ordered, validated list of workout segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkoutPlan {
    segments: Vec<WorkoutSegment>,
}

impl WorkoutPlan {
    /// Create a plan, validating every segment.
    pub fn new(segments: Vec<WorkoutSegment>) -> Result<Self, ValidationError> {
        validate(&segments)?;
        Ok(Self { segments })
    }

    /// Parse a plan from a JSON array of `{interval, target}` objects.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let inputs: Vec<SegmentInput> =
            serde_json::from_str(json).map_err(|e| ValidationError::Parse(e.to_string()))?;

        let mut segments = Vec::with_capacity(inputs.len());
        for (index, input) in inputs.into_iter().enumerate() {
            if input.interval <= 0 {
                return Err(ValidationError::NonPositiveDuration { index });
            }
            if input.target < 0 {
                return Err(ValidationError::NegativeTarget { index });
            }
            let duration_seconds = u32::try_from(input.interval)
                .map_err(|_| ValidationError::Parse(format!("interval too large at {index}")))?;
            let target_power_watts = u32::try_from(input.target)
                .map_err(|_| ValidationError::Parse(format!("target too large at {index}")))?;
            segments.push(WorkoutSegment::new(duration_seconds, target_power_watts));
        }

        Self::new(segments)
    }

    /// Segments in order.
    pub fn segments(&self) -> &[WorkoutSegment] {
        &self.segments
    }

    /// Total planned duration in seconds.
    pub fn total_duration_seconds(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.duration_seconds as u64)
            .sum()
    }

    /// Expand the plan into one slot per planned second.
    ///
    /// Slot indices are continuous across segment boundaries.
    pub fn expand(&self) -> Result<Vec<TimelineSlot>, ValidationError> {
        validate(&self.segments)?;

        let mut timeline = Vec::with_capacity(self.total_duration_seconds() as usize);
        let mut second_index = 0u32;

        for segment in &self.segments {
            for _ in 0..segment.duration_seconds {
                timeline.push(TimelineSlot::new(second_index, segment.target_power_watts));
                second_index += 1;
            }
        }

        Ok(timeline)
    }
}

/// Longest accepted plan: 24 hours.
pub const MAX_PLAN_SECONDS: u64 = 24 * 60 * 60;

fn validate(segments: &[WorkoutSegment]) -> Result<(), ValidationError> {
    if segments.is_empty() {
        return Err(ValidationError::EmptyPlan);
    }

    if let Some(index) = segments.iter().position(|s| s.duration_seconds == 0) {
        return Err(ValidationError::NonPositiveDuration { index });
    }

    let total_seconds: u64 = segments.iter().map(|s| s.duration_seconds as u64).sum();
    if total_seconds > MAX_PLAN_SECONDS {
        return Err(ValidationError::TooLong { total_seconds });
    }

    Ok(())
}

/// One second of the workout timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineSlot {
    /// Seconds from workout start
    pub second_index: u32,
    /// Planned target power in watts
    pub target_power_watts: u32,
    /// Measured power in watts
    pub measured_power_watts: Option<i16>,
    /// Measured speed in km/h
    pub measured_speed_kmh: Option<f32>,
    /// Measured cadence in RPM
    pub measured_cadence_rpm: Option<f32>,
}

impl TimelineSlot {
    /// Create an empty slot carrying only its planned target.
    pub fn new(second_index: u32, target_power_watts: u32) -> Self {
        Self {
            second_index,
            target_power_watts,
            measured_power_watts: None,
            measured_speed_kmh: None,
            measured_cadence_rpm: None,
        }
    }

    /// Whether any telemetry has been written to this slot.
    pub fn is_recorded(&self) -> bool {
        self.measured_power_watts.is_some()
    }
}

/// Status of the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStatus {
    /// No workout loaded
    #[default]
    Idle,
    /// Workout in progress
    Running,
    /// Telemetry ran past the end of the timeline
    Finished,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "Idle"),
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Finished => write!(f, "Finished"),
        }
    }
}

/// State of the active workout.
#[derive(Debug, Clone)]
pub struct RunState {
    /// Current execution status
    pub status: RunStatus,
    /// When the workout was started
    pub started_at: Instant,
    /// One slot per planned second
    pub timeline: Vec<TimelineSlot>,
    /// Target of the most recently updated slot
    pub current_target_power_watts: u32,
}

/// Outcome of feeding one telemetry sample to the run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    /// A slot received telemetry
    SlotUpdated {
        second_index: u32,
        current_target_power_watts: u32,
    },
    /// Telemetry arrived past the end of the timeline
    WorkoutComplete,
}

/// Errors validating a workout plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Plan has no segments
    #[error("Workout has no segments")]
    EmptyPlan,

    /// A segment duration is zero or negative
    #[error("Segment {index} has a non-positive duration")]
    NonPositiveDuration { index: usize },

    /// A segment target is negative
    #[error("Segment {index} has a negative target power")]
    NegativeTarget { index: usize },

    /// Total duration exceeds [`MAX_PLAN_SECONDS`]
    #[error("Workout lasts {total_seconds}s (limit 86400s)")]
    TooLong { total_seconds: u64 },

    /// Structured input could not be read
    #[error("Invalid workout plan: {0}")]
    Parse(String),
}

/// Illegal operations for the current run or session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    /// `start` while a workout is running
    #[error("Workout already running")]
    AlreadyRunning,

    /// `start` from a finished workout without a reset
    #[error("Workout finished; stop it before starting a new one")]
    NotIdle,

    /// Telemetry fed while no workout is running
    #[error("No workout running")]
    NotRunning,

    /// Target power requested before control of the trainer was granted
    #[error("Trainer control not acquired")]
    ControlNotAcquired,
}
