//! Workout execution engine.
//!
//! Maps telemetry samples onto the second-indexed workout timeline and
//! tracks the current target power.

use crate::sensors::types::TelemetrySample;
use crate::workouts::types::{
    RunEvent, RunState, RunStatus, StateError, TimelineSlot, ValidationError, WorkoutPlan,
};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors returned by [`WorkoutEngine::start`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    /// The plan failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The engine is not idle
    #[error(transparent)]
    State(#[from] StateError),
}

/// Workout execution engine.
///
/// State machine over [`RunStatus`]:
/// - `Idle -> Running` via [`start`](Self::start)
/// - `Running -> Finished` when telemetry lands past the timeline
/// - any state `-> Idle` via [`stop`](Self::stop)
#[derive(Debug, Default)]
pub struct WorkoutEngine {
    /// Active run, `None` while idle
    state: Option<RunState>,
}

impl WorkoutEngine {
    /// Create a new idle workout engine.
    pub fn new() -> Self {
        Self { state: None }
    }

    /// Start a workout at `now`.
    ///
    /// A plan that fails validation leaves the engine unchanged.
    pub fn start(&mut self, plan: &WorkoutPlan, now: Instant) -> Result<(), StartError> {
        match self.status() {
            RunStatus::Idle => {}
            RunStatus::Running => return Err(StateError::AlreadyRunning.into()),
            RunStatus::Finished => return Err(StateError::NotIdle.into()),
        }

        let timeline = plan.expand()?;
        let current_target_power_watts = timeline
            .first()
            .map(|slot| slot.target_power_watts)
            .unwrap_or(0);

        tracing::info!(
            "Workout started: {} segments, {}s",
            plan.segments().len(),
            timeline.len()
        );

        self.state = Some(RunState {
            status: RunStatus::Running,
            started_at: now,
            timeline,
            current_target_power_watts,
        });

        Ok(())
    }

    /// Feed one telemetry sample.
    ///
    /// The slot is chosen by whole seconds elapsed since start. A later
    /// sample in the same second overwrites the earlier one.
    pub fn on_telemetry(&mut self, sample: &TelemetrySample) -> Result<RunEvent, StateError> {
        let state = match self.state.as_mut() {
            Some(s) if s.status == RunStatus::Running => s,
            _ => return Err(StateError::NotRunning),
        };

        let elapsed = sample.timestamp.saturating_duration_since(state.started_at);
        let second_index = elapsed.as_secs();

        let slot = match usize::try_from(second_index)
            .ok()
            .and_then(|i| state.timeline.get_mut(i))
        {
            Some(slot) => slot,
            None => {
                state.status = RunStatus::Finished;
                tracing::info!("Workout completed after {}s", state.timeline.len());
                return Ok(RunEvent::WorkoutComplete);
            }
        };

        slot.measured_power_watts = Some(sample.power_watts);
        slot.measured_speed_kmh = Some(sample.speed_kmh());
        slot.measured_cadence_rpm = Some(sample.cadence_rpm());

        if state.current_target_power_watts != slot.target_power_watts {
            tracing::debug!(
                "Target power {}W -> {}W at {}s",
                state.current_target_power_watts,
                slot.target_power_watts,
                slot.second_index
            );
        }
        state.current_target_power_watts = slot.target_power_watts;

        Ok(RunEvent::SlotUpdated {
            second_index: slot.second_index,
            current_target_power_watts: slot.target_power_watts,
        })
    }

    /// Stop the workout from any state, discarding the timeline.
    pub fn stop(&mut self) {
        if let Some(state) = self.state.take() {
            tracing::info!("Workout stopped ({})", state.status);
        }
    }

    /// Current status.
    pub fn status(&self) -> RunStatus {
        self.state
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(RunStatus::Idle)
    }

    /// Get the current run state.
    pub fn state(&self) -> Option<&RunState> {
        self.state.as_ref()
    }

    /// The timeline of the active or finished run.
    pub fn timeline(&self) -> &[TimelineSlot] {
        self.state
            .as_ref()
            .map(|s| s.timeline.as_slice())
            .unwrap_or(&[])
    }

    /// Get the current target power in watts.
    pub fn current_target_power(&self) -> Option<u32> {
        self.state.as_ref().map(|s| s.current_target_power_watts)
    }

    /// Time since the workout started, as of `now`.
    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.state
            .as_ref()
            .map(|s| now.saturating_duration_since(s.started_at))
    }

    /// Check if a workout is running.
    pub fn is_running(&self) -> bool {
        self.status() == RunStatus::Running
    }

    /// Check if workout is complete.
    pub fn is_complete(&self) -> bool {
        self.status() == RunStatus::Finished
    }
}
