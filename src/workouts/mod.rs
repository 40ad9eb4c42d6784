//! Workout plans and the run state machine.

pub mod engine;
pub mod types;

pub use engine::{StartError, WorkoutEngine};
pub use types::{
    RunEvent, RunState, RunStatus, StateError, TimelineSlot, ValidationError, WorkoutPlan,
    WorkoutSegment,
};
