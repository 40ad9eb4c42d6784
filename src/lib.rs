//! FtmsRide - ERG-mode interval workouts for FTMS smart trainers
//!
//! Decodes Indoor Bike Data telemetry, runs a second-indexed workout
//! timeline against it, and drives target power over the Fitness Machine
//! Control Point.

pub mod recording;
pub mod sensors;
pub mod session;
pub mod storage;
pub mod workouts;

// Re-export commonly used types
pub use recording::types::Recording;
pub use sensors::manager::BleTrainer;
pub use session::orchestrator::SessionOrchestrator;
pub use storage::config::AppConfig;
pub use workouts::engine::WorkoutEngine;
pub use workouts::types::WorkoutPlan;
