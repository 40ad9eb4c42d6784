//! Session orchestrator.
//!
//! Bridges the trainer's telemetry stream to the [`WorkoutEngine`] and sends
//! target power back over the control point. Telemetry is handled one buffer
//! at a time; control point writes go through a queue drained by a separate
//! writer task so a slow trainer never stalls telemetry.

use crate::recording::types::Recording;
use crate::sensors::ftms::{decode_indoor_bike_data, encode_request_control, encode_set_target_power};
use crate::session::transport::{Characteristic, Transport};
use crate::session::types::{SessionCommand, SessionError, SessionEvent};
use crate::storage::config::{SessionSettings, TargetPowerPolicy};
use crate::workouts::engine::WorkoutEngine;
use crate::workouts::types::{RunEvent, RunStatus, StateError, WorkoutPlan};
use chrono::{DateTime, Utc};
use crossbeam::channel::{Receiver, Sender};
use futures::stream::{Stream, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A queued target power write.
#[derive(Debug)]
struct WriteRequest {
    /// Session epoch when the write was queued
    epoch: u64,
    /// Target power being sent
    watts: u32,
    /// Encoded control point command
    bytes: Vec<u8>,
}

/// Drives one trainer session.
///
/// Must be created inside a tokio runtime: the writer task is spawned on
/// construction and lives until the orchestrator is dropped.
pub struct SessionOrchestrator<T: Transport> {
    /// Trainer link
    transport: Arc<T>,
    /// Run state machine, owned exclusively by the orchestrator
    engine: WorkoutEngine,
    /// Session settings
    settings: SessionSettings,
    /// Whether the trainer granted control
    control_acquired: bool,
    /// Last target queued for the trainer in this connection; the writer
    /// clears it when that write fails or times out
    last_sent_target: Arc<Mutex<Option<u32>>>,
    /// Plan of the active workout
    plan: Option<WorkoutPlan>,
    /// Wall-clock start of the active workout
    started_wall: Option<DateTime<Utc>>,
    /// Timeline captured when the last workout finished or stopped
    last_recording: Option<Recording>,
    /// Bumped on start, stop and disconnect to invalidate in-flight writes
    epoch: Arc<AtomicU64>,
    /// Queue to the writer task
    write_tx: mpsc::UnboundedSender<WriteRequest>,
    /// Channel for session events
    event_tx: Sender<SessionEvent>,
    /// Receiving end handed to observers
    event_rx: Receiver<SessionEvent>,
}

impl<T: Transport> SessionOrchestrator<T> {
    /// Create an orchestrator over a transport.
    pub fn new(transport: Arc<T>, settings: SessionSettings) -> Self {
        let (event_tx, event_rx) = crossbeam::channel::unbounded();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let epoch = Arc::new(AtomicU64::new(0));
        let last_sent_target = Arc::new(Mutex::new(None));

        tokio::spawn(write_loop(
            transport.clone(),
            write_rx,
            WriterShared {
                epoch: epoch.clone(),
                last_sent_target: last_sent_target.clone(),
            },
            settings.write_timeout(),
            event_tx.clone(),
        ));

        Self {
            transport,
            engine: WorkoutEngine::new(),
            settings,
            control_acquired: false,
            last_sent_target,
            plan: None,
            started_wall: None,
            last_recording: None,
            epoch,
            write_tx,
            event_tx,
            event_rx,
        }
    }

    /// Get an event receiver for session events.
    pub fn event_receiver(&self) -> Receiver<SessionEvent> {
        self.event_rx.clone()
    }

    /// Send an event to observers.
    fn send_event(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Request control of the trainer.
    ///
    /// This is the first control point write of a connection; target power
    /// is rejected until it succeeds.
    pub async fn on_connect(&mut self) -> Result<(), SessionError> {
        tracing::info!("Requesting trainer control");

        let cmd = encode_request_control();
        let write = self.transport.write(Characteristic::ControlPoint, &cmd);

        match tokio::time::timeout(self.settings.write_timeout(), write).await {
            Ok(Ok(())) => {
                self.control_acquired = true;
                self.set_last_sent_target(None);
                tracing::info!("Trainer control acquired");
                self.send_event(SessionEvent::ControlAcquired);
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!("Request control failed: {}", e);
                Err(e.into())
            }
            Err(_) => {
                tracing::error!("Request control timed out");
                Err(SessionError::WriteTimeout)
            }
        }
    }

    /// Handle link loss: stop the workout and drop control.
    pub fn on_disconnected(&mut self) {
        tracing::warn!("Trainer disconnected");
        self.stop();
        self.control_acquired = false;
        self.set_last_sent_target(None);
        self.send_event(SessionEvent::Disconnected);
    }

    /// Start a workout now.
    pub fn start(&mut self, plan: WorkoutPlan) -> Result<(), SessionError> {
        self.start_at(plan, Instant::now())
    }

    /// Start a workout with an explicit start instant.
    pub fn start_at(&mut self, plan: WorkoutPlan, now: Instant) -> Result<(), SessionError> {
        self.engine.start(&plan, now)?;

        self.bump_epoch();
        self.set_last_sent_target(None);
        self.started_wall = Some(Utc::now());
        self.last_recording = None;

        let total_seconds = self.engine.timeline().len() as u32;
        self.plan = Some(plan);
        self.send_event(SessionEvent::WorkoutStarted { total_seconds });
        Ok(())
    }

    /// Stop the workout. Safe in any state, including mid-write.
    pub fn stop(&mut self) {
        if self.engine.state().is_some() {
            self.last_recording = self.snapshot();
            self.engine.stop();
            self.send_event(SessionEvent::WorkoutStopped);
        }

        self.bump_epoch();
        self.plan = None;
        self.started_wall = None;
    }

    /// Handle a raw Indoor Bike Data notification received now.
    pub fn on_telemetry_received(
        &mut self,
        raw: &[u8],
    ) -> Result<Option<RunEvent>, SessionError> {
        self.on_telemetry_received_at(raw, Instant::now())
    }

    /// Handle a raw Indoor Bike Data notification received at `at`.
    ///
    /// Returns `Ok(None)` when no workout is running.
    pub fn on_telemetry_received_at(
        &mut self,
        raw: &[u8],
        at: Instant,
    ) -> Result<Option<RunEvent>, SessionError> {
        let sample = match decode_indoor_bike_data(raw, at) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!("Dropping telemetry: {}", e);
                self.send_event(SessionEvent::DecodeFailed {
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };

        if self.engine.status() != RunStatus::Running {
            return Ok(None);
        }

        let event = self.engine.on_telemetry(&sample)?;

        match event {
            RunEvent::SlotUpdated {
                second_index,
                current_target_power_watts,
            } => {
                self.send_event(SessionEvent::SlotUpdated {
                    second_index,
                    target_power_watts: current_target_power_watts,
                    measured_power_watts: sample.power_watts,
                });

                if let Err(e) = self.queue_target_power(current_target_power_watts, false) {
                    tracing::warn!("Target power {}W not sent: {}", current_target_power_watts, e);
                    self.send_event(SessionEvent::WriteRejected {
                        watts: current_target_power_watts,
                        error: e.to_string(),
                    });
                }
            }
            RunEvent::WorkoutComplete => {
                self.last_recording = self.snapshot();
                self.send_event(SessionEvent::WorkoutComplete);
            }
        }

        Ok(Some(event))
    }

    /// Queue a manual target power write.
    pub fn set_target_power(&mut self, watts: u32) -> Result<(), SessionError> {
        self.queue_target_power(watts, true)
    }

    fn queue_target_power(&mut self, watts: u32, force: bool) -> Result<(), SessionError> {
        if !self.control_acquired {
            return Err(StateError::ControlNotAcquired.into());
        }

        if !force
            && self.settings.target_power_policy == TargetPowerPolicy::OnChange
            && self.last_sent_target() == Some(watts)
        {
            return Ok(());
        }

        let bytes = encode_set_target_power(i64::from(watts))?;

        self.write_tx
            .send(WriteRequest {
                epoch: self.epoch.load(Ordering::SeqCst),
                watts,
                bytes,
            })
            .map_err(|_| SessionError::WriterClosed)?;

        self.set_last_sent_target(Some(watts));
        Ok(())
    }

    fn last_sent_target(&self) -> Option<u32> {
        self.last_sent_target.lock().ok().and_then(|t| *t)
    }

    fn set_last_sent_target(&self, watts: Option<u32>) {
        if let Ok(mut target) = self.last_sent_target.lock() {
            *target = watts;
        }
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Option<Recording> {
        let state = self.engine.state()?;
        let plan = self.plan.as_ref()?;

        Some(Recording {
            started_at: self.started_wall.unwrap_or_else(Utc::now),
            segments: plan.segments().to_vec(),
            timeline: state.timeline.clone(),
        })
    }

    /// Current recording: the live timeline if a workout is loaded,
    /// otherwise the last finished or stopped one.
    pub fn recording(&self) -> Option<Recording> {
        self.snapshot().or_else(|| self.last_recording.clone())
    }

    /// Status of the run state machine.
    pub fn status(&self) -> RunStatus {
        self.engine.status()
    }

    /// Read access to the run state machine.
    pub fn engine(&self) -> &WorkoutEngine {
        &self.engine
    }

    /// Whether the trainer granted control.
    pub fn has_control(&self) -> bool {
        self.control_acquired
    }

    /// Run the session event loop.
    ///
    /// Telemetry buffers and commands are processed one at a time. Returns
    /// the last recording when the loop ends, which happens on
    /// [`SessionCommand::Shutdown`], link loss, the end of the telemetry
    /// stream, or when every command sender is dropped.
    pub async fn run<S>(
        mut self,
        mut telemetry: S,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Option<Recording>
    where
        S: Stream<Item = Vec<u8>> + Unpin,
    {
        tracing::info!("Session started");

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(SessionCommand::Start(plan)) => {
                        if let Err(e) = self.start(plan) {
                            tracing::warn!("Workout not started: {}", e);
                        }
                    }
                    Some(SessionCommand::Stop) => self.stop(),
                    Some(SessionCommand::Disconnected) => {
                        self.on_disconnected();
                        break;
                    }
                    Some(SessionCommand::Shutdown) | None => {
                        self.stop();
                        break;
                    }
                },

                data = telemetry.next() => match data {
                    Some(raw) => {
                        // Errors are already reported as events.
                        let _ = self.on_telemetry_received(&raw);
                    }
                    None => {
                        tracing::warn!("Telemetry stream ended");
                        self.on_disconnected();
                        break;
                    }
                },
            }
        }

        tracing::info!("Session ended");
        self.last_recording.take()
    }
}

/// State the writer task shares with the orchestrator.
struct WriterShared {
    epoch: Arc<AtomicU64>,
    last_sent_target: Arc<Mutex<Option<u32>>>,
}

impl WriterShared {
    fn is_current(&self, request: &WriteRequest) -> bool {
        request.epoch == self.epoch.load(Ordering::SeqCst)
    }

    /// Forget an undelivered target so the next slot update resends it.
    fn forget_target(&self, watts: u32) {
        if let Ok(mut target) = self.last_sent_target.lock() {
            if *target == Some(watts) {
                *target = None;
            }
        }
    }
}

/// Drain the write queue, one control point write at a time.
async fn write_loop<T: Transport>(
    transport: Arc<T>,
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
    shared: WriterShared,
    timeout: Duration,
    event_tx: Sender<SessionEvent>,
) {
    while let Some(request) = rx.recv().await {
        if !shared.is_current(&request) {
            tracing::debug!("Skipping stale target power write ({}W)", request.watts);
            continue;
        }

        let write = transport.write(Characteristic::ControlPoint, &request.bytes);
        let result = tokio::time::timeout(timeout, write).await;

        if !shared.is_current(&request) {
            tracing::debug!("Discarding outcome of stale write ({}W)", request.watts);
            continue;
        }

        let event = match result {
            Ok(Ok(())) => {
                tracing::debug!("Set target power to {}W", request.watts);
                SessionEvent::TargetPowerSent {
                    watts: request.watts,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Target power write failed: {}", e);
                shared.forget_target(request.watts);
                SessionEvent::WriteFailed {
                    watts: request.watts,
                    error: e.to_string(),
                }
            }
            Err(_) => {
                tracing::warn!(
                    "Target power write abandoned after {}ms",
                    timeout.as_millis()
                );
                shared.forget_target(request.watts);
                SessionEvent::WriteTimedOut {
                    watts: request.watts,
                }
            }
        };

        let _ = event_tx.send(event);
    }
}
