//! Integration tests for the session orchestrator against a mock trainer.

use super::transport_mock::{MockBikeData, MockHandles, MockTransport};
use crossbeam::channel::Receiver;
use ftmsride::session::{SessionCommand, SessionError, SessionEvent, SessionOrchestrator};
use ftmsride::storage::config::{SessionSettings, TargetPowerPolicy};
use ftmsride::workouts::{RunEvent, RunStatus, StateError, WorkoutPlan, WorkoutSegment};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

fn plan(segments: &[(u32, u32)]) -> WorkoutPlan {
    WorkoutPlan::new(
        segments
            .iter()
            .map(|&(duration, target)| WorkoutSegment::new(duration, target))
            .collect(),
    )
    .unwrap()
}

fn settings(policy: TargetPowerPolicy, write_timeout_ms: u64) -> SessionSettings {
    SessionSettings {
        write_timeout_ms,
        target_power_policy: policy,
    }
}

/// Next control point write, if one arrives within a short window.
async fn next_write(handles: &mut MockHandles) -> Option<Vec<u8>> {
    tokio::time::timeout(Duration::from_millis(200), handles.written.recv())
        .await
        .ok()
        .flatten()
}

/// Wait until an event matching `pred` arrives.
async fn wait_for_event<F>(events: &Receiver<SessionEvent>, pred: F) -> Option<SessionEvent>
where
    F: Fn(&SessionEvent) -> bool,
{
    for _ in 0..100 {
        while let Ok(event) = events.try_recv() {
            if pred(&event) {
                return Some(event);
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

async fn connected(
    policy: TargetPowerPolicy,
) -> (SessionOrchestrator<MockTransport>, MockHandles) {
    let (transport, mut handles) = MockTransport::new();
    let mut session = SessionOrchestrator::new(transport, settings(policy, 1000));

    session.on_connect().await.unwrap();
    assert_eq!(next_write(&mut handles).await, Some(vec![0x00]));
    assert!(session.has_control());

    (session, handles)
}

#[tokio::test]
async fn test_target_change_issues_single_write() {
    let (mut session, mut handles) = connected(TargetPowerPolicy::EveryTick).await;
    let t0 = Instant::now();
    session.start_at(plan(&[(10, 100), (10, 200)]), t0).unwrap();

    let event = session
        .on_telemetry_received_at(
            &MockBikeData::with_power(150).packet(),
            t0 + Duration::from_secs(15),
        )
        .unwrap();

    assert_eq!(
        event,
        Some(RunEvent::SlotUpdated {
            second_index: 15,
            current_target_power_watts: 200
        })
    );
    assert_eq!(session.engine().current_target_power(), Some(200));
    assert_eq!(
        session.engine().timeline()[15].measured_power_watts,
        Some(150)
    );

    assert_eq!(next_write(&mut handles).await, Some(vec![0x05, 0xC8, 0x00]));
    assert_eq!(next_write(&mut handles).await, None);
}

#[tokio::test]
async fn test_late_sample_completes_without_writes() {
    let (mut session, mut handles) = connected(TargetPowerPolicy::EveryTick).await;
    let t0 = Instant::now();
    session.start_at(plan(&[(5, 100)]), t0).unwrap();

    let event = session
        .on_telemetry_received_at(
            &MockBikeData::with_power(150).packet(),
            t0 + Duration::from_secs(6),
        )
        .unwrap();
    assert_eq!(event, Some(RunEvent::WorkoutComplete));
    assert_eq!(session.status(), RunStatus::Finished);
    assert!(session
        .engine()
        .timeline()
        .iter()
        .all(|slot| !slot.is_recorded()));

    for secs in [7, 8, 20] {
        let event = session
            .on_telemetry_received_at(
                &MockBikeData::with_power(150).packet(),
                t0 + Duration::from_secs(secs),
            )
            .unwrap();
        assert_eq!(event, None);
    }
    assert_eq!(next_write(&mut handles).await, None);

    // A new start resumes writes
    session.stop();
    let t1 = Instant::now();
    session.start_at(plan(&[(5, 120)]), t1).unwrap();
    session
        .on_telemetry_received_at(&MockBikeData::default().packet(), t1)
        .unwrap();
    assert_eq!(next_write(&mut handles).await, Some(vec![0x05, 0x78, 0x00]));
}

#[tokio::test]
async fn test_target_power_rejected_before_control() {
    let (transport, mut handles) = MockTransport::new();
    let mut session =
        SessionOrchestrator::new(transport, settings(TargetPowerPolicy::EveryTick, 1000));
    let events = session.event_receiver();

    let t0 = Instant::now();
    session.start_at(plan(&[(10, 100)]), t0).unwrap();
    let event = session
        .on_telemetry_received_at(&MockBikeData::default().packet(), t0)
        .unwrap();

    // The slot is still recorded
    assert!(matches!(event, Some(RunEvent::SlotUpdated { .. })));
    assert!(session.engine().timeline()[0].is_recorded());

    assert!(
        wait_for_event(&events, |e| matches!(e, SessionEvent::WriteRejected { watts: 100, .. }))
            .await
            .is_some()
    );
    assert!(matches!(
        session.set_target_power(100),
        Err(SessionError::State(StateError::ControlNotAcquired))
    ));
    assert_eq!(next_write(&mut handles).await, None);
}

#[tokio::test]
async fn test_malformed_telemetry_is_dropped() {
    let (mut session, mut handles) = connected(TargetPowerPolicy::EveryTick).await;
    let events = session.event_receiver();
    let t0 = Instant::now();
    session.start_at(plan(&[(10, 100)]), t0).unwrap();

    let result = session.on_telemetry_received_at(&[0x44, 0x00, 0xB8], t0);

    assert!(matches!(result, Err(SessionError::Decode(_))));
    assert_eq!(session.status(), RunStatus::Running);
    assert!(session.engine().timeline().iter().all(|s| !s.is_recorded()));
    assert!(
        wait_for_event(&events, |e| matches!(e, SessionEvent::DecodeFailed { .. }))
            .await
            .is_some()
    );
    assert_eq!(next_write(&mut handles).await, None);
}

#[tokio::test]
async fn test_every_tick_policy_writes_each_sample() {
    let (mut session, mut handles) = connected(TargetPowerPolicy::EveryTick).await;
    let t0 = Instant::now();
    session.start_at(plan(&[(10, 100)]), t0).unwrap();

    for secs in 0..3 {
        session
            .on_telemetry_received_at(
                &MockBikeData::default().packet(),
                t0 + Duration::from_secs(secs),
            )
            .unwrap();
    }

    for _ in 0..3 {
        assert_eq!(next_write(&mut handles).await, Some(vec![0x05, 0x64, 0x00]));
    }
    assert_eq!(next_write(&mut handles).await, None);
}

#[tokio::test]
async fn test_on_change_policy_writes_only_on_new_target() {
    let (mut session, mut handles) = connected(TargetPowerPolicy::OnChange).await;
    let t0 = Instant::now();
    session.start_at(plan(&[(3, 100), (3, 250)]), t0).unwrap();

    for secs in 0..5 {
        session
            .on_telemetry_received_at(
                &MockBikeData::default().packet(),
                t0 + Duration::from_secs(secs),
            )
            .unwrap();
    }

    assert_eq!(next_write(&mut handles).await, Some(vec![0x05, 0x64, 0x00]));
    assert_eq!(next_write(&mut handles).await, Some(vec![0x05, 0xFA, 0x00]));
    assert_eq!(next_write(&mut handles).await, None);
}

#[tokio::test]
async fn test_request_control_timeout() {
    let (transport, _handles) = MockTransport::with_write_delay(Duration::from_millis(300));
    let mut session =
        SessionOrchestrator::new(transport, settings(TargetPowerPolicy::EveryTick, 50));

    assert!(matches!(
        session.on_connect().await,
        Err(SessionError::WriteTimeout)
    ));
    assert!(!session.has_control());
}

#[tokio::test]
async fn test_stalled_write_times_out_without_blocking_telemetry() {
    let (transport, mut handles) = MockTransport::new();
    let mut session = SessionOrchestrator::new(
        transport.clone(),
        settings(TargetPowerPolicy::EveryTick, 50),
    );
    let events = session.event_receiver();
    session.on_connect().await.unwrap();
    assert_eq!(next_write(&mut handles).await, Some(vec![0x00]));

    transport.set_write_delay(Duration::from_millis(300));
    let t0 = Instant::now();
    session.start_at(plan(&[(10, 100)]), t0).unwrap();
    session
        .on_telemetry_received_at(&MockBikeData::default().packet(), t0)
        .unwrap();

    // Telemetry keeps flowing while the write is pending
    let event = session
        .on_telemetry_received_at(
            &MockBikeData::default().packet(),
            t0 + Duration::from_secs(1),
        )
        .unwrap();
    assert!(matches!(event, Some(RunEvent::SlotUpdated { second_index: 1, .. })));

    assert!(
        wait_for_event(&events, |e| matches!(e, SessionEvent::WriteTimedOut { watts: 100 }))
            .await
            .is_some()
    );
    assert_eq!(session.status(), RunStatus::Running);
}

#[tokio::test]
async fn test_write_failure_is_reported_and_run_continues() {
    let (transport, _handles) = MockTransport::new();
    let mut session = SessionOrchestrator::new(
        transport.clone(),
        settings(TargetPowerPolicy::EveryTick, 1000),
    );
    let events = session.event_receiver();
    session.on_connect().await.unwrap();

    transport.fail_writes(true);
    let t0 = Instant::now();
    session.start_at(plan(&[(10, 100)]), t0).unwrap();
    session
        .on_telemetry_received_at(&MockBikeData::default().packet(), t0)
        .unwrap();

    assert!(
        wait_for_event(&events, |e| matches!(e, SessionEvent::WriteFailed { watts: 100, .. }))
            .await
            .is_some()
    );
    assert_eq!(session.status(), RunStatus::Running);

    let event = session
        .on_telemetry_received_at(
            &MockBikeData::default().packet(),
            t0 + Duration::from_secs(1),
        )
        .unwrap();
    assert!(matches!(event, Some(RunEvent::SlotUpdated { second_index: 1, .. })));
}

#[tokio::test]
async fn test_on_change_resends_target_after_failed_write() {
    let (transport, mut handles) = MockTransport::new();
    let mut session = SessionOrchestrator::new(
        transport.clone(),
        settings(TargetPowerPolicy::OnChange, 1000),
    );
    let events = session.event_receiver();
    session.on_connect().await.unwrap();
    assert_eq!(next_write(&mut handles).await, Some(vec![0x00]));

    transport.fail_writes(true);
    let t0 = Instant::now();
    session.start_at(plan(&[(30, 100)]), t0).unwrap();
    session
        .on_telemetry_received_at(&MockBikeData::default().packet(), t0)
        .unwrap();
    assert!(
        wait_for_event(&events, |e| matches!(e, SessionEvent::WriteFailed { watts: 100, .. }))
            .await
            .is_some()
    );

    // Same target, but it never reached the trainer
    transport.fail_writes(false);
    for secs in 1..=8 {
        session
            .on_telemetry_received_at(
                &MockBikeData::default().packet(),
                t0 + Duration::from_secs(secs),
            )
            .unwrap();
    }

    assert_eq!(next_write(&mut handles).await, Some(vec![0x05, 0x64, 0x00]));
    assert_eq!(next_write(&mut handles).await, None);
}

#[tokio::test]
async fn test_on_change_resends_target_after_timed_out_write() {
    let (transport, mut handles) = MockTransport::new();
    let mut session = SessionOrchestrator::new(
        transport.clone(),
        settings(TargetPowerPolicy::OnChange, 50),
    );
    let events = session.event_receiver();
    session.on_connect().await.unwrap();
    assert_eq!(next_write(&mut handles).await, Some(vec![0x00]));

    transport.set_write_delay(Duration::from_millis(200));
    let t0 = Instant::now();
    session.start_at(plan(&[(30, 100)]), t0).unwrap();
    session
        .on_telemetry_received_at(&MockBikeData::default().packet(), t0)
        .unwrap();
    assert!(
        wait_for_event(&events, |e| matches!(e, SessionEvent::WriteTimedOut { watts: 100 }))
            .await
            .is_some()
    );

    transport.set_write_delay(Duration::ZERO);
    session
        .on_telemetry_received_at(
            &MockBikeData::default().packet(),
            t0 + Duration::from_secs(1),
        )
        .unwrap();

    assert!(
        wait_for_event(&events, |e| matches!(e, SessionEvent::TargetPowerSent { watts: 100 }))
            .await
            .is_some()
    );
}

#[tokio::test]
async fn test_write_to_dropped_link_is_reported() {
    let (transport, mut handles) = MockTransport::new();
    let mut session = SessionOrchestrator::new(
        transport.clone(),
        settings(TargetPowerPolicy::EveryTick, 1000),
    );
    let events = session.event_receiver();
    session.on_connect().await.unwrap();
    assert_eq!(next_write(&mut handles).await, Some(vec![0x00]));

    // Link drops before the session hears about it
    transport.simulate_disconnect();
    let t0 = Instant::now();
    session.start_at(plan(&[(10, 100)]), t0).unwrap();
    session
        .on_telemetry_received_at(&MockBikeData::default().packet(), t0)
        .unwrap();

    let event = wait_for_event(&events, |e| matches!(e, SessionEvent::WriteFailed { .. })).await;
    match event {
        Some(SessionEvent::WriteFailed { watts, error }) => {
            assert_eq!(watts, 100);
            assert!(error.contains("disconnected"));
        }
        other => panic!("expected WriteFailed, got {:?}", other),
    }
    assert_eq!(next_write(&mut handles).await, None);
}

#[tokio::test]
async fn test_write_outcome_after_stop_is_discarded() {
    let (transport, mut handles) = MockTransport::with_write_delay(Duration::from_millis(100));
    let mut session =
        SessionOrchestrator::new(transport, settings(TargetPowerPolicy::EveryTick, 1000));
    let events = session.event_receiver();
    session.on_connect().await.unwrap();
    assert_eq!(next_write(&mut handles).await, Some(vec![0x00]));

    let t0 = Instant::now();
    session.start_at(plan(&[(10, 100)]), t0).unwrap();
    session
        .on_telemetry_received_at(&MockBikeData::default().packet(), t0)
        .unwrap();

    // Let the writer pick the request up, then stop mid-write.
    tokio::time::sleep(Duration::from_millis(20)).await;
    session.stop();
    assert_eq!(session.status(), RunStatus::Idle);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let sent: Vec<SessionEvent> = events
        .try_iter()
        .filter(|e| matches!(e, SessionEvent::TargetPowerSent { .. }))
        .collect();
    assert!(sent.is_empty());
}

#[tokio::test]
async fn test_disconnect_drops_control_and_run() {
    let (mut session, _handles) = connected(TargetPowerPolicy::EveryTick).await;
    session.start_at(plan(&[(10, 100)]), Instant::now()).unwrap();

    session.on_disconnected();

    assert_eq!(session.status(), RunStatus::Idle);
    assert!(!session.has_control());
    assert!(matches!(
        session.set_target_power(150),
        Err(SessionError::State(StateError::ControlNotAcquired))
    ));
}

#[tokio::test]
async fn test_run_loop_records_and_shuts_down() {
    let (transport, mut handles) = MockTransport::new();
    let telemetry = {
        use ftmsride::session::{Characteristic, Transport};
        transport
            .subscribe(Characteristic::IndoorBikeData)
            .await
            .unwrap()
    };

    let mut session =
        SessionOrchestrator::new(transport, settings(TargetPowerPolicy::EveryTick, 1000));
    session.on_connect().await.unwrap();
    assert_eq!(next_write(&mut handles).await, Some(vec![0x00]));

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(session.run(telemetry, command_rx));

    command_tx
        .send(SessionCommand::Start(plan(&[(30, 180)])))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    handles
        .notify
        .send(MockBikeData::with_power(175).packet())
        .unwrap();
    assert_eq!(next_write(&mut handles).await, Some(vec![0x05, 0xB4, 0x00]));

    command_tx.send(SessionCommand::Shutdown).unwrap();
    let recording = task.await.unwrap().expect("recording");

    assert_eq!(recording.timeline.len(), 30);
    assert_eq!(recording.timeline[0].measured_power_watts, Some(175));
    assert_eq!(recording.recorded_seconds(), 1);
}

#[tokio::test]
async fn test_run_loop_ends_on_disconnect() {
    let (transport, handles) = MockTransport::new();
    let telemetry = {
        use ftmsride::session::{Characteristic, Transport};
        transport
            .subscribe(Characteristic::IndoorBikeData)
            .await
            .unwrap()
    };

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    {
        use ftmsride::session::Transport;
        let disconnect_tx = command_tx.clone();
        transport.on_disconnected(Box::new(move || {
            let _ = disconnect_tx.send(SessionCommand::Disconnected);
        }));
    }

    let session =
        SessionOrchestrator::new(transport.clone(), settings(TargetPowerPolicy::EveryTick, 1000));
    let events = session.event_receiver();
    let task = tokio::spawn(session.run(telemetry, command_rx));

    command_tx
        .send(SessionCommand::Start(plan(&[(30, 180)])))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    transport.simulate_disconnect();

    let recording = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("run loop should end")
        .unwrap();

    // Stopped before any telemetry: the timeline is kept but empty
    assert_eq!(recording.map(|r| r.recorded_seconds()), Some(0));
    assert!(
        wait_for_event(&events, |e| matches!(e, SessionEvent::Disconnected))
            .await
            .is_some()
    );
    drop(handles);
}

#[tokio::test]
async fn test_run_loop_ends_when_stream_closes() {
    let (transport, handles) = MockTransport::new();
    let telemetry = {
        use ftmsride::session::{Characteristic, Transport};
        transport
            .subscribe(Characteristic::IndoorBikeData)
            .await
            .unwrap()
    };

    let (_command_tx, command_rx) = mpsc::unbounded_channel();
    let session =
        SessionOrchestrator::new(transport, settings(TargetPowerPolicy::EveryTick, 1000));
    let task = tokio::spawn(session.run(telemetry, command_rx));

    drop(handles);

    let recording = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("run loop should end")
        .unwrap();
    assert!(recording.is_none());
}
