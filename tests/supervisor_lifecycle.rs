//! End-to-end supervisor sessions against the scripted BLE backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vitalink::{
    CharacteristicRole, ConnectionState, DeviceKind, DeviceProfile, DeviceStatus, FakeCentral,
    FakeCentralConfig, FakeOperation, FoundDevice, RecordingSink, RetryPolicy,
    ScriptedNotification, SessionOutcome, SinkEvent, Supervisor, WriteMode,
};

const HR_MEASUREMENT: Uuid = Uuid::from_u128(0x2A37);
const BP_MEASUREMENT: Uuid = Uuid::from_u128(0x2A35);
const BP_TIME_SYNC: Uuid = Uuid::from_u128(0x2A08);
const BP_CONTROL: Uuid = Uuid::from_u128(0xDB5B_55E0);

fn heart_rate_profile(policy: RetryPolicy) -> DeviceProfile {
    DeviceProfile::new(
        DeviceKind::HeartRate,
        "A0:9E:1A:E3:63:A1",
        HashMap::from([(CharacteristicRole::Measurement, HR_MEASUREMENT)]),
        HashMap::from([
            ("status".to_string(), "PolarH10_Status".to_string()),
            ("heart_rate".to_string(), "PolarH10_HeartRate".to_string()),
        ]),
        policy,
    )
}

fn blood_pressure_profile() -> DeviceProfile {
    DeviceProfile::new(
        DeviceKind::BloodPressure,
        "F0:A1:62:ED:E6:A9",
        HashMap::from([
            (CharacteristicRole::Measurement, BP_MEASUREMENT),
            (CharacteristicRole::TimeSync, BP_TIME_SYNC),
            (CharacteristicRole::ControlWrite, BP_CONTROL),
        ]),
        HashMap::from([
            ("status".to_string(), "Cuff_Status".to_string()),
            ("systolic".to_string(), "Cuff_Systolic".to_string()),
            ("diastolic".to_string(), "Cuff_Diastolic".to_string()),
        ]),
        RetryPolicy::blood_pressure(),
    )
}

fn found(profile: &DeviceProfile) -> FoundDevice {
    FoundDevice::new(profile.address(), None, Some(-58))
}

fn status(item: &str, status: DeviceStatus) -> SinkEvent {
    SinkEvent::Status {
        item: item.to_string(),
        status,
    }
}

fn reading(item: &str, value: &str) -> SinkEvent {
    SinkEvent::Reading {
        item: item.to_string(),
        value: value.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn heart_rate_session_forwards_reading_and_brackets_status() {
    let profile = heart_rate_profile(RetryPolicy::single_attempt());
    let device = found(&profile);
    let central = FakeCentral::new(
        FakeCentralConfig::builder()
            .device(device.clone())
            .notifications(vec![ScriptedNotification {
                after: Duration::from_millis(50),
                characteristic: HR_MEASUREMENT,
                // flags 0x00, uint8 rate of 60 bpm
                payload: vec![0x00, 0x3C],
            }])
            .disconnect_after(Duration::from_millis(200))
            .build(),
    );
    let sink = Arc::new(RecordingSink::default());
    let mut supervisor = Supervisor::new(profile, sink.clone());

    let outcome = supervisor
        .run_session(&central, &device, &CancellationToken::new())
        .await;

    assert_eq!(SessionOutcome::Completed, outcome);
    assert_eq!(
        vec![
            status("PolarH10_Status", DeviceStatus::On),
            reading("PolarH10_HeartRate", "60"),
            status("PolarH10_Status", DeviceStatus::Off),
        ],
        sink.events()
    );
    // The supervisor is ready for the next scan pass.
    assert_eq!(ConnectionState::Idle, supervisor.state());
}

#[tokio::test(start_paused = true)]
async fn blood_pressure_session_retries_then_runs_the_handshake() {
    let profile = blood_pressure_profile();
    let device = found(&profile);
    let central = FakeCentral::new(
        FakeCentralConfig::builder()
            .device(device.clone())
            .hanging_connect_attempts(2)
            .notifications(vec![ScriptedNotification {
                after: Duration::from_secs(1),
                characteristic: BP_MEASUREMENT,
                // flags 0x00, 120.0 / 80.0 mmHg
                payload: vec![0x00, 0x78, 0x00, 0x50, 0x00],
            }])
            .disconnect_after(Duration::from_secs(2))
            .build(),
    );
    let sink = Arc::new(RecordingSink::default());
    let mut supervisor = Supervisor::new(profile, sink.clone());

    let outcome = supervisor
        .run_session(&central, &device, &CancellationToken::new())
        .await;

    assert_eq!(SessionOutcome::Completed, outcome);
    assert_eq!(
        vec![
            status("Cuff_Status", DeviceStatus::On),
            reading("Cuff_Systolic", "120.0"),
            reading("Cuff_Diastolic", "80.0"),
            status("Cuff_Status", DeviceStatus::Off),
        ],
        sink.events()
    );

    // Two hung attempts: each costs the 15 s attempt budget plus the 2 s
    // delay before the next try.
    let instants = central.connect_attempt_instants();
    assert_eq!(3, instants.len());
    assert_eq!(Duration::from_secs(17), instants[1] - instants[0]);
    assert_eq!(Duration::from_secs(17), instants[2] - instants[1]);

    // Subscribe settles before the clock sync, which precedes the arm
    // command.
    let operations = central.operations();
    assert_eq!(FakeOperation::Subscribe(BP_MEASUREMENT), operations[0]);
    let writes = central.writes();
    assert_eq!(2, writes.len());
    assert_eq!(BP_TIME_SYNC, writes[0].characteristic);
    assert_eq!(11, writes[0].payload.len());
    assert_eq!(WriteMode::WithoutResponse, writes[0].mode);
    assert_eq!(BP_CONTROL, writes[1].characteristic);
    assert_eq!(vec![0x01, 0x00], writes[1].payload);
    assert_eq!(WriteMode::WithResponse, writes[1].mode);
}

#[tokio::test(start_paused = true)]
async fn session_budget_elapsing_counts_as_completed() {
    let profile = heart_rate_profile(RetryPolicy {
        max_attempts: 1,
        inter_attempt_delay: Duration::ZERO,
        per_attempt_timeout: Duration::from_secs(20),
        session_timeout: Some(Duration::from_secs(3)),
    });
    let device = found(&profile);
    let central = FakeCentral::new(
        FakeCentralConfig::builder()
            .device(device.clone())
            // Keeps the notification stream open well past the budget.
            .notifications(vec![ScriptedNotification {
                after: Duration::from_secs(3600),
                characteristic: HR_MEASUREMENT,
                payload: vec![0x00, 0x3C],
            }])
            .build(),
    );
    let sink = Arc::new(RecordingSink::default());
    let mut supervisor = Supervisor::new(profile, sink.clone());

    let outcome = supervisor
        .run_session(&central, &device, &CancellationToken::new())
        .await;

    assert_eq!(SessionOutcome::Completed, outcome);
    assert_eq!(
        vec![
            status("PolarH10_Status", DeviceStatus::On),
            status("PolarH10_Status", DeviceStatus::Off),
        ],
        sink.events()
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_mark_the_device_off() {
    let profile = blood_pressure_profile();
    let device = found(&profile);
    let central = FakeCentral::new(
        FakeCentralConfig::builder()
            .device(device.clone())
            .hanging_connect_attempts(3)
            .build(),
    );
    let sink = Arc::new(RecordingSink::default());
    let mut supervisor = Supervisor::new(profile, sink.clone());

    let outcome = supervisor
        .run_session(&central, &device, &CancellationToken::new())
        .await;

    assert_eq!(SessionOutcome::RetriesExhausted, outcome);
    assert_eq!(vec![status("Cuff_Status", DeviceStatus::Off)], sink.events());
    assert_eq!(3, central.connect_attempt_instants().len());
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_monitoring_closes_the_session() {
    let profile = heart_rate_profile(RetryPolicy::single_attempt());
    let device = found(&profile);
    let central = FakeCentral::new(
        FakeCentralConfig::builder()
            .device(device.clone())
            .notifications(vec![ScriptedNotification {
                after: Duration::from_secs(3600),
                characteristic: HR_MEASUREMENT,
                payload: vec![0x00, 0x3C],
            }])
            .build(),
    );
    let sink = Arc::new(RecordingSink::default());
    let mut supervisor = Supervisor::new(profile, sink.clone());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            shutdown.cancel();
        });
    }

    let outcome = supervisor.run_session(&central, &device, &shutdown).await;

    assert_eq!(SessionOutcome::ShutdownRequested, outcome);
    assert_eq!(
        vec![
            status("PolarH10_Status", DeviceStatus::On),
            status("PolarH10_Status", DeviceStatus::Off),
        ],
        sink.events()
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_a_hung_connect_attempt() {
    let profile = blood_pressure_profile();
    let device = found(&profile);
    let central = FakeCentral::new(
        FakeCentralConfig::builder()
            .device(device.clone())
            .hanging_connect_attempts(3)
            .build(),
    );
    let sink = Arc::new(RecordingSink::default());
    let mut supervisor = Supervisor::new(profile, sink.clone());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown.cancel();
        });
    }

    let started = tokio::time::Instant::now();
    let outcome = supervisor.run_session(&central, &device, &shutdown).await;

    // Cancellation lands mid-attempt, well inside the 15 s attempt budget.
    assert_eq!(SessionOutcome::ShutdownRequested, outcome);
    assert_eq!(Duration::from_secs(1), started.elapsed());
    assert_eq!(ConnectionState::Idle, supervisor.state());
    assert!(sink.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_the_handshake_settle_skips_the_writes() {
    let profile = blood_pressure_profile();
    let device = found(&profile);
    let central = FakeCentral::new(
        FakeCentralConfig::builder().device(device.clone()).build(),
    );
    let sink = Arc::new(RecordingSink::default());
    let mut supervisor = Supervisor::new(profile, sink.clone());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            // The cuff's post-subscribe settle lasts 500 ms; cancel inside it.
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.cancel();
        });
    }

    let outcome = supervisor.run_session(&central, &device, &shutdown).await;

    assert_eq!(SessionOutcome::ShutdownRequested, outcome);
    // The handshake got as far as the subscribe; neither write was issued.
    assert_eq!(
        vec![FakeOperation::Subscribe(BP_MEASUREMENT)],
        central.operations()
    );
    assert_eq!(ConnectionState::Idle, supervisor.state());
    assert!(sink.events().is_empty());
}
