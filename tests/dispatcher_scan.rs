//! Dispatcher scan-pass behaviour against the scripted BLE backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vitalink::{
    BleCentral, CharacteristicRole, DeviceKind, DeviceLink, DeviceProfile, DeviceStatus,
    Dispatcher, FakeCentral, FakeCentralConfig, FoundDevice, InteractionError, RecordingSink,
    RetryPolicy, ScriptedNotification, SinkEvent, Supervisor,
};

const HR_MEASUREMENT: Uuid = Uuid::from_u128(0x2A37);

fn heart_rate_profile() -> DeviceProfile {
    DeviceProfile::new(
        DeviceKind::HeartRate,
        "A0:9E:1A:E3:63:A1",
        HashMap::from([(CharacteristicRole::Measurement, HR_MEASUREMENT)]),
        HashMap::from([
            ("status".to_string(), "PolarH10_Status".to_string()),
            ("heart_rate".to_string(), "PolarH10_HeartRate".to_string()),
        ]),
        RetryPolicy::single_attempt(),
    )
}

/// Delegating central so scan timing stays observable after the dispatcher
/// takes ownership.
struct SharedCentral(Arc<FakeCentral>);

#[async_trait::async_trait]
impl BleCentral for SharedCentral {
    async fn scan_for_any(
        &self,
        addresses: &[String],
        timeout: Duration,
    ) -> Result<Option<FoundDevice>, InteractionError> {
        self.0.scan_for_any(addresses, timeout).await
    }

    async fn connect(
        &self,
        device: &FoundDevice,
    ) -> Result<Box<dyn DeviceLink>, InteractionError> {
        self.0.connect(device).await
    }
}

fn cancel_after(delay: Duration) -> CancellationToken {
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shutdown.cancel();
        });
    }
    shutdown
}

#[tokio::test(start_paused = true)]
async fn repeated_scan_misses_push_off_exactly_once() {
    // The fake advertises a device no supervisor is configured for.
    let central = FakeCentral::new(
        FakeCentralConfig::builder()
            .device(FoundDevice::new("FF:FF:FF:FF:FF:FF", None, None))
            .build(),
    );
    let sink = Arc::new(RecordingSink::default());
    let supervisors = vec![Supervisor::new(heart_rate_profile(), sink.clone())];
    let mut dispatcher = Dispatcher::new(
        Box::new(central),
        supervisors,
        Duration::from_secs(5),
        Duration::from_millis(100),
    );

    dispatcher.run(cancel_after(Duration::from_secs(2))).await;

    assert_eq!(
        vec![SinkEvent::Status {
            item: "PolarH10_Status".to_string(),
            status: DeviceStatus::Off,
        }],
        sink.events()
    );
}

#[tokio::test(start_paused = true)]
async fn discovery_runs_a_session_then_settles_back_to_off() {
    let profile = heart_rate_profile();
    let central = FakeCentral::new(
        FakeCentralConfig::builder()
            .device(FoundDevice::new(profile.address(), None, Some(-61)))
            .single_discovery(true)
            .notifications(vec![ScriptedNotification {
                after: Duration::from_millis(10),
                characteristic: HR_MEASUREMENT,
                // flags 0x00, uint8 rate of 80 bpm
                payload: vec![0x00, 0x50],
            }])
            .disconnect_after(Duration::from_millis(50))
            .build(),
    );
    let sink = Arc::new(RecordingSink::default());
    let supervisors = vec![Supervisor::new(profile, sink.clone())];
    let mut dispatcher = Dispatcher::new(
        Box::new(central),
        supervisors,
        Duration::from_secs(5),
        Duration::from_millis(200),
    );

    dispatcher.run(cancel_after(Duration::from_secs(2))).await;

    assert_eq!(
        vec![
            SinkEvent::Status {
                item: "PolarH10_Status".to_string(),
                status: DeviceStatus::On,
            },
            SinkEvent::Reading {
                item: "PolarH10_HeartRate".to_string(),
                value: "80".to_string(),
            },
            SinkEvent::Status {
                item: "PolarH10_Status".to_string(),
                status: DeviceStatus::Off,
            },
        ],
        sink.events()
    );
}

#[tokio::test(start_paused = true)]
async fn session_end_resumes_scanning_without_poll_delay() {
    let profile = heart_rate_profile();
    let central = Arc::new(FakeCentral::new(
        FakeCentralConfig::builder()
            .device(FoundDevice::new(profile.address(), None, Some(-61)))
            .single_discovery(true)
            .notifications(vec![ScriptedNotification {
                after: Duration::from_millis(10),
                characteristic: HR_MEASUREMENT,
                payload: vec![0x00, 0x50],
            }])
            .disconnect_after(Duration::from_millis(50))
            .build(),
    ));
    let sink = Arc::new(RecordingSink::default());
    let supervisors = vec![Supervisor::new(profile, sink)];
    let mut dispatcher = Dispatcher::new(
        Box::new(SharedCentral(Arc::clone(&central))),
        supervisors,
        Duration::from_secs(5),
        Duration::from_millis(200),
    );

    dispatcher
        .run(cancel_after(Duration::from_millis(400)))
        .await;

    // The session runs 50 ms and the next pass starts the moment it ends;
    // only the pass after the miss waits out the poll interval.
    let instants = central.scan_instants();
    assert_eq!(3, instants.len());
    assert_eq!(Duration::from_millis(50), instants[1] - instants[0]);
    assert_eq!(Duration::from_millis(200), instants[2] - instants[1]);
}
