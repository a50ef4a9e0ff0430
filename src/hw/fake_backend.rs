use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use uuid::Uuid;

use super::hardware::{
    BleCentral, DeviceLink, FoundDevice, Notification, NotificationStream, WriteMode,
};
use crate::error::InteractionError;

/// One scripted notification replayed by the fake link, delayed relative to
/// the previous scripted event.
#[derive(Debug, Clone)]
pub struct ScriptedNotification {
    pub after: Duration,
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
}

/// A write observed by the fake link.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WriteRecord {
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
    pub mode: WriteMode,
}

/// One GATT operation observed by the fake link, in call order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FakeOperation {
    Read(Uuid),
    Write(WriteRecord),
    Subscribe(Uuid),
}

/// Settings for the scripted fake central.
#[derive(Debug, Builder)]
pub struct FakeCentralConfig {
    device: FoundDevice,
    /// Connect attempts that hang until the caller's per-attempt timeout
    /// fires.
    #[builder(default)]
    hanging_connect_attempts: u32,
    /// Notifications replayed once the link's stream is opened.
    #[builder(default)]
    notifications: Vec<ScriptedNotification>,
    /// Drops the link this long after a successful connect.
    disconnect_after: Option<Duration>,
    /// Battery percentage served to characteristic reads.
    battery_level: Option<u8>,
    /// Advertise the device on the first scan only.
    #[builder(default)]
    single_discovery: bool,
}

/// Scripted BLE central used in tests and non-hardware environments.
#[derive(Debug)]
pub struct FakeCentral {
    config: FakeCentralConfig,
    scans: AtomicU32,
    scan_instants: Mutex<Vec<Instant>>,
    connect_attempts: AtomicU32,
    connect_instants: Mutex<Vec<Instant>>,
    operations: Arc<Mutex<Vec<FakeOperation>>>,
}

impl FakeCentral {
    #[must_use]
    pub fn new(config: FakeCentralConfig) -> Self {
        Self {
            config,
            scans: AtomicU32::new(0),
            scan_instants: Mutex::new(Vec::new()),
            connect_attempts: AtomicU32::new(0),
            connect_instants: Mutex::new(Vec::new()),
            operations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// GATT operations observed across every link, in call order.
    #[must_use]
    pub fn operations(&self) -> Vec<FakeOperation> {
        self.operations
            .lock()
            .expect("fake backend lock poisoned")
            .clone()
    }

    /// Writes observed across every link, in call order.
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.operations()
            .into_iter()
            .filter_map(|operation| match operation {
                FakeOperation::Write(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Instants at which connect attempts started, on the (possibly paused)
    /// tokio clock.
    #[must_use]
    pub fn connect_attempt_instants(&self) -> Vec<Instant> {
        self.connect_instants
            .lock()
            .expect("fake backend lock poisoned")
            .clone()
    }

    /// Instants at which scan passes started, on the (possibly paused)
    /// tokio clock.
    #[must_use]
    pub fn scan_instants(&self) -> Vec<Instant> {
        self.scan_instants
            .lock()
            .expect("fake backend lock poisoned")
            .clone()
    }
}

#[async_trait]
impl BleCentral for FakeCentral {
    async fn scan_for_any(
        &self,
        addresses: &[String],
        _timeout: Duration,
    ) -> Result<Option<FoundDevice>, InteractionError> {
        self.scan_instants
            .lock()
            .expect("fake backend lock poisoned")
            .push(Instant::now());

        let scan = self.scans.fetch_add(1, Ordering::SeqCst);
        if self.config.single_discovery && scan > 0 {
            return Ok(None);
        }

        let advertised = addresses
            .iter()
            .any(|address| address.eq_ignore_ascii_case(self.config.device.address()));
        Ok(advertised.then(|| self.config.device.clone()))
    }

    async fn connect(
        &self,
        _device: &FoundDevice,
    ) -> Result<Box<dyn DeviceLink>, InteractionError> {
        self.connect_instants
            .lock()
            .expect("fake backend lock poisoned")
            .push(Instant::now());

        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.config.hanging_connect_attempts {
            trace!(attempt, "scripted connect hang");
            std::future::pending::<()>().await;
        }

        let disconnected = CancellationToken::new();
        if let Some(delay) = self.config.disconnect_after {
            let token = disconnected.clone();
            tokio::spawn(async move {
                sleep(delay).await;
                token.cancel();
            });
        }

        Ok(Box::new(FakeLink {
            address: self.config.device.address().to_string(),
            battery_level: self.config.battery_level,
            notifications: self.config.notifications.clone(),
            disconnected,
            operations: Arc::clone(&self.operations),
        }))
    }
}

#[derive(Debug)]
struct FakeLink {
    address: String,
    battery_level: Option<u8>,
    notifications: Vec<ScriptedNotification>,
    disconnected: CancellationToken,
    operations: Arc<Mutex<Vec<FakeOperation>>>,
}

impl FakeLink {
    fn record(&self, operation: FakeOperation) {
        self.operations
            .lock()
            .expect("fake backend lock poisoned")
            .push(operation);
    }
}

#[async_trait]
impl DeviceLink for FakeLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, InteractionError> {
        self.record(FakeOperation::Read(characteristic));
        Ok(self.battery_level.map(|level| vec![level]).unwrap_or_default())
    }

    async fn write(
        &self,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError> {
        self.record(FakeOperation::Write(WriteRecord {
            characteristic,
            payload: payload.to_vec(),
            mode,
        }));
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), InteractionError> {
        self.record(FakeOperation::Subscribe(characteristic));
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream, InteractionError> {
        let (tx, rx) = mpsc::channel(16);
        let script = self.notifications.clone();
        tokio::spawn(async move {
            for scripted in script {
                sleep(scripted.after).await;
                let notification = Notification {
                    characteristic: scripted.characteristic,
                    payload: scripted.payload,
                };
                if tx.send(notification).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn close(self: Box<Self>) -> Result<(), InteractionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn fixture_device() -> FoundDevice {
        FoundDevice::new("F0:A1:62:ED:E6:A9", Some("BLESmart".to_string()), Some(-55))
    }

    #[tokio::test]
    async fn scan_matches_configured_address_case_insensitively() {
        let central = FakeCentral::new(
            FakeCentralConfig::builder().device(fixture_device()).build(),
        );

        let found = central
            .scan_for_any(&["f0:a1:62:ed:e6:a9".to_string()], Duration::from_secs(5))
            .await
            .expect("fake scan never fails");

        assert_eq!(Some(fixture_device()), found);
    }

    #[tokio::test]
    async fn scan_misses_unconfigured_addresses() {
        let central = FakeCentral::new(
            FakeCentralConfig::builder().device(fixture_device()).build(),
        );

        let found = central
            .scan_for_any(&["AA:BB:CC:DD:EE:FF".to_string()], Duration::from_secs(5))
            .await
            .expect("fake scan never fails");

        assert_eq!(None, found);
    }

    #[tokio::test]
    async fn single_discovery_advertises_only_once() {
        let central = FakeCentral::new(
            FakeCentralConfig::builder()
                .device(fixture_device())
                .single_discovery(true)
                .build(),
        );
        let addresses = vec![fixture_device().address().to_string()];

        let first = central
            .scan_for_any(&addresses, Duration::from_secs(5))
            .await
            .expect("fake scan never fails");
        let second = central
            .scan_for_any(&addresses, Duration::from_secs(5))
            .await
            .expect("fake scan never fails");

        assert_eq!(Some(fixture_device()), first);
        assert_eq!(None, second);
    }

    #[tokio::test]
    async fn link_records_operations_in_call_order() {
        let central = FakeCentral::new(
            FakeCentralConfig::builder()
                .device(fixture_device())
                .battery_level(87)
                .build(),
        );
        let measurement = Uuid::from_u128(0x2A37);

        let link = central
            .connect(&fixture_device())
            .await
            .expect("fake connect should succeed");
        link.subscribe(measurement).await.expect("fake subscribe");
        let battery = link.read(measurement).await.expect("fake read");
        link.close().await.expect("fake close");

        assert_eq!(vec![87], battery);
        assert_eq!(
            vec![
                FakeOperation::Subscribe(measurement),
                FakeOperation::Read(measurement),
            ],
            central.operations()
        );
    }
}
