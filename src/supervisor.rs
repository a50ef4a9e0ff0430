//! Per-device connection supervisor: drives one peripheral through its
//! connect, subscribe and monitor lifecycle, and forwards what it hears to
//! the telemetry sink.

use std::sync::Arc;
use std::time::Duration;

use strum_macros::Display;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::InteractionError;
use crate::hw::{BleCentral, DeviceLink, FoundDevice, Notification, NotificationStream};
use crate::profile::{CharacteristicRole, DeviceKind, DeviceProfile};
use crate::protocol::{self, Reading};
use crate::sink::{DeviceStatus, TelemetrySink};

/// Sink item field carrying the timestamp of the most recent reading.
const LAST_USE_FIELD: &str = "last_use";

/// Lifecycle position of one supervised peripheral.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Subscribing,
    Monitoring,
    Disconnected,
    Failed,
}

/// How a finished session ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionOutcome {
    /// The device disconnected, the stream closed or the session budget
    /// elapsed. All are normal for episodic devices.
    Completed,
    /// Every connect attempt failed.
    RetriesExhausted,
    /// Shutdown was requested while the session was active.
    ShutdownRequested,
}

/// Connect retry behaviour for one device kind.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub inter_attempt_delay: Duration,
    pub per_attempt_timeout: Duration,
    /// Budget for the whole connected session; `None` monitors until the
    /// link drops.
    pub session_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

    /// Streaming devices reconnect on the next scan pass, so one attempt
    /// is enough.
    #[must_use]
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            inter_attempt_delay: Duration::ZERO,
            per_attempt_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            session_timeout: None,
        }
    }

    /// The blood pressure cuff advertises for a short window after a
    /// measurement and drops the first connect attempt now and then, so it
    /// gets retries and a bounded session.
    #[must_use]
    pub fn blood_pressure() -> Self {
        Self {
            max_attempts: 3,
            inter_attempt_delay: Duration::from_secs(2),
            per_attempt_timeout: Duration::from_secs(15),
            session_timeout: Some(Duration::from_secs(60)),
        }
    }

    #[must_use]
    pub fn for_kind(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::BloodPressure => Self::blood_pressure(),
            DeviceKind::HeartRate | DeviceKind::PulseOximeter | DeviceKind::Thermometer => {
                Self::single_attempt()
            }
        }
    }
}

/// Supervises one configured peripheral across its whole lifecycle.
pub struct Supervisor {
    profile: DeviceProfile,
    sink: Arc<dyn TelemetrySink>,
    state: ConnectionState,
    last_status: Option<DeviceStatus>,
}

impl Supervisor {
    #[must_use]
    pub fn new(profile: DeviceProfile, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            profile,
            sink,
            state: ConnectionState::Idle,
            last_status: None,
        }
    }

    #[must_use]
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(
                address = %self.profile.address(),
                from = %self.state,
                to = %next,
                "state transition"
            );
            self.state = next;
        }
    }

    /// Pushes the reachability status, skipping pushes that would repeat the
    /// last observed value.
    async fn push_status(&mut self, status: DeviceStatus) {
        if self.last_status == Some(status) {
            return;
        }
        self.last_status = Some(status);
        let item = self.profile.status_item().to_string();
        if let Err(error) = self.sink.push_status(&item, status).await {
            warn!(%item, %status, %error, "status push failed");
        }
    }

    /// Marks the device as being looked for by an active scan pass.
    pub fn mark_scanning(&mut self) {
        self.set_state(ConnectionState::Scanning);
    }

    /// Marks the device unreachable after a scan pass that never saw it.
    pub async fn mark_unreachable(&mut self) {
        self.set_state(ConnectionState::Idle);
        self.push_status(DeviceStatus::Off).await;
    }

    /// Runs one full session against a freshly discovered peripheral.
    #[instrument(
        skip(self, central, device, shutdown),
        level = "info",
        fields(kind = %self.profile.kind(), address = %self.profile.address())
    )]
    pub async fn run_session(
        &mut self,
        central: &dyn BleCentral,
        device: &FoundDevice,
        shutdown: &CancellationToken,
    ) -> SessionOutcome {
        let policy = self.profile.retry_policy().clone();
        for attempt in 1..=policy.max_attempts {
            if attempt > 1 {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        self.set_state(ConnectionState::Idle);
                        return SessionOutcome::ShutdownRequested;
                    }
                    () = tokio::time::sleep(policy.inter_attempt_delay) => {}
                }
            }

            self.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                () = shutdown.cancelled() => {
                    info!(address = %self.profile.address(), "shutdown requested while connecting");
                    self.set_state(ConnectionState::Idle);
                    return SessionOutcome::ShutdownRequested;
                }
                connected = tokio::time::timeout(policy.per_attempt_timeout, central.connect(device)) => {
                    connected
                }
            };
            let link = match connected {
                Ok(Ok(link)) => link,
                Ok(Err(error)) => {
                    warn!(attempt, %error, "connect attempt failed");
                    self.set_state(ConnectionState::Failed);
                    continue;
                }
                Err(_elapsed) => {
                    let error = InteractionError::ConnectTimeout {
                        timeout: policy.per_attempt_timeout,
                    };
                    warn!(attempt, %error, "connect attempt timed out");
                    self.set_state(ConnectionState::Failed);
                    continue;
                }
            };

            match self.run_connected(link, &policy, shutdown).await {
                Ok(outcome) => {
                    self.set_state(ConnectionState::Idle);
                    return outcome;
                }
                Err(error) => {
                    warn!(attempt, %error, "session startup failed");
                    self.set_state(ConnectionState::Failed);
                }
            }
        }

        warn!(
            attempts = policy.max_attempts,
            "exhausted connect attempts, giving up until the next scan pass"
        );
        self.push_status(DeviceStatus::Off).await;
        self.set_state(ConnectionState::Idle);
        SessionOutcome::RetriesExhausted
    }

    async fn run_connected(
        &mut self,
        link: Box<dyn DeviceLink>,
        policy: &RetryPolicy,
        shutdown: &CancellationToken,
    ) -> Result<SessionOutcome, InteractionError> {
        self.set_state(ConnectionState::Subscribing);
        let disconnected = link.disconnected();
        // The stream is opened before the startup sequence so notifications
        // raced against the subscribe acknowledgement are not lost.
        let mut stream = link.notifications().await?;
        // The startup sequence suspends on GATT writes and the handshake
        // settle delay; shutdown must stay observable across all of them.
        let startup = tokio::select! {
            () = shutdown.cancelled() => StartupWait::ShutdownRequested,
            startup = self.profile.start_monitoring(link.as_ref()) => {
                StartupWait::Finished(startup)
            }
        };
        let startup_reading = match startup {
            StartupWait::ShutdownRequested => {
                info!(address = %self.profile.address(), "shutdown requested during session startup");
                if let Err(error) = link.close().await {
                    debug!(%error, "teardown after interrupted startup");
                }
                self.set_state(ConnectionState::Idle);
                return Ok(SessionOutcome::ShutdownRequested);
            }
            StartupWait::Finished(Ok(reading)) => reading,
            StartupWait::Finished(Err(error)) => {
                if let Err(close_error) = link.close().await {
                    debug!(%close_error, "teardown after failed startup");
                }
                return Err(error);
            }
        };

        self.set_state(ConnectionState::Monitoring);
        self.push_status(DeviceStatus::On).await;
        if let Some(reading) = startup_reading {
            self.forward_reading(&reading).await;
        }

        let outcome = self
            .monitor(&mut stream, &disconnected, policy, shutdown)
            .await;

        drop(stream);
        if let Err(error) = link.close().await {
            debug!(%error, "link teardown failed");
        }
        self.set_state(ConnectionState::Disconnected);
        self.push_status(DeviceStatus::Off).await;
        Ok(outcome)
    }

    async fn monitor(
        &mut self,
        stream: &mut NotificationStream,
        disconnected: &CancellationToken,
        policy: &RetryPolicy,
        shutdown: &CancellationToken,
    ) -> SessionOutcome {
        let session_deadline = policy
            .session_timeout
            .map(|budget| tokio::time::Instant::now() + budget);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!(address = %self.profile.address(), "shutdown requested, closing session");
                    break SessionOutcome::ShutdownRequested;
                }
                () = disconnected.cancelled() => {
                    info!(address = %self.profile.address(), "peripheral disconnected");
                    break SessionOutcome::Completed;
                }
                () = session_budget(session_deadline) => {
                    debug!(address = %self.profile.address(), "session budget elapsed");
                    break SessionOutcome::Completed;
                }
                notification = stream.next() => match notification {
                    Some(notification) => self.handle_notification(notification).await,
                    None => {
                        debug!(address = %self.profile.address(), "notification stream closed");
                        break SessionOutcome::Completed;
                    }
                }
            }
        }
    }

    async fn handle_notification(&mut self, notification: Notification) {
        let measurement = self.profile.characteristic(CharacteristicRole::Measurement);
        if measurement != Some(notification.characteristic) {
            trace!(
                characteristic = %notification.characteristic,
                "ignoring notification from unmapped characteristic"
            );
            return;
        }

        match protocol::decode(self.profile.kind(), &notification.payload) {
            Ok(Some(reading)) => {
                info!(
                    address = %self.profile.address(),
                    ?reading,
                    "measurement decoded"
                );
                self.forward_reading(&reading).await;
            }
            Ok(None) => {
                trace!(
                    address = %self.profile.address(),
                    payload = hex::encode(&notification.payload),
                    "notification carried no usable measurement"
                );
            }
            Err(error) => {
                warn!(
                    address = %self.profile.address(),
                    payload = hex::encode(&notification.payload),
                    %error,
                    "undecodable notification"
                );
            }
        }
    }

    /// Pushes every mapped field of the reading, then stamps the last-use
    /// item when one is configured.
    async fn forward_reading(&mut self, reading: &Reading) {
        for (field, value) in reading.sink_fields() {
            let Some(item) = self.profile.item(field) else {
                debug!(field, "reading field has no configured item");
                continue;
            };
            let item = item.to_string();
            if let Err(error) = self.sink.push_reading(&item, &value).await {
                warn!(%item, %value, %error, "reading push failed");
            }
        }

        if let Some(item) = self.profile.item(LAST_USE_FIELD) {
            let item = item.to_string();
            let now = OffsetDateTime::now_utc();
            match now.format(&Rfc3339) {
                Ok(timestamp) => {
                    if let Err(error) = self.sink.push_reading(&item, &timestamp).await {
                        warn!(%item, %error, "last-use push failed");
                    }
                }
                Err(error) => warn!(%error, "could not format last-use timestamp"),
            }
        }
    }
}

/// Outcome of racing the startup sequence against the shutdown token.
enum StartupWait {
    ShutdownRequested,
    Finished(Result<Option<Reading>, InteractionError>),
}

/// Resolves when the session deadline passes; pends forever without one.
async fn session_budget(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
