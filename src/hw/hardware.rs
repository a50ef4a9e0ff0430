use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::InteractionError;

/// Write acknowledgement mode for GATT characteristic writes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// One notification pushed by a subscribed characteristic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Notification {
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
}

/// Stream of notifications delivered by an open link.
///
/// Ordering is guaranteed per characteristic only, matching the transport's
/// delivery guarantees.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// A peripheral discovered during a scan.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FoundDevice {
    address: String,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl FoundDevice {
    /// Creates a discovered-device record; the address is normalised to
    /// uppercase so configuration lookups are case-insensitive.
    #[must_use]
    pub fn new(address: impl Into<String>, local_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            address: address.into().to_uppercase(),
            local_name,
            rssi,
        }
    }

    /// Normalised physical address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Advertised local name, if any.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Signal strength observed during the scan.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }
}

/// BLE central: discovers configured peripherals and opens links to them.
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// Scans until one of the given addresses advertises or the timeout
    /// elapses.
    async fn scan_for_any(
        &self,
        addresses: &[String],
        timeout: Duration,
    ) -> Result<Option<FoundDevice>, InteractionError>;

    /// Opens a connection to a previously discovered peripheral.
    async fn connect(&self, device: &FoundDevice)
    -> Result<Box<dyn DeviceLink>, InteractionError>;
}

/// One open GATT connection, exclusively owned by the active supervisor.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Physical address of the connected peripheral.
    fn address(&self) -> &str;

    /// Token cancelled exactly once when the underlying link drops.
    fn disconnected(&self) -> CancellationToken;

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, InteractionError>;

    async fn write(
        &self,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError>;

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), InteractionError>;

    /// Opens the notification stream for this link.
    async fn notifications(&self) -> Result<NotificationStream, InteractionError>;

    /// Tears the connection down, implicitly unsubscribing every
    /// characteristic.
    async fn close(self: Box<Self>) -> Result<(), InteractionError>;
}

/// Creates a central backed by the real `btleplug` transport.
///
/// # Errors
///
/// Returns an error if the platform BLE manager cannot be initialised.
pub async fn real_central() -> Result<Box<dyn BleCentral>, InteractionError> {
    Ok(Box::new(
        super::btleplug_backend::BtleplugCentral::new().await?,
    ))
}
