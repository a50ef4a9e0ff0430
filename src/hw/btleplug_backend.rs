use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::hardware::{
    BleCentral, DeviceLink, FoundDevice, Notification, NotificationStream, WriteMode,
};
use crate::error::InteractionError;

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// BLE central backed by `btleplug`.
pub(crate) struct BtleplugCentral {
    manager: Manager,
}

impl BtleplugCentral {
    pub(crate) async fn new() -> Result<Self, InteractionError> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<Adapter>, InteractionError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(InteractionError::NoAdapters);
        }
        Ok(adapters)
    }

    async fn find_peripheral(
        &self,
        address: &str,
    ) -> Result<Option<(Adapter, Peripheral)>, InteractionError> {
        for adapter in self.adapters().await? {
            for peripheral in adapter.peripherals().await? {
                if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                    return Ok(Some((adapter, peripheral)));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl BleCentral for BtleplugCentral {
    #[instrument(
        skip(self, addresses),
        level = "debug",
        fields(address_count = addresses.len())
    )]
    async fn scan_for_any(
        &self,
        addresses: &[String],
        timeout: Duration,
    ) -> Result<Option<FoundDevice>, InteractionError> {
        let adapters = self.adapters().await?;
        for adapter in &adapters {
            adapter.start_scan(ScanFilter::default()).await?;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let found = 'scan: loop {
            if tokio::time::Instant::now() >= deadline {
                break None;
            }

            for adapter in &adapters {
                for peripheral in adapter.peripherals().await? {
                    let address = peripheral.address().to_string();
                    if !addresses
                        .iter()
                        .any(|candidate| candidate.eq_ignore_ascii_case(&address))
                    {
                        continue;
                    }

                    let properties = peripheral.properties().await?;
                    let (local_name, rssi) = properties
                        .map(|properties| (properties.local_name, properties.rssi))
                        .unwrap_or_default();
                    break 'scan Some(FoundDevice::new(address, local_name, rssi));
                }
            }

            sleep(SCAN_POLL_INTERVAL).await;
        };

        for adapter in &adapters {
            if let Err(error) = adapter.stop_scan().await {
                debug!(?error, "failed to stop adapter scan cleanly");
            }
        }

        if let Some(device) = &found {
            info!(
                address = device.address(),
                local_name = device.local_name(),
                rssi = device.rssi(),
                "matching peripheral advertised"
            );
        }
        Ok(found)
    }

    #[instrument(skip(self, device), level = "debug", fields(address = device.address()))]
    async fn connect(
        &self,
        device: &FoundDevice,
    ) -> Result<Box<dyn DeviceLink>, InteractionError> {
        let Some((adapter, peripheral)) = self.find_peripheral(device.address()).await? else {
            return Err(InteractionError::DeviceVanished {
                address: device.address().to_string(),
            });
        };

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;
        let characteristics = characteristics_by_uuid(&peripheral);

        let disconnected = CancellationToken::new();
        let watcher = tokio::spawn(watch_disconnect(
            adapter,
            peripheral.id(),
            disconnected.clone(),
        ));

        info!(
            address = device.address(),
            characteristic_count = characteristics.len(),
            "connected and discovered services"
        );
        Ok(Box::new(RealDeviceLink {
            address: device.address().to_string(),
            peripheral,
            characteristics,
            disconnected,
            watcher,
        }))
    }
}

/// Cancels the token when the adapter reports the peripheral gone.
///
/// The adapter event stream fires reliably when the link drops, often
/// faster than waiting for the notification stream to close.
async fn watch_disconnect(
    adapter: Adapter,
    peripheral_id: PeripheralId,
    disconnected: CancellationToken,
) {
    match adapter.events().await {
        Ok(mut events) => {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event
                    && id == peripheral_id
                {
                    debug!(?peripheral_id, "adapter reported peripheral disconnected");
                    disconnected.cancel();
                    break;
                }
            }
        }
        Err(error) => {
            warn!(%error, "could not subscribe to adapter events for disconnect watching");
        }
    }
}

fn characteristics_by_uuid(peripheral: &Peripheral) -> HashMap<Uuid, Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .map(|characteristic| (characteristic.uuid, characteristic))
        .collect()
}

/// Open link bound to a real peripheral.
struct RealDeviceLink {
    address: String,
    peripheral: Peripheral,
    characteristics: HashMap<Uuid, Characteristic>,
    disconnected: CancellationToken,
    watcher: tokio::task::JoinHandle<()>,
}

impl RealDeviceLink {
    fn characteristic_for(&self, uuid: Uuid) -> Result<&Characteristic, InteractionError> {
        self.characteristics
            .get(&uuid)
            .ok_or(InteractionError::MissingCharacteristic { uuid })
    }
}

#[async_trait]
impl DeviceLink for RealDeviceLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }

    #[instrument(skip(self), level = "trace", fields(%characteristic))]
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, InteractionError> {
        let characteristic = self.characteristic_for(characteristic)?;
        let payload = self.peripheral.read(characteristic).await?;
        Ok(payload)
    }

    #[instrument(
        skip(self, payload),
        level = "trace",
        fields(%characteristic, ?mode, payload_len = payload.len())
    )]
    async fn write(
        &self,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(characteristic)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral
            .write(characteristic, payload, write_type)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace", fields(%characteristic))]
    async fn subscribe(&self, characteristic: Uuid) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(characteristic)?;
        self.peripheral.subscribe(characteristic).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream, InteractionError> {
        let notifications = self.peripheral.notifications().await?;
        Ok(Box::pin(notifications.map(|notification| {
            trace!(
                characteristic = %notification.uuid,
                payload_len = notification.value.len(),
                "notification received"
            );
            Notification {
                characteristic: notification.uuid,
                payload: notification.value,
            }
        })))
    }

    #[instrument(skip(self), level = "debug", fields(address = %self.address))]
    async fn close(self: Box<Self>) -> Result<(), InteractionError> {
        self.watcher.abort();
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}
