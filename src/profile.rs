//! Device profiles: what each supported peripheral kind exposes and how a
//! session with it is started.

use std::collections::HashMap;

use serde::Deserialize;
use strum_macros::Display;
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::InteractionError;
use crate::hw::{DeviceLink, WriteMode};
use crate::protocol::Reading;
use crate::supervisor::RetryPolicy;

/// Peripheral families this monitor knows how to talk to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    HeartRate,
    PulseOximeter,
    BloodPressure,
    Thermometer,
}

/// Functional role a configured characteristic plays within a profile.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum CharacteristicRole {
    /// Notifying characteristic carrying measurements.
    Measurement,
    /// Readable battery-level characteristic.
    Battery,
    /// Writable clock-synchronisation characteristic.
    TimeSync,
    /// Writable vendor characteristic that arms the measurement session.
    ControlWrite,
}

/// Delay between subscribing a blood pressure cuff and writing to it. The
/// cuff drops writes that arrive before its notification setup settles.
const BP_SETTLE_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

/// Vendor command that arms a blood pressure measurement session.
const BP_START_COMMAND: [u8; 2] = [0x01, 0x00];

/// Everything known about one configured peripheral.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    kind: DeviceKind,
    address: String,
    characteristics: HashMap<CharacteristicRole, Uuid>,
    items: HashMap<String, String>,
    retry: RetryPolicy,
}

impl DeviceProfile {
    #[must_use]
    pub fn new(
        kind: DeviceKind,
        address: impl Into<String>,
        characteristics: HashMap<CharacteristicRole, Uuid>,
        items: HashMap<String, String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            kind,
            address: address.into().to_uppercase(),
            characteristics,
            items,
            retry,
        }
    }

    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Normalised physical address of the peripheral.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    #[must_use]
    pub fn characteristic(&self, role: CharacteristicRole) -> Option<Uuid> {
        self.characteristics.get(&role).copied()
    }

    /// Sink item bound to one reading field, such as `heart_rate`.
    #[must_use]
    pub fn item(&self, field: &str) -> Option<&str> {
        self.items.get(field).map(String::as_str)
    }

    /// Sink item carrying the ON/OFF reachability state. Validated at
    /// configuration load time.
    #[must_use]
    pub fn status_item(&self) -> &str {
        self.items
            .get("status")
            .map(String::as_str)
            .unwrap_or_default()
    }

    fn required_characteristic(
        &self,
        role: CharacteristicRole,
    ) -> Result<Uuid, InteractionError> {
        self.characteristic(role)
            .ok_or(InteractionError::UnmappedRole {
                kind: self.kind,
                role,
            })
    }

    /// Runs the kind-specific startup sequence on a fresh link, leaving the
    /// measurement characteristic subscribed.
    ///
    /// Returns a battery reading when the profile samples one during startup.
    #[instrument(skip(self, link), level = "debug", fields(kind = %self.kind, address = %self.address))]
    pub async fn start_monitoring(
        &self,
        link: &dyn DeviceLink,
    ) -> Result<Option<Reading>, InteractionError> {
        match self.kind {
            DeviceKind::BloodPressure => {
                self.start_blood_pressure(link).await?;
                Ok(None)
            }
            DeviceKind::HeartRate | DeviceKind::PulseOximeter | DeviceKind::Thermometer => {
                let battery = self.sample_battery(link).await;
                let measurement = self.required_characteristic(CharacteristicRole::Measurement)?;
                link.subscribe(measurement).await?;
                Ok(battery)
            }
        }
    }

    /// One-shot battery sample taken before subscribing. Failure is not
    /// fatal to the session.
    async fn sample_battery(&self, link: &dyn DeviceLink) -> Option<Reading> {
        let battery = self.characteristic(CharacteristicRole::Battery)?;
        match link.read(battery).await {
            Ok(payload) if !payload.is_empty() => {
                Some(Reading::Battery { percent: payload[0] })
            }
            Ok(_) => {
                debug!(address = %self.address, "battery characteristic returned no data");
                None
            }
            Err(error) => {
                warn!(address = %self.address, %error, "battery read failed, continuing without it");
                None
            }
        }
    }

    /// Handshake expected by the blood pressure cuff: subscribe first, then
    /// sync its clock, then arm the session with the vendor command.
    async fn start_blood_pressure(&self, link: &dyn DeviceLink) -> Result<(), InteractionError> {
        let measurement = self.required_characteristic(CharacteristicRole::Measurement)?;
        let time_sync = self.required_characteristic(CharacteristicRole::TimeSync)?;
        let control = self.required_characteristic(CharacteristicRole::ControlWrite)?;

        link.subscribe(measurement).await?;
        sleep(BP_SETTLE_DELAY).await;

        let now = OffsetDateTime::now_utc();
        link.write(time_sync, &current_time_payload(now), WriteMode::WithoutResponse)
            .await?;
        link.write(control, &BP_START_COMMAND, WriteMode::WithResponse)
            .await?;
        debug!(address = %self.address, "measurement session armed");
        Ok(())
    }
}

/// Encodes a timestamp the way the cuff's clock characteristic expects:
/// year as little-endian u16, then month, day, hour, minute, second, the
/// ISO weekday starting at Monday = 1, and two reserved zero bytes.
fn current_time_payload(timestamp: OffsetDateTime) -> [u8; 10] {
    let year = u16::try_from(timestamp.year()).unwrap_or_default();
    let [year_lo, year_hi] = year.to_le_bytes();
    [
        year_lo,
        year_hi,
        u8::from(timestamp.month()),
        timestamp.day(),
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second(),
        timestamp.weekday().number_from_monday(),
        0,
        0,
    ]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn time_payload_packs_fields_little_endian() {
        // Wednesday 2024-03-13 09:41:07
        let payload = current_time_payload(datetime!(2024-03-13 09:41:07 UTC));

        assert_eq!([0xE8, 0x07, 3, 13, 9, 41, 7, 3, 0, 0], payload);
    }

    #[test]
    fn time_payload_weekday_starts_at_monday() {
        let monday = current_time_payload(datetime!(2024-03-11 00:00:00 UTC));
        let sunday = current_time_payload(datetime!(2024-03-17 23:59:59 UTC));

        assert_eq!(1, monday[7]);
        assert_eq!(7, sunday[7]);
    }

    #[test]
    fn kind_renders_kebab_case() {
        assert_eq!("blood-pressure", DeviceKind::BloodPressure.to_string());
        assert_eq!("pulse-oximeter", DeviceKind::PulseOximeter.to_string());
    }
}
