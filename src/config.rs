//! Static configuration: devices to supervise, characteristic mappings,
//! sink endpoint and scan cadence. Loaded once at startup; any validation
//! failure is fatal.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::profile::{CharacteristicRole, DeviceKind, DeviceProfile};
use crate::supervisor::RetryPolicy;

const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub sink: SinkConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    pub devices: Vec<DeviceConfig>,
}

/// Telemetry sink endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "duration_str"
    )]
    pub request_timeout: Duration,
}

/// Scan cadence settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanConfig {
    #[serde(default = "default_scan_timeout", deserialize_with = "duration_str")]
    pub scan_timeout: Duration,
    #[serde(default = "default_poll_interval", deserialize_with = "duration_str")]
    pub poll_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// One supervised peripheral.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub kind: DeviceKind,
    pub address: String,
    pub characteristics: HashMap<CharacteristicRole, Uuid>,
    pub items: HashMap<String, String>,
    #[serde(default)]
    pub retry: Option<RetryOverride>,
}

/// Partial retry settings layered over the kind's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryOverride {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default, deserialize_with = "opt_duration_str")]
    pub inter_attempt_delay: Option<Duration>,
    #[serde(default, deserialize_with = "opt_duration_str")]
    pub per_attempt_timeout: Option<Duration>,
    #[serde(default, deserialize_with = "opt_duration_str")]
    pub session_timeout: Option<Duration>,
}

impl RetryOverride {
    fn apply(&self, mut policy: RetryPolicy) -> RetryPolicy {
        if let Some(max_attempts) = self.max_attempts {
            policy.max_attempts = max_attempts;
        }
        if let Some(delay) = self.inter_attempt_delay {
            policy.inter_attempt_delay = delay;
        }
        if let Some(timeout) = self.per_attempt_timeout {
            policy.per_attempt_timeout = timeout;
        }
        if let Some(budget) = self.session_timeout {
            policy.session_timeout = Some(budget);
        }
        policy
    }
}

impl Config {
    /// Loads and validates the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, parsed or validated.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parses and validates a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be parsed or validated.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !is_valid_mac(&device.address) {
                return Err(ConfigError::InvalidAddress {
                    address: device.address.clone(),
                });
            }
            if !seen.insert(device.address.to_uppercase()) {
                return Err(ConfigError::DuplicateAddress {
                    address: device.address.clone(),
                });
            }

            for role in device.required_roles() {
                if !device.characteristics.contains_key(&role) {
                    return Err(ConfigError::MissingCharacteristic {
                        kind: device.kind,
                        role,
                    });
                }
            }

            if !device.items.contains_key("status") {
                return Err(ConfigError::MissingStatusItem { kind: device.kind });
            }
        }
        Ok(())
    }

    /// Builds the runtime profile for every configured device.
    #[must_use]
    pub fn device_profiles(&self) -> Vec<DeviceProfile> {
        self.devices
            .iter()
            .map(|device| {
                let mut policy = RetryPolicy::for_kind(device.kind);
                if let Some(retry) = &device.retry {
                    policy = retry.apply(policy);
                }
                DeviceProfile::new(
                    device.kind,
                    device.address.clone(),
                    device.characteristics.clone(),
                    device.items.clone(),
                    policy,
                )
            })
            .collect()
    }
}

impl DeviceConfig {
    fn required_roles(&self) -> Vec<CharacteristicRole> {
        match self.kind {
            DeviceKind::BloodPressure => vec![
                CharacteristicRole::Measurement,
                CharacteristicRole::TimeSync,
                CharacteristicRole::ControlWrite,
            ],
            DeviceKind::HeartRate | DeviceKind::PulseOximeter | DeviceKind::Thermometer => {
                vec![CharacteristicRole::Measurement]
            }
        }
    }
}

/// Six colon-separated pairs of hex digits.
fn is_valid_mac(address: &str) -> bool {
    let groups: Vec<&str> = address.split(':').collect();
    groups.len() == 6
        && groups
            .iter()
            .all(|group| group.len() == 2 && group.chars().all(|c| c.is_ascii_hexdigit()))
}

fn default_scan_timeout() -> Duration {
    DEFAULT_SCAN_TIMEOUT
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn duration_str<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

fn opt_duration_str<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = Option::<String>::deserialize(deserializer)?;
    text.map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
        .transpose()
}
