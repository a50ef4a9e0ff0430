use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::profile::{CharacteristicRole, DeviceKind};

/// Errors returned by BLE interaction operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("device `{address}` was no longer visible when connecting")]
    DeviceVanished { address: String },
    #[error(
        "connection attempt timed out after {}",
        humantime::format_duration(*timeout)
    )]
    ConnectTimeout { timeout: Duration },
    #[error("characteristic `{uuid}` was not found on the connected device")]
    MissingCharacteristic { uuid: Uuid },
    #[error("{kind} profile has no UUID mapped for the `{role}` role")]
    UnmappedRole {
        kind: DeviceKind,
        role: CharacteristicRole,
    },
}

/// Errors returned while decoding measurement payloads.
///
/// Decode errors are per-packet: the packet is logged and dropped, never
/// escalated into a session failure.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("{kind} payload was empty")]
    EmptyPayload { kind: DeviceKind },
    #[error("{kind} payload was truncated: needed {expected} bytes, got {actual}")]
    TruncatedPayload {
        kind: DeviceKind,
        expected: usize,
        actual: usize,
    },
}

/// Errors raised while loading or validating the static configuration.
///
/// These are the only errors allowed to terminate the process, and only at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file `{path}`")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration")]
    Parse(#[from] serde_json::Error),
    #[error("no devices are configured")]
    NoDevices,
    #[error("device address `{address}` is configured more than once")]
    DuplicateAddress { address: String },
    #[error("device address `{address}` is not a valid MAC address")]
    InvalidAddress { address: String },
    #[error("{kind} profile is missing the `{role}` characteristic mapping")]
    MissingCharacteristic {
        kind: DeviceKind,
        role: CharacteristicRole,
    },
    #[error("{kind} profile is missing the `status` sink item")]
    MissingStatusItem { kind: DeviceKind },
}

/// Errors returned by the telemetry sink adapter.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink request failed")]
    Http(#[from] reqwest::Error),
    #[error("sink rejected the update for `{item}` with HTTP status {status}")]
    Rejected { item: String, status: u16 },
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
