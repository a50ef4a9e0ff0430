mod blood_pressure;
mod heart_rate;
pub(crate) mod medfloat;
mod oximeter;
mod thermometer;

use crate::error::DecodeError;
use crate::profile::DeviceKind;

/// One decoded measurement.
///
/// Readings are ephemeral: produced from a single notification, forwarded to
/// the sink, then discarded. Nothing in the core buffers them.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    HeartRate {
        bpm: u16,
        rr_intervals_ms: Vec<u32>,
        contact_ok: bool,
    },
    Oxygen {
        spo2_pct: u8,
        pulse_bpm: u8,
    },
    BloodPressure {
        systolic_mmhg: f64,
        diastolic_mmhg: f64,
    },
    Temperature {
        celsius: f64,
    },
    Battery {
        percent: u8,
    },
}

impl Reading {
    /// Sink field values keyed by the configuration item keys.
    #[must_use]
    pub fn sink_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::HeartRate { bpm, .. } => vec![("heart_rate", bpm.to_string())],
            Self::Oxygen {
                spo2_pct,
                pulse_bpm,
            } => vec![
                ("spo2", spo2_pct.to_string()),
                ("pulse", pulse_bpm.to_string()),
            ],
            Self::BloodPressure {
                systolic_mmhg,
                diastolic_mmhg,
            } => vec![
                ("systolic", format!("{systolic_mmhg:.1}")),
                ("diastolic", format!("{diastolic_mmhg:.1}")),
            ],
            Self::Temperature { celsius } => vec![("temperature", format!("{celsius:.1}"))],
            Self::Battery { percent } => vec![("battery", percent.to_string())],
        }
    }
}

/// Decodes one measurement notification for the given device kind.
///
/// `Ok(None)` means the payload was a transient or non-measurement frame and
/// is silently dropped; `Err` means the payload was malformed.
///
/// # Errors
///
/// Returns an error when the payload is empty or truncated.
pub fn decode(kind: DeviceKind, payload: &[u8]) -> Result<Option<Reading>, DecodeError> {
    match kind {
        DeviceKind::HeartRate => heart_rate::decode(payload),
        DeviceKind::PulseOximeter => oximeter::decode(payload),
        DeviceKind::BloodPressure => blood_pressure::decode(payload),
        DeviceKind::Thermometer => thermometer::decode(payload),
    }
}
