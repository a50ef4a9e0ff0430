//! Vendor pulse-oximeter frame decoder.
//!
//! The oximeter multiplexes measurement and telemetry frames over one notify
//! characteristic; only frames opening with the sync marker carry readings.
//! Everything else is silently ignored, never an error.

use crate::error::DecodeError;

use super::Reading;

const FRAME_SYNC: [u8; 2] = [0xFF, 0x44];
const MIN_FRAME_LEN: usize = 6;
const SPO2_INDEX: usize = 4;
const PULSE_INDEX: usize = 5;

pub(super) fn decode(payload: &[u8]) -> Result<Option<Reading>, DecodeError> {
    if payload.len() < MIN_FRAME_LEN || payload[..2] != FRAME_SYNC {
        return Ok(None);
    }

    let spo2_pct = payload[SPO2_INDEX];
    let pulse_bpm = payload[PULSE_INDEX];

    // Zeroes are emitted while the finger clip settles.
    if spo2_pct == 0 || pulse_bpm == 0 {
        return Ok(None);
    }

    Ok(Some(Reading::Oxygen {
        spo2_pct,
        pulse_bpm,
    }))
}
