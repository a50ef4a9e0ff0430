//! Health Thermometer Measurement (`2A1C`) decoder.

use crate::error::DecodeError;
use crate::profile::DeviceKind;

use super::Reading;
use super::medfloat::ieee11073_to_f64;

const FLAG_FAHRENHEIT: u8 = 0b0000_0001;
const MIN_PAYLOAD_LEN: usize = 5;

pub(super) fn decode(payload: &[u8]) -> Result<Option<Reading>, DecodeError> {
    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::TruncatedPayload {
            kind: DeviceKind::Thermometer,
            expected: MIN_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let flags = payload[0];
    let raw = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
    let mut celsius = ieee11073_to_f64(raw);
    if flags & FLAG_FAHRENHEIT != 0 {
        celsius = (celsius - 32.0) * 5.0 / 9.0;
    }

    Ok(Some(Reading::Temperature { celsius }))
}
