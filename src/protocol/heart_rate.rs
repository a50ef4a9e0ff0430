//! Heart Rate Measurement (`2A37`) decoder.
//!
//! Byte 0 carries flags selecting the layout of the remainder: heart-rate
//! value width, sensor-contact status, an optional energy-expended field
//! (skipped, not surfaced) and optional trailing RR-interval samples.

use crate::error::DecodeError;
use crate::profile::DeviceKind;

use super::Reading;

const FLAG_HR_UINT16: u8 = 0b0000_0001;
const FLAG_ENERGY_EXPENDED: u8 = 0b0000_1000;
const FLAG_RR_PRESENT: u8 = 0b0001_0000;
const CONTACT_STATUS_SHIFT: u8 = 1;
const CONTACT_STATUS_MASK: u8 = 0b11;

const RR_TICKS_PER_SECOND: f64 = 1024.0;

pub(super) fn decode(payload: &[u8]) -> Result<Option<Reading>, DecodeError> {
    let kind = DeviceKind::HeartRate;
    let Some(&flags) = payload.first() else {
        return Err(DecodeError::EmptyPayload { kind });
    };

    let mut offset = 1usize;
    let bpm = if flags & FLAG_HR_UINT16 != 0 {
        let raw = read_u16_le(payload, offset, kind)?;
        offset += 2;
        raw
    } else {
        let raw = read_u8(payload, offset, kind)?;
        offset += 1;
        u16::from(raw)
    };

    // Contact-status values 0 and 1 both mean "contact not detected".
    let contact_bits = (flags >> CONTACT_STATUS_SHIFT) & CONTACT_STATUS_MASK;
    let contact_ok = contact_bits > 1;

    if flags & FLAG_ENERGY_EXPENDED != 0 {
        read_u16_le(payload, offset, kind)?;
        offset += 2;
    }

    let mut rr_intervals_ms = Vec::new();
    if flags & FLAG_RR_PRESENT != 0 {
        while offset < payload.len() {
            let raw = read_u16_le(payload, offset, kind)?;
            offset += 2;
            rr_intervals_ms.push(rr_ticks_to_ms(raw));
        }
    }

    // A zero heart rate is a transient reading from a strap without skin
    // contact; suppress it rather than forward garbage.
    if bpm == 0 {
        return Ok(None);
    }

    Ok(Some(Reading::HeartRate {
        bpm,
        rr_intervals_ms,
        contact_ok,
    }))
}

fn rr_ticks_to_ms(raw: u16) -> u32 {
    let ms = (f64::from(raw) / RR_TICKS_PER_SECOND) * 1000.0;
    ms.round() as u32
}

fn read_u8(payload: &[u8], offset: usize, kind: DeviceKind) -> Result<u8, DecodeError> {
    payload
        .get(offset)
        .copied()
        .ok_or(DecodeError::TruncatedPayload {
            kind,
            expected: offset + 1,
            actual: payload.len(),
        })
}

fn read_u16_le(payload: &[u8], offset: usize, kind: DeviceKind) -> Result<u16, DecodeError> {
    match payload.get(offset..offset + 2) {
        Some([low, high]) => Ok(u16::from_le_bytes([*low, *high])),
        _ => Err(DecodeError::TruncatedPayload {
            kind,
            expected: offset + 2,
            actual: payload.len(),
        }),
    }
}
