//! Medical floating-point codecs used by standard health BLE profiles.
//!
//! SFLOAT is a 16-bit encoding (12-bit mantissa, 4-bit exponent); the
//! IEEE-11073 FLOAT is its 32-bit sibling (24-bit mantissa, 8-bit exponent).
//! Both fields are two's-complement.

const SFLOAT_EXPONENT_SIGN_THRESHOLD: i32 = 8;
const SFLOAT_EXPONENT_MODULUS: i32 = 16;
const SFLOAT_MANTISSA_SIGN_THRESHOLD: i32 = 0x0800;
const SFLOAT_MANTISSA_MODULUS: i32 = 0x1000;

const FLOAT32_EXPONENT_SIGN_THRESHOLD: i32 = 0x80;
const FLOAT32_EXPONENT_MODULUS: i32 = 0x100;
const FLOAT32_MANTISSA_SIGN_THRESHOLD: i64 = 0x0080_0000;
const FLOAT32_MANTISSA_MODULUS: i64 = 0x0100_0000;

/// Decodes one 16-bit SFLOAT value.
pub(crate) fn sfloat_to_f64(raw: u16) -> f64 {
    let mut exponent = i32::from(raw >> 12);
    if exponent >= SFLOAT_EXPONENT_SIGN_THRESHOLD {
        exponent -= SFLOAT_EXPONENT_MODULUS;
    }

    let mut mantissa = i32::from(raw & 0x0FFF);
    if mantissa >= SFLOAT_MANTISSA_SIGN_THRESHOLD {
        mantissa -= SFLOAT_MANTISSA_MODULUS;
    }

    f64::from(mantissa) * 10f64.powi(exponent)
}

/// Decodes one 32-bit IEEE-11073 float value.
pub(crate) fn ieee11073_to_f64(raw: u32) -> f64 {
    let mut mantissa = i64::from(raw & 0x00FF_FFFF);
    if mantissa >= FLOAT32_MANTISSA_SIGN_THRESHOLD {
        mantissa -= FLOAT32_MANTISSA_MODULUS;
    }

    let mut exponent = i32::from((raw >> 24) as u8);
    if exponent >= FLOAT32_EXPONENT_SIGN_THRESHOLD {
        exponent -= FLOAT32_EXPONENT_MODULUS;
    }

    mantissa as f64 * 10f64.powi(exponent)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0xF059, 8.9)] // mantissa 89, exponent -1
    #[case(0x0059, 89.0)]
    #[case(0x0000, 0.0)]
    #[case(0x07FF, 2047.0)] // largest positive mantissa
    #[case(0x0800, -2048.0)] // mantissa sign-bit boundary
    #[case(0x8001, 1e-8)] // exponent wraps at 8
    #[case(0xFFFF, -0.1)] // mantissa -1, exponent -1
    fn sfloat_decodes_boundary_values(#[case] raw: u16, #[case] expected: f64) {
        let decoded = sfloat_to_f64(raw);
        assert!(
            (decoded - expected).abs() < 1e-12,
            "raw {raw:#06X}: expected {expected}, got {decoded}"
        );
    }

    #[rstest]
    #[case(0xFF00_016D_u32, 36.5)] // mantissa 365, exponent -1
    #[case(0x0000_016D_u32, 365.0)]
    #[case(0xFF00_03DA_u32, 98.6)] // mantissa 986, exponent -1
    #[case(0x0080_0000_u32, -8_388_608.0)] // mantissa sign-bit boundary
    fn ieee11073_decodes_boundary_values(#[case] raw: u32, #[case] expected: f64) {
        let decoded = ieee11073_to_f64(raw);
        assert!(
            (decoded - expected).abs() < 1e-9,
            "raw {raw:#010X}: expected {expected}, got {decoded}"
        );
    }

    #[test]
    fn ieee11073_exponent_wraps_at_threshold() {
        // exponent byte 0x80 means -128
        let raw = 0x8000_0001_u32;
        assert_eq!(1.0 * 10f64.powi(-128), ieee11073_to_f64(raw));
    }
}
