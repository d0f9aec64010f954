/// Raw-to-physical unit conversion for RuuviTag data format 5 fields
///
/// Each channel is described by a scale, an offset and the raw value the
/// sensor reserves for "not available". The sentinel is compared against the
/// raw wire value before any scaling takes place.
///
/// Decimal rounding works on the exact decimal expansion of the computed
/// double, so a product stored slightly above a tie rounds up. Exact ties and
/// integer rounding go to even.
use crate::models::{Measurement, RawFrame};
use time::OffsetDateTime;

/// Generic "invalid" sentinel for signed 16-bit channels
pub const INT16_INVALID: i64 = i16::MIN as i64;
/// "Invalid" sentinel for unsigned 16-bit channels
pub const UINT16_INVALID: i64 = u16::MAX as i64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub scale: f64,
    pub offset: f64,
    pub invalid: i64,
}

impl Calibration {
    pub const fn new(scale: f64, offset: f64, invalid: i64) -> Self {
        Calibration {
            scale,
            offset,
            invalid,
        }
    }
}

pub const TEMPERATURE: Calibration = Calibration::new(0.005, 0.0, INT16_INVALID);
pub const HUMIDITY: Calibration = Calibration::new(0.0025, 0.0, UINT16_INVALID);
pub const PRESSURE: Calibration = Calibration::new(0.01, 500.0, UINT16_INVALID);
pub const ACCELERATION: Calibration = Calibration::new(1.0, 0.0, INT16_INVALID);
pub const BATTERY_VOLTAGE: Calibration = Calibration::new(0.001, 1.6, 0x7FF);
pub const TX_POWER: Calibration = Calibration::new(2.0, -40.0, 0x1F);
pub const MOVEMENT_COUNTER: Calibration = Calibration::new(1.0, 0.0, 0xFF);
pub const SEQUENCE_NUMBER: Calibration = Calibration::new(1.0, 0.0, UINT16_INVALID);

fn apply(raw: i64, scale: f64, offset: f64, invalid: i64) -> Option<f64> {
    if raw == invalid {
        return None;
    }
    Some(raw as f64 * scale + offset)
}

/// Number of decimal digits matching the resolution of `scale`.
///
/// 0.005 → 3, 0.01 → 2, 1.0 → 0, 2.0 → 0.
pub fn decimal_digits(scale: f64) -> i32 {
    (-scale.log10()).ceil() as i32
}

/// Round `value` to `digits` decimal places
///
/// Non-negative digit counts round the exact decimal value of `value`;
/// scaling by a power of ten first would turn 0.0025000000000000000052
/// into an exact 2.5 and lose the direction.
pub fn round_to_digits(value: f64, digits: i32) -> f64 {
    if digits >= 0 {
        format!("{:.*}", digits as usize, value)
            .parse()
            .unwrap_or(value)
    } else {
        let factor = 10f64.powi(-digits);
        (value / factor).round_ties_even() * factor
    }
}

/// Convert a raw value to a float rounded to the resolution of `scale`
pub fn convert(raw: i64, scale: f64, offset: f64, invalid: i64) -> Option<f64> {
    apply(raw, scale, offset, invalid).map(|value| round_to_digits(value, decimal_digits(scale)))
}

/// Convert a raw value to the nearest integer
pub fn convert_int(raw: i64, scale: f64, offset: f64, invalid: i64) -> Option<i64> {
    apply(raw, scale, offset, invalid).map(|value| value.round_ties_even() as i64)
}

fn float_field(raw: i64, calibration: Calibration) -> Option<f64> {
    convert(raw, calibration.scale, calibration.offset, calibration.invalid)
}

fn int_field(raw: i64, calibration: Calibration) -> Option<i64> {
    convert_int(raw, calibration.scale, calibration.offset, calibration.invalid)
}

/// Battery voltage bits: the upper 11 bits of `power_info`
pub fn battery_bits(power_info: u16) -> i64 {
    i64::from(power_info >> 5)
}

/// TX power bits: the lower 5 bits of `power_info`
pub fn tx_power_bits(power_info: u16) -> i64 {
    i64::from(power_info & 0x1F)
}

/// Calibrate every channel of a validated frame, stamping it with `timestamp`
pub fn calibrate(raw: &RawFrame, timestamp: OffsetDateTime) -> Measurement {
    Measurement {
        address: raw.address,
        timestamp,
        temperature: float_field(raw.temperature.into(), TEMPERATURE),
        humidity: float_field(raw.humidity.into(), HUMIDITY),
        pressure: float_field(raw.pressure.into(), PRESSURE),
        acceleration_x: int_field(raw.accel_x.into(), ACCELERATION),
        acceleration_y: int_field(raw.accel_y.into(), ACCELERATION),
        acceleration_z: int_field(raw.accel_z.into(), ACCELERATION),
        battery_voltage: float_field(battery_bits(raw.power_info), BATTERY_VOLTAGE),
        tx_power: int_field(tx_power_bits(raw.power_info), TX_POWER),
        movement_counter: int_field(raw.movement_count.into(), MOVEMENT_COUNTER),
        measurement_sequence_number: int_field(
            raw.measurement_sequence_number.into(),
            SEQUENCE_NUMBER,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_digits_follow_scale_resolution() {
        assert_eq!(decimal_digits(0.005), 3);
        assert_eq!(decimal_digits(0.0025), 3);
        assert_eq!(decimal_digits(0.01), 2);
        assert_eq!(decimal_digits(0.001), 3);
        assert_eq!(decimal_digits(1.0), 0);
        assert_eq!(decimal_digits(2.0), 0);
        assert_eq!(decimal_digits(20.0), -1);
    }

    #[test]
    fn temperature_is_rounded_to_three_digits() {
        assert_eq!(float_field(250, TEMPERATURE), Some(1.25));
        assert_eq!(float_field(4321, TEMPERATURE), Some(21.605));
        assert_eq!(float_field(-3200, TEMPERATURE), Some(-16.0));
        assert_eq!(float_field(32767, TEMPERATURE), Some(163.835));
        assert_eq!(float_field(-32767, TEMPERATURE), Some(-163.835));
    }

    #[test]
    fn humidity_boundaries() {
        assert_eq!(float_field(0, HUMIDITY), Some(0.0));
        assert_eq!(float_field(65534, HUMIDITY), Some(163.835));
        assert_eq!(float_field(65535, HUMIDITY), None);
    }

    #[test]
    fn humidity_rounds_from_exact_decimal_value() {
        // 1 * 0.0025 is stored just above 0.0025, 3 * 0.0025 just below 0.0075
        assert_eq!(float_field(1, HUMIDITY), Some(0.003));
        assert_eq!(float_field(3, HUMIDITY), Some(0.007));
        assert_eq!(float_field(5, HUMIDITY), Some(0.013));
        assert_eq!(float_field(20001, HUMIDITY), Some(50.002));
    }

    #[test]
    fn non_negative_digits_round_decimal_places() {
        assert_eq!(round_to_digits(2.3839999999999995, 3), 2.384);
        assert_eq!(round_to_digits(1013.2549, 2), 1013.25);
        assert_eq!(round_to_digits(-0.0126, 3), -0.013);
        assert_eq!(round_to_digits(7.6, 0), 8.0);
    }

    #[test]
    fn pressure_carries_offset() {
        assert_eq!(float_field(0, PRESSURE), Some(500.0));
        assert_eq!(float_field(51325, PRESSURE), Some(1013.25));
        assert_eq!(float_field(65534, PRESSURE), Some(1155.34));
        assert_eq!(float_field(65535, PRESSURE), None);
    }

    #[test]
    fn acceleration_passes_through() {
        assert_eq!(int_field(-1000, ACCELERATION), Some(-1000));
        assert_eq!(int_field(32767, ACCELERATION), Some(32767));
        assert_eq!(int_field(-32767, ACCELERATION), Some(-32767));
        assert_eq!(int_field(-32768, ACCELERATION), None);
    }

    #[test]
    fn power_info_splits_into_battery_and_tx_power() {
        let power_info: u16 = 0b1100011_00010;
        assert_eq!(power_info, 25106);
        assert_eq!(tx_power_bits(power_info), 2);
        assert_eq!(battery_bits(power_info), 784);
        assert_eq!(int_field(tx_power_bits(power_info), TX_POWER), Some(-36));
        assert_eq!(
            float_field(battery_bits(power_info), BATTERY_VOLTAGE),
            Some(2.384)
        );
    }

    #[test]
    fn power_info_sentinels() {
        assert_eq!(int_field(tx_power_bits(0xFFFF), TX_POWER), None);
        assert_eq!(float_field(battery_bits(0xFFFF), BATTERY_VOLTAGE), None);
        assert_eq!(int_field(tx_power_bits(0x001E), TX_POWER), Some(20));
        assert_eq!(float_field(battery_bits(0xFFE0), BATTERY_VOLTAGE), None);
        assert_eq!(float_field(battery_bits(0xFFC0), BATTERY_VOLTAGE), Some(3.646));
        assert_eq!(int_field(tx_power_bits(0xFFC0), TX_POWER), Some(-40));
    }

    #[test]
    fn counters_and_sequence_numbers() {
        assert_eq!(int_field(0, MOVEMENT_COUNTER), Some(0));
        assert_eq!(int_field(254, MOVEMENT_COUNTER), Some(254));
        assert_eq!(int_field(255, MOVEMENT_COUNTER), None);
        assert_eq!(int_field(65534, SEQUENCE_NUMBER), Some(65534));
        assert_eq!(int_field(65535, SEQUENCE_NUMBER), None);
    }

    #[test]
    fn sentinel_is_checked_on_raw_value() {
        // 0.0 * scale + offset is a valid result, only the raw sentinel is absent
        assert_eq!(convert(0, 0.01, 500.0, 65535), Some(500.0));
        assert_eq!(convert(65535, 0.01, 500.0, 65535), None);
        assert_eq!(convert_int(31, 2.0, -40.0, 31), None);
    }

    #[test]
    fn integer_rounding_is_half_to_even() {
        assert_eq!(convert_int(1, 0.5, 0.0, INT16_INVALID), Some(0));
        assert_eq!(convert_int(3, 0.5, 0.0, INT16_INVALID), Some(2));
        assert_eq!(convert_int(5, 0.5, 0.0, INT16_INVALID), Some(2));
        assert_eq!(convert_int(-3, 0.5, 0.0, INT16_INVALID), Some(-2));
        assert_eq!(convert_int(7, 0.4, 0.0, INT16_INVALID), Some(3));
    }

    #[test]
    fn negative_digits_round_to_tens() {
        assert_eq!(round_to_digits(1234.0, -1), 1230.0);
        assert_eq!(round_to_digits(1235.0, -1), 1240.0);
        assert_eq!(convert(6, 20.0, 0.0, INT16_INVALID), Some(120.0));
    }
}
