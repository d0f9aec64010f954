/// RuuviTag data format 5 (RAWv2) frame validation and decoding
use log::trace;
use time::OffsetDateTime;

use crate::bluetooth::convert::calibrate;
use crate::models::{MacAddress, Measurement, RawFrame};

/// Manufacturer data prefix: Ruuvi company ID 0x0499 (little-endian) + format 5
pub const FRAME_PREFIX: [u8; 3] = [0x99, 0x04, 0x05];
/// Size of the big-endian field block following the prefix
pub const FIELD_BLOCK_SIZE: usize = 17;
pub const ADDRESS_SIZE: usize = 6;
pub const FRAME_SIZE: usize = FRAME_PREFIX.len() + FIELD_BLOCK_SIZE + ADDRESS_SIZE;

const FIELD_OFFSET: usize = FRAME_PREFIX.len();
const ADDRESS_OFFSET: usize = FIELD_OFFSET + FIELD_BLOCK_SIZE;

/// Validate a manufacturer data payload and unpack its raw fields
///
/// Layout (26 bytes, multi-byte values big-endian):
/// - Bytes 0-2: Prefix `99 04 05`
/// - Bytes 3-4: Temperature (i16)
/// - Bytes 5-6: Humidity (u16)
/// - Bytes 7-8: Pressure (u16)
/// - Bytes 9-14: Acceleration X, Y, Z (i16 each)
/// - Bytes 15-16: Power info (u16, 11 bits battery + 5 bits TX power)
/// - Byte 17: Movement counter (u8)
/// - Bytes 18-19: Measurement sequence number (u16)
/// - Bytes 20-25: MAC address
///
/// # Arguments
/// * `data` - Manufacturer data including the company ID bytes
/// * `allowed` - Addresses this gateway accepts; an empty list accepts nothing
///
/// # Returns
/// Some(RawFrame) for a recognised frame from an allowed sensor, None otherwise
pub fn decode_frame(data: &[u8], allowed: &[MacAddress]) -> Option<RawFrame> {
    if data.len() != FRAME_SIZE || !data.starts_with(&FRAME_PREFIX) {
        trace!("Ignoring foreign frame: len={}", data.len());
        return None;
    }

    let mut address = [0u8; ADDRESS_SIZE];
    address.copy_from_slice(&data[ADDRESS_OFFSET..FRAME_SIZE]);
    let address = MacAddress(address);

    if !allowed.contains(&address) {
        trace!("Ignoring frame from unlisted sensor {}", address);
        return None;
    }

    let block = &data[FIELD_OFFSET..ADDRESS_OFFSET];
    let u16_at = |i: usize| u16::from_be_bytes([block[i], block[i + 1]]);
    let i16_at = |i: usize| i16::from_be_bytes([block[i], block[i + 1]]);

    Some(RawFrame {
        address,
        temperature: i16_at(0),
        humidity: u16_at(2),
        pressure: u16_at(4),
        accel_x: i16_at(6),
        accel_y: i16_at(8),
        accel_z: i16_at(10),
        power_info: u16_at(12),
        movement_count: block[14],
        measurement_sequence_number: u16_at(15),
    })
}

/// Decode a payload into a calibrated measurement stamped with the current time
pub fn decode(data: &[u8], allowed: &[MacAddress]) -> Option<Measurement> {
    decode_frame(data, allowed).map(|raw| calibrate(&raw, OffsetDateTime::now_utc()))
}
