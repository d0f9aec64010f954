use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use time::OffsetDateTime;

/// Bluetooth hardware address of a sensor, stored as raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacAddressError {
    #[error("expected 6 colon-separated octets, got {0}")]
    OctetCount(usize),
    #[error("invalid hex octet '{0}'")]
    InvalidOctet(String),
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for MacAddress {
    type Err = MacAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.trim().split(':').collect();
        if octets.len() != 6 {
            return Err(MacAddressError::OctetCount(octets.len()));
        }

        let mut bytes = [0u8; 6];
        for (byte, octet) in bytes.iter_mut().zip(octets) {
            if octet.len() != 2 || !octet.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(MacAddressError::InvalidOctet(octet.to_string()));
            }
            *byte = u8::from_str_radix(octet, 16)
                .map_err(|_| MacAddressError::InvalidOctet(octet.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

/// Fields of a data format 5 frame exactly as they appear on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub address: MacAddress,
    pub temperature: i16,
    pub humidity: u16,
    pub pressure: u16,
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
    pub power_info: u16,
    pub movement_count: u8,
    pub measurement_sequence_number: u16,
}

/// A single numeric field value ready for storage
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl FieldValue {
    pub fn as_f64(self) -> f64 {
        match self {
            FieldValue::Float(value) => value,
            FieldValue::Integer(value) => value as f64,
        }
    }
}

/// Calibrated measurement decoded from one advertisement.
///
/// Every channel is optional on its own: a sensor reporting the invalid
/// sentinel for one channel still yields a record for the others.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub address: MacAddress,
    pub timestamp: OffsetDateTime,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub acceleration_x: Option<i64>,
    pub acceleration_y: Option<i64>,
    pub acceleration_z: Option<i64>,
    pub battery_voltage: Option<f64>,
    pub tx_power: Option<i64>,
    pub movement_counter: Option<i64>,
    pub measurement_sequence_number: Option<i64>,
}

pub const FIELD_COUNT: usize = 10;

impl Measurement {
    /// Named field values in storage order, absent channels included as `None`
    pub fn fields(&self) -> [(&'static str, Option<FieldValue>); FIELD_COUNT] {
        let float = |v: Option<f64>| v.map(FieldValue::Float);
        let int = |v: Option<i64>| v.map(FieldValue::Integer);

        [
            ("temperature", float(self.temperature)),
            ("humidity", float(self.humidity)),
            ("pressure", float(self.pressure)),
            ("accelerationX", int(self.acceleration_x)),
            ("accelerationY", int(self.acceleration_y)),
            ("accelerationZ", int(self.acceleration_z)),
            ("batteryVoltage", float(self.battery_voltage)),
            ("txPower", int(self.tx_power)),
            ("movementCounter", int(self.movement_counter)),
            ("measurementSequenceNumber", int(self.measurement_sequence_number)),
        ]
    }
}
