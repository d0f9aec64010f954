/// Bluetooth Low Energy listening and RuuviTag advertisement handoff
use bluer::{AdapterEvent, DeviceEvent, DeviceProperty};
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::{StreamExt, StreamMap};

use crate::bluetooth::decoder::decode;
use crate::config::GatewayConfig;
use crate::models::{MacAddress, Measurement};

// RuuviTag protocol constants
const RUUVITAG_MANUFACTURER_ID: u16 = 0x0499; // Ruuvi Innovations Ltd. manufacturer ID

/// Rebuild the full manufacturer data payload from BlueZ's per-company map entry
///
/// BlueZ strips the 16-bit company identifier from manufacturer data, while
/// the frame decoder expects it in front of the data, little-endian, as it
/// appears in the raw advertisement.
pub fn manufacturer_payload(company_id: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(data.len() + 2);
    payload.extend_from_slice(&company_id.to_le_bytes());
    payload.extend_from_slice(data);
    payload
}

/// Outcome of handing a decoded measurement to the writer
#[derive(Debug, PartialEq, Eq)]
pub enum Handoff {
    Sent,
    Ignored,
    Dropped,
    Closed,
}

/// Decode Ruuvi manufacturer data and pass any measurement to the writer
///
/// # Arguments
/// * `manufacturer_data` - Company ID -> data map as reported by BlueZ
/// * `allowed` - Sensor addresses accepted by this gateway
/// * `sender` - Bounded channel feeding the database writer
///
/// # Returns
/// What happened to the advertisement
pub fn handle_manufacturer_data(
    manufacturer_data: &HashMap<u16, Vec<u8>>,
    allowed: &[MacAddress],
    sender: &mpsc::Sender<Measurement>,
) -> Handoff {
    let Some(data) = manufacturer_data.get(&RUUVITAG_MANUFACTURER_ID) else {
        return Handoff::Ignored;
    };

    let payload = manufacturer_payload(RUUVITAG_MANUFACTURER_ID, data);
    let Some(measurement) = decode(&payload, allowed) else {
        return Handoff::Ignored;
    };

    debug!(
        "Received data from {}: temp={:?}°C, humidity={:?}%, pressure={:?} hPa, seq={:?}",
        measurement.address,
        measurement.temperature,
        measurement.humidity,
        measurement.pressure,
        measurement.measurement_sequence_number
    );

    match sender.try_send(measurement) {
        Ok(()) => Handoff::Sent,
        Err(TrySendError::Full(measurement)) => {
            warn!(
                "Measurement queue full, dropping reading from {}",
                measurement.address
            );
            Handoff::Dropped
        }
        Err(TrySendError::Closed(_)) => Handoff::Closed,
    }
}

/// Listen for RuuviTag advertisements until the writer goes away
///
/// Discovery keeps running for the lifetime of the gateway. Every device the
/// adapter reports gets a property-change stream; each manufacturer data
/// update is decoded and handed to the writer through `sender`.
///
/// # Arguments
/// * `config` - Configuration containing the sensor allow-list
/// * `sender` - Bounded channel feeding the database writer
///
/// # Returns
/// Ok when the writer side of the channel closes, or an error if Bluetooth
/// setup fails
pub async fn listen_for_ruuvitags(
    config: &GatewayConfig,
    sender: mpsc::Sender<Measurement>,
) -> Result<(), Box<dyn std::error::Error>> {
    let allowed = config.allowed_addresses();

    // Initialize Bluetooth session
    let session = match bluer::Session::new().await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create Bluetooth session: {}", e);
            return Err(e.into());
        }
    };

    // Get the default Bluetooth adapter
    let adapter = match session.default_adapter().await {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Failed to get default Bluetooth adapter: {}", e);
            return Err(e.into());
        }
    };

    // Ensure Bluetooth adapter is powered on
    if let Err(e) = adapter.set_powered(true).await {
        error!("Failed to power on adapter: {}", e);
        return Err(e.into());
    }

    // Low Energy only, and report every advertisement, not just changes
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        duplicate_data: true,
        ..Default::default()
    };

    // Apply the discovery filter (warn if it fails, but continue)
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    let device_events = match adapter.discover_devices().await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to start device discovery: {}", e);
            return Err(e.into());
        }
    };
    futures_util::pin_mut!(device_events);
    let mut change_events = StreamMap::new();

    info!(
        "Listening for advertisements from {} RuuviTag(s) on {}",
        allowed.len(),
        adapter.name()
    );

    loop {
        let handoff = tokio::select! {
            event = device_events.next() => {
                match event {
                    Some(AdapterEvent::DeviceAdded(addr)) => {
                        let device = match adapter.device(addr) {
                            Ok(device) => device,
                            Err(e) => {
                                debug!("Failed to open device {}: {}", addr, e);
                                continue;
                            }
                        };

                        match device.events().await {
                            Ok(events) => {
                                change_events.insert(addr, events);
                            }
                            Err(e) => debug!("Failed to subscribe to {}: {}", addr, e),
                        }

                        // The advertisement that made the device appear
                        match device.manufacturer_data().await {
                            Ok(Some(data)) => handle_manufacturer_data(&data, &allowed, &sender),
                            Ok(None) => Handoff::Ignored,
                            Err(e) => {
                                debug!("Failed to get manufacturer data for {}: {}", addr, e);
                                Handoff::Ignored
                            }
                        }
                    }
                    Some(AdapterEvent::DeviceRemoved(addr)) => {
                        trace!("Device {} removed", addr);
                        change_events.remove(&addr);
                        Handoff::Ignored
                    }
                    Some(_) => Handoff::Ignored,
                    None => {
                        warn!("Device discovery stream ended");
                        return Ok(());
                    }
                }
            }
            Some((_, event)) = change_events.next() => {
                match event {
                    DeviceEvent::PropertyChanged(DeviceProperty::ManufacturerData(data)) => {
                        handle_manufacturer_data(&data, &allowed, &sender)
                    }
                    _ => Handoff::Ignored,
                }
            }
        };

        if handoff == Handoff::Closed {
            info!("Measurement writer stopped, ending Bluetooth listener");
            return Ok(());
        }
    }
}
