/// Batching writer that drains decoded measurements into the database
use log::{debug, error, info, warn};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::GatewayConfig;
use crate::database::operations::{
    ensure_schema, measurement_rows, store_rows, PointRow, MEASUREMENT_TABLE,
};
use crate::models::Measurement;
use crate::utils::format_datetime;

/// Buffered rows waiting for the next flush
#[derive(Debug, Default)]
pub struct Batch {
    rows: Vec<PointRow>,
    measurements: usize,
}

impl Batch {
    pub fn push(&mut self, measurement: &Measurement, name: Option<&str>) {
        self.rows.extend(measurement_rows(measurement, name));
        self.measurements += 1;
    }

    pub fn len(&self) -> usize {
        self.measurements
    }

    pub fn is_empty(&self) -> bool {
        self.measurements == 0
    }

    /// Hand over the buffered rows, leaving the batch empty
    pub fn take(&mut self) -> Vec<PointRow> {
        self.measurements = 0;
        std::mem::take(&mut self.rows)
    }
}

async fn flush(batch: &mut Batch, config: &GatewayConfig) {
    if batch.is_empty() {
        return;
    }

    let measurements = batch.len();
    let rows = batch.take();
    match store_rows(&rows, &config.database_url, &config.retry).await {
        Ok(inserted) => info!(
            "Stored {} measurements ({} rows) in {} at {}",
            measurements,
            inserted,
            MEASUREMENT_TABLE,
            format_datetime(&OffsetDateTime::now_utc())
        ),
        Err(e) => error!(
            "Failed to store {} measurements, dropping batch: {}",
            measurements, e
        ),
    }
}

/// Receive measurements until the channel closes, flushing on a timer
///
/// A batch is written when the flush interval elapses or when it reaches the
/// configured size. Whatever is buffered when the channel closes is flushed
/// before returning.
pub async fn run_writer(mut receiver: mpsc::Receiver<Measurement>, config: GatewayConfig) {
    if let Err(e) = ensure_schema(&config.database_url, &config.retry).await {
        warn!("Could not prepare {} table: {}", MEASUREMENT_TABLE, e);
    }

    let mut ticker = interval_at(Instant::now() + config.flush_interval, config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut batch = Batch::default();

    loop {
        tokio::select! {
            received = receiver.recv() => {
                match received {
                    Some(measurement) => {
                        batch.push(&measurement, config.tag_name(&measurement.address));
                        if batch.len() >= config.batch_size {
                            debug!("Batch size {} reached, flushing early", config.batch_size);
                            flush(&mut batch, &config).await;
                        }
                    }
                    None => {
                        info!("Measurement channel closed, writing remaining data");
                        flush(&mut batch, &config).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&mut batch, &config).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MacAddress;

    fn measurement(sequence: i64) -> Measurement {
        Measurement {
            address: MacAddress([0xCB, 0xB8, 0x33, 0x4C, 0x88, 0x4F]),
            timestamp: OffsetDateTime::UNIX_EPOCH,
            temperature: Some(21.0),
            humidity: Some(40.5),
            pressure: None,
            acceleration_x: None,
            acceleration_y: None,
            acceleration_z: None,
            battery_voltage: None,
            tx_power: None,
            movement_counter: None,
            measurement_sequence_number: Some(sequence),
        }
    }

    #[test]
    fn batch_counts_measurements_not_rows() {
        let mut batch = Batch::default();
        assert!(batch.is_empty());

        batch.push(&measurement(1), Some("Sauna"));
        batch.push(&measurement(2), None);
        assert_eq!(batch.len(), 2);

        let rows = batch.take();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].name.as_deref(), Some("Sauna"));
        assert_eq!(rows[5].field, "measurementSequenceNumber");
        assert_eq!(rows[5].value, 2.0);

        assert!(batch.is_empty());
        assert!(batch.take().is_empty());
    }
}
