/// Database operations for storing RuuviTag measurements
use time::OffsetDateTime;

use crate::config::RetryPolicy;
use crate::database::connection::execute_with_retry;
use crate::models::Measurement;

/// Measurement name every point is written under
pub const MEASUREMENT_TABLE: &str = "ruuvi_measurements";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS ruuvi_measurements (
    time TIMESTAMPTZ NOT NULL,
    mac TEXT NOT NULL,
    name TEXT,
    field TEXT NOT NULL,
    value DOUBLE PRECISION NOT NULL
);
CREATE INDEX IF NOT EXISTS ruuvi_measurements_mac_time_idx
    ON ruuvi_measurements (mac, time DESC);";

const INSERT_ROW: &str =
    "INSERT INTO ruuvi_measurements(time, mac, name, field, value) VALUES ($1, $2, $3, $4, $5)";

/// One stored field of a measurement point
#[derive(Debug, Clone, PartialEq)]
pub struct PointRow {
    pub time: OffsetDateTime,
    pub mac: String,
    pub name: Option<String>,
    pub field: &'static str,
    pub value: f64,
}

/// Flatten a measurement into one row per present field
///
/// The point is tagged with the sensor address (and configured name) and
/// stamped with the decode time; absent channels produce no row.
pub fn measurement_rows(measurement: &Measurement, name: Option<&str>) -> Vec<PointRow> {
    let mac = measurement.address.to_string();

    measurement
        .fields()
        .into_iter()
        .filter_map(|(field, value)| {
            value.map(|value| PointRow {
                time: measurement.timestamp,
                mac: mac.clone(),
                name: name.map(str::to_string),
                field,
                value: value.as_f64(),
            })
        })
        .collect()
}

/// Create the measurement table and its index if they do not exist yet
pub async fn ensure_schema(database_url: &str, retry: &RetryPolicy) -> Result<(), String> {
    execute_with_retry(database_url, retry, |client| async move {
        client.batch_execute(CREATE_TABLE).await.map(|_| 0u64)
    })
    .await
    .map(|_| ())
}

/// Store a batch of measurement rows in a single transaction
///
/// # Arguments
/// * `rows` - Rows produced by `measurement_rows`
/// * `database_url` - PostgreSQL connection string
/// * `retry` - Attempts and delay for transient failures
///
/// # Returns
/// Number of rows inserted
pub async fn store_rows(
    rows: &[PointRow],
    database_url: &str,
    retry: &RetryPolicy,
) -> Result<u64, String> {
    if rows.is_empty() {
        return Ok(0);
    }

    // Clone data for move into async closure
    let rows = rows.to_vec();

    execute_with_retry(database_url, retry, move |mut client| {
        let rows = rows.clone();
        async move {
            let transaction = client.transaction().await?;
            let statement = transaction.prepare(INSERT_ROW).await?;

            let mut inserted = 0;
            for row in &rows {
                inserted += transaction
                    .execute(
                        &statement,
                        &[&row.time, &row.mac, &row.name, &row.field, &row.value],
                    )
                    .await?;
            }

            transaction.commit().await?;
            Ok::<u64, tokio_postgres::Error>(inserted)
        }
    })
    .await
}
