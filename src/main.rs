mod bluetooth;
mod config;
mod database;
mod models;
mod utils;

use log::{error, info};
use time::OffsetDateTime;
use tokio::sync::mpsc;

use bluetooth::listen_for_ruuvitags;
use config::GatewayConfig;
use database::run_writer;
use utils::format_datetime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match GatewayConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    info!(
        "Starting RuuviTag gateway at {}",
        format_datetime(&OffsetDateTime::now_utc())
    );

    // Bounded handoff between the Bluetooth listener and the database writer
    let (sender, receiver) = mpsc::channel(config.channel_capacity);
    let writer = tokio::spawn(run_writer(receiver, config.clone()));

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            // Keep the sender alive so the listener is not cancelled
            std::future::pending::<()>().await;
        }
        let _ = tx.send(());
    });

    // Run the listener or wait for shutdown signal; either way the sender is
    // dropped here, which lets the writer flush and finish
    tokio::select! {
        result = listen_for_ruuvitags(&config, sender) => {
            match result {
                Ok(_) => info!("Bluetooth listener finished"),
                Err(e) => error!("Fatal error: {}", e),
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    if let Err(e) = writer.await {
        error!("Database writer failed: {}", e);
    }

    Ok(())
}
