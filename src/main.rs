mod bluetooth;
mod config;
mod database;
mod error;
mod export;
mod models;
mod utils;

use log::{error, info, warn};
use tokio::time::{interval, Duration, MissedTickBehavior};

use bluetooth::{Aranet4, BluezTransport};
use config::ServiceConfig;
use database::{MemoryBackend, PostgresBackend, SampleStore};
use export::export_csv;
use models::Sample;
use utils::{format_timestamp, to_std_duration};

const MIN_REFRESH_SECS: u64 = 10; // Floor for the refresh period if the device reports none

/// Logger at info level unless `RUST_LOG` directives say otherwise
fn logger(rust_log: Option<&str>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log::LevelFilter::Info);
    if let Some(directives) = rust_log {
        builder.parse_filters(directives);
    }
    builder
}

/// Connect to the device and download its history and current reading
async fn fetch(config: &ServiceConfig) -> error::Result<(Vec<Sample>, Sample)> {
    let transport = BluezTransport::connect(&config.device).await?;
    let mut device = Aranet4::new(transport, config.fetch_timeout);

    let result = async {
        let history = device.read_history().await?;
        let current = device.read_current().await?;
        Ok::<_, error::Error>((history, current))
    }
    .await;

    // Disconnect on every path, a failed disconnect only matters if the fetch worked
    let disconnected = device.into_transport().disconnect().await;
    let fetched = result?;
    disconnected?;
    Ok(fetched)
}

/// One refresh cycle: download, merge into the store, export
///
/// Retries the whole cycle immediately up to the configured bound.
async fn refresh(config: &ServiceConfig, store: &SampleStore) {
    for attempt in 1..=config.refresh_retries {
        info!("Refreshing from {} (attempt {}/{})", config.device, attempt, config.refresh_retries);

        let (history, current) = match fetch(config).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(
                    "Refresh attempt {}/{} failed: {}",
                    attempt, config.refresh_retries, e
                );
                continue;
            }
        };

        match store.merge(history).await {
            Ok(written) => {
                if let Some(last) = store.last().await {
                    info!(
                        "Stored {} new samples, newest at {}",
                        written,
                        format_timestamp(&last.time)
                    );
                }
            }
            Err(e) => {
                error!("Failed to store samples: {}", e);
                continue;
            }
        }

        if let Some(path) = &config.csv_export {
            match store.rows().await {
                Ok(rows) => match export_csv(path, &rows) {
                    Ok(()) => info!("Exported {} samples to {}", rows.len(), path.display()),
                    Err(e) => error!("Failed to export CSV to {}: {}", path.display(), e),
                },
                Err(e) => error!("Failed to read samples for export: {}", e),
            }
        }

        // Print summary
        info!("Current reading:");
        for line in current.to_string().lines() {
            info!("  {}", line);
        }
        return;
    }

    error!(
        "Giving up after {} attempts, retrying on the next tick",
        config.refresh_retries
    );
}

/// Sampling interval of the device, which is also the refresh period
async fn refresh_period(config: &ServiceConfig) -> error::Result<Duration> {
    let transport = BluezTransport::connect(&config.device).await?;
    let device = Aranet4::new(transport, config.fetch_timeout);

    let name = device.name().await;
    let version = device.version().await;
    let period = device.interval().await;
    device.into_transport().disconnect().await?;

    match name {
        Ok(Some(name)) => info!("Device name: {}", name),
        Ok(None) => info!("Device name: unknown"),
        Err(e) => warn!("Could not read device name: {}", e),
    }
    match version {
        Ok(version) => info!("Device version: {}", version),
        Err(e) => warn!("Could not read device version: {}", e),
    }

    let period = to_std_duration(period?);
    Ok(period.max(Duration::from_secs(MIN_REFRESH_SECS)))
}

async fn main_loop(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Aranet4 data collection service");

    let store = match &config.database_url {
        Some(url) => SampleStore::open(Box::new(PostgresBackend::open(url).await?)).await?,
        None => SampleStore::open(Box::new(MemoryBackend::new())).await?,
    };

    let mut period = None;
    for attempt in 1..=config.refresh_retries {
        match refresh_period(&config).await {
            Ok(p) => {
                period = Some(p);
                break;
            }
            Err(e) => warn!(
                "Could not read sampling interval (attempt {}/{}): {}",
                attempt, config.refresh_retries, e
            ),
        }
    }
    let period = period.ok_or("could not read sampling interval from device")?;
    info!("Refresh period: {} seconds", period.as_secs());

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        info!("Tick: {}", format_timestamp(&time::OffsetDateTime::now_utc()));
        refresh(&config, &store).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let rust_log = std::env::var("RUST_LOG").ok();
    logger(rust_log.as_deref()).format_timestamp_secs().init();

    // Load configuration
    let config = match ServiceConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => {
                // Keep the sender alive so the service is not mistaken for shut down
                error!("Failed to listen for Ctrl+C: {}", e);
                let _tx = tx;
                std::future::pending::<()>().await;
            }
        }
    });

    // Run main loop or wait for shutdown signal
    tokio::select! {
        result = main_loop(config) => {
            match result {
                Ok(_) => info!("Program completed successfully"),
                Err(e) => error!("Fatal error: {}", e),
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
