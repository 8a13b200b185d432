use log::{info, warn};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DEVICE: &str = "F5:6C:BE:D5:61:47";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REFRESH_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// MAC address of the Aranet4
    pub device: String,
    /// PostgreSQL connection string; samples are kept in memory when unset
    pub database_url: Option<String>,
    /// Upper bound on the wait for one parameter's history stream
    pub fetch_timeout: Duration,
    /// Attempts per refresh cycle before giving up until the next tick
    pub refresh_retries: u32,
    /// Where to write a CSV export after each refresh
    pub csv_export: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from a variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let device = lookup("ARANET4_DEVICE")
            .map(|s| s.trim().to_uppercase())
            .unwrap_or_else(|| DEFAULT_DEVICE.to_string());

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if database_url.is_none() {
            warn!("DATABASE_URL not set, samples will only be kept in memory");
        }

        let fetch_timeout = match lookup("ARANET4_FETCH_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .map_err(|e| format!("invalid ARANET4_FETCH_TIMEOUT_SECS {:?}: {}", raw, e))?,
            ),
            None => Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        };

        let refresh_retries = match lookup("ARANET4_REFRESH_RETRIES") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| format!("invalid ARANET4_REFRESH_RETRIES {:?}: {}", raw, e))?,
            None => DEFAULT_REFRESH_RETRIES,
        };

        let csv_export = lookup("ARANET4_CSV_EXPORT")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let config = ServiceConfig {
            device,
            database_url,
            fetch_timeout,
            refresh_retries,
            csv_export,
        };
        config.validate()?;

        info!("Aranet4 device: {}", config.device);
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.device.parse::<bluer::Address>().is_err() {
            return Err(format!("Invalid ARANET4_DEVICE address: {}", self.device).into());
        }
        if self.fetch_timeout.is_zero() {
            return Err("ARANET4_FETCH_TIMEOUT_SECS must be greater than 0".into());
        }
        if self.refresh_retries == 0 {
            return Err("ARANET4_REFRESH_RETRIES must be greater than 0".into());
        }
        Ok(())
    }
}
