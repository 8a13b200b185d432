/// Aranet4 protocol facade: current readings, metadata and history assembly
use log::{debug, info};
use std::time::Duration as StdDuration;
use time::{Duration, OffsetDateTime};

use crate::bluetooth::decoder::FieldDecoder;
use crate::bluetooth::history::read_param;
use crate::bluetooth::transport::Transport;
use crate::bluetooth::uuids::{
    DEVICE_INFO_SERVICE, DEVICE_INFO_SW_REVISION, DEVICE_SERVICE, READ_ALL, READ_INTERVAL,
    READ_SECONDS_SINCE_UPDATE, READ_TOTAL_READINGS,
};
use crate::error::{DecodeError, Result};
use crate::models::{Param, Quality, Sample};
use crate::utils::whole_seconds;

pub struct Aranet4<T> {
    transport: T,
    fetch_timeout: StdDuration,
}

impl<T: Transport> Aranet4<T> {
    /// Wrap a connected transport. `fetch_timeout` bounds the wait for each
    /// parameter's history stream.
    pub fn new(transport: T, fetch_timeout: StdDuration) -> Self {
        Aranet4 {
            transport,
            fetch_timeout,
        }
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub async fn name(&self) -> Result<Option<String>> {
        self.transport.device_name().await
    }

    /// Software revision string reported by the device
    pub async fn version(&self) -> Result<String> {
        let raw = self
            .transport
            .read_characteristic(DEVICE_INFO_SERVICE, DEVICE_INFO_SW_REVISION)
            .await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Read the current measurement from the all-fields characteristic
    ///
    /// Layout: CO2, temperature, pressure, humidity, battery, quality,
    /// interval, seconds since the measurement.
    pub async fn read_current(&self) -> Result<Sample> {
        let raw = self
            .transport
            .read_characteristic(DEVICE_SERVICE, READ_ALL)
            .await?;
        Ok(decode_current(&raw, whole_seconds(OffsetDateTime::now_utc()))?)
    }

    /// Number of samples stored on the device
    pub async fn num_readings(&self) -> Result<usize> {
        let raw = self
            .transport
            .read_characteristic(DEVICE_SERVICE, READ_TOTAL_READINGS)
            .await?;
        let mut dec = FieldDecoder::new(&raw);
        Ok(usize::from(dec.read_u16()?))
    }

    /// Time elapsed since the newest stored sample
    pub async fn since(&self) -> Result<Duration> {
        self.read_duration(READ_SECONDS_SINCE_UPDATE).await
    }

    /// Sampling interval
    pub async fn interval(&self) -> Result<Duration> {
        self.read_duration(READ_INTERVAL).await
    }

    async fn read_duration(&self, characteristic: bluer::Uuid) -> Result<Duration> {
        let raw = self
            .transport
            .read_characteristic(DEVICE_SERVICE, characteristic)
            .await?;
        Ok(FieldDecoder::new(&raw).read_interval()?)
    }

    /// Download the full sample history, oldest first
    ///
    /// Takes the device exclusively: history pages of concurrent downloads
    /// would share one notification stream.
    pub async fn read_history(&mut self) -> Result<Vec<Sample>> {
        self.read_history_at(whole_seconds(OffsetDateTime::now_utc()))
            .await
    }

    /// Download the full sample history, resolving timestamps against `now`
    ///
    /// Any failing parameter aborts the whole download.
    pub async fn read_history_at(&mut self, now: OffsetDateTime) -> Result<Vec<Sample>> {
        let ago = self.since().await?;
        let delta = self.interval().await?;
        let n = self.num_readings().await?;
        info!(
            "Downloading {} samples (interval {}, last update {} ago)",
            n, delta, ago
        );

        let mut samples = vec![Sample::default(); n];
        for param in Param::ALL {
            samples = read_param(&self.transport, param, samples, self.fetch_timeout).await?;
        }

        stamp_history(&mut samples, now, ago, delta);
        debug!("Assembled {} history samples", samples.len());
        Ok(samples)
    }
}

/// Decode an all-fields payload, resolving its "seconds ago" field against `now`.
pub fn decode_current(raw: &[u8], now: OffsetDateTime) -> std::result::Result<Sample, DecodeError> {
    let mut dec = FieldDecoder::new(raw);
    let co2 = dec.read_co2().unwrap_or_default();
    let temperature = dec.read_temperature().unwrap_or_default();
    let pressure = dec.read_pressure().unwrap_or_default();
    let humidity = dec.read_humidity().unwrap_or_default();
    let battery = dec.read_battery().unwrap_or_default();
    // The device's own quality class is superseded by the CO2 thresholds
    let _ = dec.read_quality();
    let interval = dec.read_interval().unwrap_or(Duration::ZERO);
    let time = dec.read_time(now).unwrap_or(now);
    dec.finish()?;

    Ok(Sample {
        time,
        temperature,
        humidity,
        pressure,
        co2,
        battery: Some(battery),
        quality: Quality::from_co2(co2),
        interval,
    })
}

/// Assign absolute timestamps to a history, newest sample last
///
/// The newest sample was taken `ago` before `now` and samples are `delta`
/// apart. History carries no battery level.
pub fn stamp_history(samples: &mut [Sample], now: OffsetDateTime, ago: Duration, delta: Duration) {
    let step = delta.whole_seconds();
    let n = samples.len() as i64;
    let begin = now - ago - Duration::seconds(step * (n - 1).max(0));
    for (i, sample) in samples.iter_mut().enumerate() {
        sample.time = begin + Duration::seconds(step * i as i64);
        sample.interval = delta;
        sample.battery = None;
        sample.quality = Quality::from_co2(sample.co2);
    }
}
