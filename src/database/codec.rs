/// Fixed-width binary record format for stored samples
///
/// 17 bytes, little-endian:
/// - Bytes 0-7: UNIX timestamp, seconds
/// - Byte 8: humidity, %
/// - Bytes 9-10: pressure × 10, hPa
/// - Bytes 11-12: temperature × 100, °C
/// - Bytes 13-14: CO2, ppm
/// - Byte 15: battery, %, `0xff` when unknown
/// - Byte 16: interval, minutes
///
/// Quality is not stored; it is recomputed from CO2 on decode.
use time::{Duration, OffsetDateTime};

use crate::error::{DecodeError, Error};
use crate::models::{Quality, Sample};

pub const RECORD_SIZE: usize = 17;

const BATTERY_UNKNOWN: u8 = 0xff;

/// Scales `value` to a fixed-point integer no larger than `max`.
fn fixed(field: &'static str, value: f64, scale: f64, max: u16) -> Result<u16, Error> {
    let scaled = (value * scale).round();
    if scaled >= 0.0 && scaled <= f64::from(max) {
        Ok(scaled as u16)
    } else {
        Err(Error::Unrepresentable { field, value })
    }
}

pub fn encode(sample: &Sample) -> Result<[u8; RECORD_SIZE], Error> {
    let humidity = fixed("humidity", sample.humidity, 1.0, u16::from(u8::MAX))?;
    let pressure = fixed("pressure", sample.pressure, 10.0, u16::MAX)?;
    let temperature = fixed("temperature", sample.temperature, 100.0, u16::MAX)?;
    let minutes = sample.interval.whole_minutes();
    let interval = u8::try_from(minutes).map_err(|_| Error::Unrepresentable {
        field: "interval",
        value: minutes as f64,
    })?;

    let mut p = [0u8; RECORD_SIZE];
    p[0..8].copy_from_slice(&sample.time.unix_timestamp().to_le_bytes());
    p[8] = humidity as u8;
    p[9..11].copy_from_slice(&pressure.to_le_bytes());
    p[11..13].copy_from_slice(&temperature.to_le_bytes());
    p[13..15].copy_from_slice(&sample.co2.to_le_bytes());
    p[15] = sample.battery.unwrap_or(BATTERY_UNKNOWN);
    p[16] = interval;
    Ok(p)
}

pub fn decode(p: &[u8]) -> Result<Sample, DecodeError> {
    if p.len() != RECORD_SIZE {
        return Err(DecodeError::ShortBuffer {
            needed: RECORD_SIZE,
            available: p.len(),
        });
    }
    let u16_at = |i: usize| u16::from_le_bytes([p[i], p[i + 1]]);

    let mut ts = [0u8; 8];
    ts.copy_from_slice(&p[0..8]);
    let ts = i64::from_le_bytes(ts);
    let time =
        OffsetDateTime::from_unix_timestamp(ts).map_err(|_| DecodeError::InvalidTimestamp(ts))?;
    let co2 = u16_at(13);

    Ok(Sample {
        time,
        humidity: f64::from(p[8]),
        pressure: f64::from(u16_at(9)) / 10.0,
        temperature: f64::from(u16_at(11)) / 100.0,
        co2,
        battery: match p[15] {
            BATTERY_UNKNOWN => None,
            battery => Some(battery),
        },
        quality: Quality::from_co2(co2),
        interval: Duration::minutes(i64::from(p[16])),
    })
}
