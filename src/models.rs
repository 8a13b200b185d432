use std::fmt;

use time::{Duration, OffsetDateTime};

use crate::utils::format_timestamp;

/// General assessment of air quality, derived from the CO2 level.
///
/// - green:  `[   0, 1000)` ppm
/// - yellow: `[1000, 1400)` ppm
/// - red:    `[1400, ...)` ppm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Quality {
    #[default]
    Green,
    Yellow,
    Red,
}

impl Quality {
    pub fn from_co2(co2: u16) -> Self {
        match co2 {
            0..=999 => Quality::Green,
            1000..=1399 => Quality::Yellow,
            _ => Quality::Red,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Green => f.write_str("green"),
            Quality::Yellow => f.write_str("yellow"),
            Quality::Red => f.write_str("red"),
        }
    }
}

/// Measured quantity addressed by a time-series request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Param {
    Temperature = 1,
    Humidity = 2,
    Pressure = 3,
    Co2 = 4,
}

impl Param {
    /// Order in which history is fetched.
    pub const ALL: [Param; 4] = [
        Param::Temperature,
        Param::Humidity,
        Param::Pressure,
        Param::Co2,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Temperature => f.write_str("temperature"),
            Param::Humidity => f.write_str("humidity"),
            Param::Pressure => f.write_str("pressure"),
            Param::Co2 => f.write_str("CO2"),
        }
    }
}

/// One measurement from an Aranet4 sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub time: OffsetDateTime,
    /// °C
    pub temperature: f64,
    /// Relative humidity, %
    pub humidity: f64,
    /// hPa
    pub pressure: f64,
    /// ppm
    pub co2: u16,
    /// Battery level in %, `None` when the reading carries no battery
    /// information (history samples).
    pub battery: Option<u8>,
    pub quality: Quality,
    pub interval: Duration,
}

impl Sample {
    /// Returns the sample with its quality recomputed from the CO2 level.
    pub fn with_quality(mut self) -> Self {
        self.quality = Quality::from_co2(self.co2);
        self
    }
}

impl Default for Sample {
    fn default() -> Self {
        Sample {
            time: OffsetDateTime::UNIX_EPOCH,
            temperature: 0.0,
            humidity: 0.0,
            pressure: 0.0,
            co2: 0,
            battery: None,
            quality: Quality::default(),
            interval: Duration::ZERO,
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CO2:         {} ppm", self.co2)?;
        writeln!(f, "temperature: {}°C", self.temperature)?;
        writeln!(f, "pressure:    {} hPa", self.pressure)?;
        writeln!(f, "humidity:    {}%", self.humidity)?;
        writeln!(f, "quality:     {}", self.quality)?;
        match self.battery {
            Some(battery) => writeln!(f, "battery:     {}%", battery)?,
            None => writeln!(f, "battery:     n/a")?,
        }
        writeln!(f, "interval:    {}", self.interval)?;
        writeln!(f, "time-stamp:  {} UTC", format_timestamp(&self.time))
    }
}
