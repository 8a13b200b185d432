/// Error types shared by the device protocol, the sample store and the service loop
use std::time::Duration;

use bluer::Uuid;
use thiserror::Error;

use crate::models::Param;

/// Failure of a single field read.
///
/// `Copy` so that a poisoned decoder can hand out the same error on every
/// later read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The sensor reported the "no data" sentinel, usually while calibrating.
    #[error("no data (sensor calibrating)")]
    NoData,
    #[error("short buffer: needed {needed} bytes, {available} available")]
    ShortBuffer { needed: usize, available: usize },
    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A time-series notification echoed a different parameter than requested.
    #[error("invalid parameter in notification: got=0x{got:02x}, want=0x{want:02x}")]
    ProtocolMismatch { got: u8, want: u8 },

    #[error("invalid time-series start index {0} (indices are 1-based)")]
    InvalidStartIndex(u16),

    #[error("characteristic {characteristic} not found in service {service}")]
    MissingCharacteristic { service: Uuid, characteristic: Uuid },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {waited:?} waiting for {param} time series")]
    Timeout { param: Param, waited: Duration },

    /// A sample field does not fit the stored record width.
    #[error("{field} {value} cannot be stored in a record")]
    Unrepresentable { field: &'static str, value: f64 },

    #[error("database error: {0}")]
    Database(String),
}

impl From<bluer::Error> for Error {
    fn from(err: bluer::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
