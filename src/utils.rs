/// Utility functions for time arithmetic and formatting
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS` in UTC
///
/// Falls back to the default string representation if formatting fails.
pub fn format_timestamp(dt: &OffsetDateTime) -> String {
    let utc = dt.to_offset(time::UtcOffset::UTC);
    utc.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| utc.to_string())
}

/// Convert a `time::Duration` to `std::time::Duration`, clamping negatives to zero
///
/// Used where tokio timers need a std duration, e.g. the refresh ticker.
pub fn to_std_duration(duration: Duration) -> std::time::Duration {
    std::time::Duration::try_from(duration).unwrap_or_default()
}

/// Truncate a timestamp to whole UNIX seconds
pub fn whole_seconds(dt: OffsetDateTime) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(dt.unix_timestamp()).unwrap_or(dt)
}
