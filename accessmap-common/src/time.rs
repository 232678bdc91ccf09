//! Timestamp utilities
//!
//! Timestamps are persisted as integer microseconds since the Unix epoch.
//! Every timestamp that may be stored is truncated to microsecond precision
//! when created so the in-memory value and the stored value are identical.

use chrono::{DateTime, Utc};

/// Get current UTC timestamp, truncated to microsecond precision
pub fn now() -> DateTime<Utc> {
    truncate_to_micros(Utc::now())
}

/// Drop sub-microsecond precision
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    from_micros(ts.timestamp_micros()).unwrap_or(ts)
}

/// Convert a stored microsecond value back to a UTC timestamp
pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}
