//! Timestamp utilities
//!
//! Timestamps are persisted as fixed-width RFC 3339 strings (millisecond
//! precision, `Z` suffix) so that SQL string comparison orders them correctly.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp previously written by [`to_db_timestamp`]
pub fn from_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

/// Timestamp `age` before now, saturating on overflow
pub fn before_now(age: std::time::Duration) -> DateTime<Utc> {
    let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
    now().checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
