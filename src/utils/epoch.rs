use chrono::{DateTime, Utc};
use time::OffsetDateTime;

/// Converts Stripe epoch seconds. Zero and negative values mean "not set".
pub fn from_unix(seconds: i64) -> Option<OffsetDateTime> {
    if seconds <= 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp(seconds).ok()
}

pub fn utc_to_offset(value: DateTime<Utc>) -> Option<OffsetDateTime> {
    let nanos = i128::from(value.timestamp()) * 1_000_000_000
        + i128::from(value.timestamp_subsec_nanos());
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}
