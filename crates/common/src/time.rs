//! Timestamp normalization
//!
//! Every timestamp the pipeline stores or compares is a UTC string in the
//! form `YYYY-MM-DDTHH:MM:SSZ`, so plain string ordering is chronological.

use crate::errors::{AppError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

/// Canonical timestamp layout
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a UTC instant in the canonical layout
pub fn format_utc(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// Normalize an ISO-8601 timestamp to the canonical UTC layout.
///
/// Accepts RFC 3339 with `Z` or a numeric offset, naive date-times
/// (`T` or space separated, read as UTC) and bare dates (midnight UTC).
/// Fractional seconds are dropped.
pub fn normalize_timestamp(raw: &str) -> Result<String> {
    let trimmed = raw.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(format_utc(parsed.with_timezone(&Utc)));
    }

    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return Ok(format_utc(naive.and_utc()));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(format_utc(midnight.and_utc()));
        }
    }

    Err(AppError::InvalidTimestamp { value: raw.to_string() })
}

/// Longest processing window accepted, in days
pub const MAX_WINDOW_DAYS: i64 = 36_500;

/// Start of the processing window: `days` before `now`
pub fn window_start(now: DateTime<Utc>, days: i64) -> Result<String> {
    if !(0..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(AppError::Configuration {
            message: format!("window of {days} days is outside 0..={MAX_WINDOW_DAYS}"),
        });
    }
    Duration::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .map(format_utc)
        .ok_or_else(|| AppError::Configuration {
            message: format!("window of {days} days reaches before the earliest date"),
        })
}

/// Oldest completion time that still counts as fresh for the search cache
pub fn cache_cutoff(now: DateTime<Utc>, cache_hours: u64) -> String {
    // a century is already "forever" for a cache entry
    let hours = cache_hours.min(24 * 365 * 100) as i64;
    format_utc(now - Duration::hours(hours))
}

/// Run date used to name digest artifacts (`YYYY-MM-DD`)
pub fn run_date(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// RFC 2822 date header value
pub fn rfc2822(now: DateTime<Utc>) -> String {
    now.to_rfc2822()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_z_suffix() {
        assert_eq!(
            normalize_timestamp("2026-01-15T10:30:00Z").unwrap(),
            "2026-01-15T10:30:00Z"
        );
    }

    #[test]
    fn test_plus_zero_offset() {
        assert_eq!(
            normalize_timestamp("2026-01-15T10:30:00+00:00").unwrap(),
            "2026-01-15T10:30:00Z"
        );
    }

    #[test]
    fn test_positive_offset_converts_to_utc() {
        assert_eq!(
            normalize_timestamp("2025-06-15T15:00:00+03:00").unwrap(),
            "2025-06-15T12:00:00Z"
        );
    }

    #[test]
    fn test_negative_offset_crosses_midnight() {
        assert_eq!(
            normalize_timestamp("2025-06-15T22:30:00-05:00").unwrap(),
            "2025-06-16T03:30:00Z"
        );
    }

    #[test]
    fn test_normalized_value_is_a_fixed_point() {
        let once = normalize_timestamp("2025-06-15T15:00:00+03:00").unwrap();
        assert_eq!(normalize_timestamp(&once).unwrap(), once);
    }

    #[test]
    fn test_naive_and_date_only_inputs() {
        assert_eq!(
            normalize_timestamp("2026-01-15 10:30:00").unwrap(),
            "2026-01-15T10:30:00Z"
        );
        assert_eq!(normalize_timestamp("2026-01-15").unwrap(), "2026-01-15T00:00:00Z");
        assert_eq!(
            normalize_timestamp("2026-01-15T10:30:00.123Z").unwrap(),
            "2026-01-15T10:30:00Z"
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(normalize_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_window_and_cutoff() {
        let now = Utc.with_ymd_and_hms(2026, 2, 20, 12, 0, 0).unwrap();
        assert_eq!(window_start(now, 7).unwrap(), "2026-02-13T12:00:00Z");
        assert_eq!(window_start(now, 0).unwrap(), "2026-02-20T12:00:00Z");
        assert_eq!(cache_cutoff(now, 1), "2026-02-20T11:00:00Z");
        assert_eq!(run_date(now), "2026-02-20");
    }

    #[test]
    fn test_window_out_of_range_is_rejected() {
        let now = Utc.with_ymd_and_hms(2026, 1, 22, 9, 0, 0).unwrap();
        for days in [-3, MAX_WINDOW_DAYS + 1, 100_000_000, i64::MAX, i64::MIN] {
            let err = window_start(now, days).unwrap_err();
            assert!(matches!(err, AppError::Configuration { .. }), "days = {days}");
        }
        assert!(window_start(now, MAX_WINDOW_DAYS).is_ok());
    }
}
