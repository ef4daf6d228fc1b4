//! Conversions between caller-supplied ISO-8601 text and engine [`Ms`].
//!
//! Text without an offset is read as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};

use crate::engine::EngineError;
use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn midnight_ms(date: NaiveDate) -> Option<Ms> {
    date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis())
}

/// Parse an instant. Accepts RFC 3339 with an offset, a naive date-time
/// (`2024-06-01T14:00:00`, seconds and fraction optional) or a bare date
/// (midnight).
pub fn parse_instant(s: &str) -> Result<Ms, EngineError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    parse_date(s)
        .and_then(midnight_ms)
        .ok_or_else(|| {
            EngineError::ValidationFailed(format!(
                "invalid datetime {s:?}: expected ISO-8601 such as 2024-06-01T14:00:00"
            ))
        })
}

/// Inclusive window `[00:00:00.000, 23:59:59.999]` of the day named by `s`.
/// `s` is a bare date or a timestamp; only the date part is used.
pub fn day_window(s: &str) -> Result<(Ms, Ms), EngineError> {
    let s = s.trim();
    let date_part = s.split(['T', ' ']).next().unwrap_or(s);
    let start = parse_date(date_part)
        .and_then(midnight_ms)
        .ok_or_else(|| {
            EngineError::ValidationFailed(format!("invalid date {s:?}: expected YYYY-MM-DD"))
        })?;
    Ok((start, start + DAY_MS - 1))
}

/// RFC 3339 rendering in UTC, for logs and error messages.
pub fn format_instant(ms: Ms) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => format!("{ms}ms"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-06-01T00:00:00Z
    const JUNE_1: Ms = 1_717_200_000_000;

    #[test]
    fn naive_datetime_is_utc() {
        assert_eq!(parse_instant("2024-06-01T00:00:00").unwrap(), JUNE_1);
        assert_eq!(parse_instant("2024-06-01T14:30").unwrap(), JUNE_1 + 14 * 3_600_000 + 30 * 60_000);
        assert_eq!(parse_instant("2024-06-01 00:00:00.250").unwrap(), JUNE_1 + 250);
    }

    #[test]
    fn offset_is_honoured() {
        assert_eq!(parse_instant("2024-06-01T03:00:00+03:00").unwrap(), JUNE_1);
        assert_eq!(parse_instant("2024-06-01T00:00:00Z").unwrap(), JUNE_1);
    }

    #[test]
    fn bare_date_is_midnight() {
        assert_eq!(parse_instant("2024-06-01").unwrap(), JUNE_1);
    }

    #[test]
    fn garbage_is_validation_failure() {
        for bad in ["", "tomorrow", "2024-13-01T00:00:00", "2024-06-01T25:00:00"] {
            assert!(
                matches!(parse_instant(bad), Err(EngineError::ValidationFailed(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn day_window_from_bare_date() {
        assert_eq!(day_window("2024-06-01").unwrap(), (JUNE_1, JUNE_1 + DAY_MS - 1));
    }

    #[test]
    fn day_window_ignores_time_of_day() {
        assert_eq!(
            day_window("2024-06-01T18:45:00").unwrap(),
            day_window("2024-06-01").unwrap()
        );
        assert_eq!(
            day_window("2024-06-01T23:59:59+05:00").unwrap(),
            day_window("2024-06-01").unwrap()
        );
    }

    #[test]
    fn day_window_rejects_garbage() {
        assert!(matches!(day_window("01/06/2024"), Err(EngineError::ValidationFailed(_))));
    }

    #[test]
    fn format_round_trips() {
        assert_eq!(format_instant(JUNE_1), "2024-06-01T00:00:00.000Z");
        assert_eq!(parse_instant(&format_instant(JUNE_1 + 1)).unwrap(), JUNE_1 + 1);
    }
}
