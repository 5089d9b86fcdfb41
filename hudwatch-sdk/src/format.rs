//! Time helpers shared by the registry, builder and outputs.

use std::fmt::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Last millisecond RFC 3339 can express (9999-12-31T23:59:59.999Z).
pub const MAX_ISO_TIME_MS: u64 = 253_402_300_799_999;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A duration as fractional milliseconds.
pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Render a millisecond timestamp as RFC 3339 (UTC, millisecond precision).
///
/// Timestamps past the year 9999 are clamped to [`MAX_ISO_TIME_MS`].
pub fn iso_time(timestamp_ms: u64) -> String {
    let at = UNIX_EPOCH + Duration::from_millis(timestamp_ms.min(MAX_ISO_TIME_MS));
    let mut out = String::with_capacity(24);
    if write!(out, "{}", humantime::format_rfc3339_millis(at)).is_err() {
        out.clear();
    }
    out
}

/// Format a millisecond value for display in reports.
pub fn format_ms(ms: f64) -> String {
    if ms <= 0.0 {
        "0ms".to_string()
    } else if ms < 1.0 {
        format!("{:.0}µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{:.2}ms", ms)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_time_of_epoch() {
        assert_eq!(iso_time(0), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn iso_time_keeps_millis() {
        assert_eq!(iso_time(1_703_160_000_123), "2023-12-21T12:00:00.123Z");
    }

    #[test]
    fn iso_time_clamps_past_year_9999() {
        assert_eq!(iso_time(MAX_ISO_TIME_MS), "9999-12-31T23:59:59.999Z");
        assert_eq!(iso_time(MAX_ISO_TIME_MS + 1), "9999-12-31T23:59:59.999Z");
        assert_eq!(iso_time(u64::MAX), "9999-12-31T23:59:59.999Z");
    }

    #[test]
    fn duration_ms_is_fractional() {
        assert_eq!(duration_ms(Duration::from_micros(1500)), 1.5);
    }

    #[test]
    fn format_ms_picks_units() {
        assert_eq!(format_ms(0.0), "0ms");
        assert_eq!(format_ms(0.25), "250µs");
        assert_eq!(format_ms(12.5), "12.50ms");
        assert_eq!(format_ms(1500.0), "1.50s");
    }

    #[test]
    fn now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
