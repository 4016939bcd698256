//! Timestamp utilities and domain time constants

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};

/// Watermark sentinel for an empty output table ("beginning of time").
///
/// Matches the minimum timestamp representable in the plant historian,
/// so any real row compares strictly greater.
pub fn watermark_sentinel() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).unwrap()
}

/// Minimum sampling resolution of the temperature source (one reading per second).
pub fn min_sampling_resolution() -> Duration {
    Duration::seconds(1)
}

/// Fractional hours between two timestamps (`later - earlier`).
pub fn hours_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_seconds() as f64 / 3600.0
}

/// True when `ts` falls exactly on an `every_minutes` minute boundary.
///
/// Used to subsample derived statistics to fixed minute marks.
pub fn on_minute_boundary(ts: DateTime<Utc>, every_minutes: u32) -> bool {
    every_minutes > 0 && ts.second() == 0 && ts.minute() % every_minutes == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_predates_real_data() {
        let sentinel = watermark_sentinel();
        assert!(sentinel < Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_hours_between() {
        let a = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 1, 1, 30, 0).unwrap();
        assert!((hours_between(a, b) - 1.5).abs() < 1e-12);
        assert!((hours_between(b, a) + 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_minute_boundary() {
        let on = Utc.with_ymd_and_hms(2024, 3, 1, 12, 40, 0).unwrap();
        let off_minute = Utc.with_ymd_and_hms(2024, 3, 1, 12, 41, 0).unwrap();
        let off_second = Utc.with_ymd_and_hms(2024, 3, 1, 12, 40, 30).unwrap();
        assert!(on_minute_boundary(on, 10));
        assert!(!on_minute_boundary(off_minute, 10));
        assert!(!on_minute_boundary(off_second, 10));
        assert!(!on_minute_boundary(on, 0));
    }
}
