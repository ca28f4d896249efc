//! Time Utilities
//!
//! The platform counts days in one fixed local timezone, so every day
//! boundary (daily XP reset, streaks) goes through these helpers.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Builds the platform offset from whole hours east of UTC
pub fn platform_offset(utc_offset_hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(utc_offset_hours * 3600)
}

/// Calendar date of `instant` in the given offset
pub fn local_date(instant: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    instant.with_timezone(&offset).date_naive()
}

/// Whole local days from `earlier` to `later` (negative when `later` is before `earlier`)
pub fn days_between(earlier: NaiveDate, later: NaiveDate) -> i64 {
    (later - earlier).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_local_date_crosses_midnight_before_utc() {
        let offset = platform_offset(7).unwrap();
        // 18:30 UTC is 01:30 the next day at UTC+7
        let instant = Utc.with_ymd_and_hms(2025, 3, 9, 18, 30, 0).unwrap();
        assert_eq!(
            local_date(instant, offset),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
        );
    }

    #[test]
    fn test_local_date_negative_offset() {
        let offset = platform_offset(-5).unwrap();
        let instant = Utc.with_ymd_and_hms(2025, 3, 10, 2, 0, 0).unwrap();
        assert_eq!(
            local_date(instant, offset),
            NaiveDate::from_ymd_opt(2025, 3, 9).unwrap()
        );
    }

    #[test]
    fn test_platform_offset_rejects_out_of_range() {
        assert!(platform_offset(7).is_some());
        assert!(platform_offset(30).is_none());
    }

    #[test]
    fn test_days_between() {
        let a = NaiveDate::from_ymd_opt(2025, 2, 27).unwrap();
        let b = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(days_between(a, b), 2);
        assert_eq!(days_between(b, a), -2);
        assert_eq!(days_between(a, a), 0);
    }
}
