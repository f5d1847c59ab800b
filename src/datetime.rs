//! Date/time utilities for Stowage.

use chrono::{DateTime, Days, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

/// Format used for log lines and status output.
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse an IANA timezone name, falling back to UTC.
pub fn parse_timezone(name: &str) -> Tz {
    match name.parse() {
        Ok(tz) => tz,
        Err(_) => {
            tracing::warn!(timezone = %name, "Unknown timezone, using UTC");
            Tz::UTC
        }
    }
}

/// Format a UTC instant in the given timezone.
pub fn format_in(dt: &DateTime<Utc>, tz: Tz, format: &str) -> String {
    dt.with_timezone(&tz).format(format).to_string()
}

/// Convert a database datetime string (YYYY-MM-DD HH:MM:SS, UTC) to RFC3339.
pub fn to_rfc3339(datetime_str: &str) -> String {
    match NaiveDateTime::parse_from_str(datetime_str, DISPLAY_FORMAT) {
        Ok(naive) => naive.and_utc().to_rfc3339(),
        Err(_) => datetime_str.to_string(),
    }
}

/// Resolve a wall-clock time in `tz`.
///
/// Ambiguous times take the earlier instant. A time inside a DST gap is read
/// with the offset in effect before the gap, which moves it forward by the
/// gap's length (30 minutes on Lord Howe Island, an hour in most zones).
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Some(dt.with_timezone(&Utc));
    }

    let before_gap = (1..=24)
        .map(|hours| naive - TimeDelta::hours(hours))
        .find_map(|t| tz.from_local_datetime(&t).earliest())?;
    let offset = before_gap.offset().fix().local_minus_utc();
    Some(naive.and_utc() - TimeDelta::seconds(i64::from(offset)))
}

/// Next occurrence of `hour:minute` in `tz` that is strictly after `now`.
///
/// If today's occurrence has already passed the result is tomorrow's.
pub fn next_daily_at(now: DateTime<Utc>, tz: Tz, hour: u32, minute: u32) -> DateTime<Utc> {
    let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
        return now + TimeDelta::days(1);
    };
    let today = now.with_timezone(&tz).date_naive();

    (0..=2)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter_map(|date| resolve_local(tz, date.and_time(time)))
        .find(|candidate| *candidate > now)
        .unwrap_or(now + TimeDelta::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("Asia/Tokyo"), Tz::Asia__Tokyo);
        assert_eq!(parse_timezone("UTC"), Tz::UTC);
        assert_eq!(parse_timezone("Not/AZone"), Tz::UTC);
    }

    #[test]
    fn test_format_in_timezone() {
        let dt = utc("2024-01-15T10:30:00Z");
        assert_eq!(
            format_in(&dt, Tz::Asia__Tokyo, DISPLAY_FORMAT),
            "2024-01-15 19:30:00"
        );
        assert_eq!(format_in(&dt, Tz::UTC, "%H:%M"), "10:30");
    }

    #[test]
    fn test_to_rfc3339() {
        assert_eq!(to_rfc3339("2024-01-15 10:30:00"), "2024-01-15T10:30:00+00:00");
        assert_eq!(to_rfc3339("garbage"), "garbage");
    }

    #[test]
    fn test_next_daily_later_today() {
        let now = utc("2024-03-10T01:00:00Z");
        let next = next_daily_at(now, Tz::UTC, 3, 0);
        assert_eq!(next, utc("2024-03-10T03:00:00Z"));
    }

    #[test]
    fn test_next_daily_already_passed_is_tomorrow() {
        let now = utc("2024-03-10T04:00:00Z");
        let next = next_daily_at(now, Tz::UTC, 3, 0);
        assert_eq!(next, utc("2024-03-11T03:00:00Z"));
    }

    #[test]
    fn test_next_daily_exactly_now_is_tomorrow() {
        let now = utc("2024-03-10T03:00:00Z");
        let next = next_daily_at(now, Tz::UTC, 3, 0);
        assert_eq!(next, utc("2024-03-11T03:00:00Z"));
    }

    #[test]
    fn test_next_daily_respects_timezone() {
        // 03:00 in Tokyo is 18:00 UTC the previous day.
        let now = utc("2024-03-10T12:00:00Z");
        let next = next_daily_at(now, Tz::Asia__Tokyo, 3, 0);
        assert_eq!(next, utc("2024-03-10T18:00:00Z"));
    }

    #[test]
    fn test_next_daily_dst_gap_rolls_forward() {
        // 02:30 does not exist in New York on 2024-03-10.
        let now = utc("2024-03-10T05:00:00Z");
        let next = next_daily_at(now, Tz::America__New_York, 2, 30);
        assert_eq!(next, utc("2024-03-10T07:30:00Z"));
    }

    #[test]
    fn test_next_daily_half_hour_dst_gap() {
        // Lord Howe Island jumps from 02:00 to 02:30 on 2024-10-06.
        let now = utc("2024-10-05T12:00:00Z");
        let next = next_daily_at(now, Tz::Australia__Lord_Howe, 2, 15);
        assert_eq!(next, utc("2024-10-05T15:45:00Z"));
        assert_eq!(
            format_in(&next, Tz::Australia__Lord_Howe, "%Y-%m-%d %H:%M"),
            "2024-10-06 02:45"
        );
    }

    #[test]
    fn test_next_daily_ambiguous_time_takes_earlier() {
        // 01:30 happens twice in New York on 2024-11-03.
        let now = utc("2024-11-03T04:00:00Z");
        let next = next_daily_at(now, Tz::America__New_York, 1, 30);
        assert_eq!(next, utc("2024-11-03T05:30:00Z"));
    }
}
