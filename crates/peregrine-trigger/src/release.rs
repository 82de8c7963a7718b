use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{Result, TriggerError};

fn parse_release_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| TriggerError::InvalidTime(s.to_string()))
}

fn parse_timezone(s: &str) -> Result<Tz> {
    s.parse::<Tz>()
        .map_err(|_| TriggerError::UnknownTimezone(s.to_string()))
}

/// Compute the next future instant at which a venue's inventory opens.
///
/// The venue's local release time is resolved in its own timezone and
/// normalized to UTC. An instant that has already passed today rolls to
/// the next occurrence. A local time that doesn't exist on a given day
/// (spring-forward gap) skips to the next day it does; an ambiguous one
/// (fall-back overlap) resolves to the earliest valid instant, since
/// firing early beats missing the release.
pub fn next_release_instant(
    release_time: &str,
    tz_name: &str,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let time = parse_release_time(release_time)?;
    let tz = parse_timezone(tz_name)?;

    let mut date = now.with_timezone(&tz).date_naive();
    // Two extra days covers any DST gap.
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > now {
                return Ok(candidate);
            }
        }
        date = date
            .succ_opt()
            .ok_or_else(|| TriggerError::DateOutOfRange(date.to_string()))?;
    }
    Err(TriggerError::DateOutOfRange(format!(
        "no valid release instant near {date}"
    )))
}

/// The newly bookable date: the venue-local date plus the
/// advance-booking horizon.
pub fn target_date(tz_name: &str, horizon_days: u32, now: DateTime<Utc>) -> Result<NaiveDate> {
    let tz = parse_timezone(tz_name)?;
    let today = now.with_timezone(&tz).date_naive();
    today
        .checked_add_signed(Duration::days(horizon_days as i64))
        .ok_or_else(|| TriggerError::DateOutOfRange(today.to_string()))
}

/// The forward dates a release event scans, venue-local, ending at the
/// newly bookable date. A zero horizon means same-day release, so the
/// window is just today; otherwise it runs from tomorrow through the
/// horizon date.
pub fn forward_window(
    tz_name: &str,
    horizon_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<NaiveDate>> {
    let tz = parse_timezone(tz_name)?;
    let today = now.with_timezone(&tz).date_naive();
    if horizon_days == 0 {
        return Ok(vec![today]);
    }
    let mut dates = Vec::with_capacity(horizon_days as usize);
    for offset in 1..=horizon_days as i64 {
        let date = today
            .checked_add_signed(Duration::days(offset))
            .ok_or_else(|| TriggerError::DateOutOfRange(today.to_string()))?;
        dates.push(date);
    }
    Ok(dates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn fires_today_when_release_is_still_ahead() {
        // 08:00 in New York is 12:00 UTC during DST.
        let now = utc(2026, 6, 10, 11, 0, 0);
        let next = next_release_instant("08:00", "America/New_York", now).unwrap();
        assert_eq!(next, utc(2026, 6, 10, 12, 0, 0));
    }

    #[test]
    fn rolls_to_tomorrow_when_release_has_passed() {
        let now = utc(2026, 6, 10, 13, 0, 0);
        let next = next_release_instant("08:00", "America/New_York", now).unwrap();
        assert_eq!(next, utc(2026, 6, 11, 12, 0, 0));
    }

    #[test]
    fn exact_release_instant_rolls_forward() {
        // `now` equal to the instant means it already happened.
        let now = utc(2026, 6, 10, 12, 0, 0);
        let next = next_release_instant("08:00", "America/New_York", now).unwrap();
        assert_eq!(next, utc(2026, 6, 11, 12, 0, 0));
    }

    #[test]
    fn accepts_seconds_in_release_time() {
        let now = utc(2026, 6, 10, 0, 0, 0);
        let next = next_release_instant("09:30:15", "UTC", now).unwrap();
        assert_eq!(next, utc(2026, 6, 10, 9, 30, 15));
    }

    #[test]
    fn spring_forward_gap_skips_to_next_valid_day() {
        // 2026-03-08 02:30 does not exist in New York; the next valid
        // occurrence is 02:30 on the 9th (EDT, UTC-4).
        let now = utc(2026, 3, 8, 1, 0, 0);
        let next = next_release_instant("02:30", "America/New_York", now).unwrap();
        assert_eq!(next, utc(2026, 3, 9, 6, 30, 0));
    }

    #[test]
    fn rejects_malformed_inputs() {
        let now = Utc::now();
        assert!(matches!(
            next_release_instant("25:00", "UTC", now),
            Err(TriggerError::InvalidTime(_))
        ));
        assert!(matches!(
            next_release_instant("10:00", "Mars/Olympus", now),
            Err(TriggerError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn target_date_applies_horizon_in_venue_timezone() {
        // 03:00 UTC on the 11th is still the 10th in New York.
        let now = utc(2026, 6, 11, 3, 0, 0);
        let date = target_date("America/New_York", 14, now).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2026, 6, 24).unwrap());
    }

    #[test]
    fn forward_window_spans_tomorrow_through_horizon() {
        let now = utc(2026, 6, 10, 12, 0, 0);
        let dates = forward_window("UTC", 3, now).unwrap();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2026, 6, 11).unwrap(),
                NaiveDate::from_ymd_opt(2026, 6, 12).unwrap(),
                NaiveDate::from_ymd_opt(2026, 6, 13).unwrap(),
            ]
        );
    }

    #[test]
    fn zero_horizon_scans_today_only() {
        let now = utc(2026, 6, 10, 12, 0, 0);
        let dates = forward_window("UTC", 0, now).unwrap();
        assert_eq!(dates, vec![NaiveDate::from_ymd_opt(2026, 6, 10).unwrap()]);
    }
}
