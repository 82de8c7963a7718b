use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use thiserror::Error;
use tracing::debug;

use peregrine_core::types::{SlotCandidate, Subscriber};

/// Errors raised while filtering. Parse failures propagate to the
/// caller — never silently defaulted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    /// Time string matched none of the three supported shapes.
    #[error("unparsable time string: {0:?}")]
    UnparsableTime(String),
}

pub type Result<T> = std::result::Result<T, FilterError>;

fn minutes_of(t: NaiveTime) -> u16 {
    (t.hour() * 60 + t.minute()) as u16
}

/// Parse a slot time into minutes since midnight, in [0, 1439].
///
/// Exactly three textual shapes are accepted:
/// - 12-hour with meridiem: `"7:30 PM"`
/// - bare 24-hour: `"19:30"` (seconds tolerated: `"19:30:00"`)
/// - full date-time: `"YYYY-MM-DD HH:MM:SS"` — only the time component
///   is used
pub fn parse_slot_minutes(raw: &str) -> Result<u16> {
    let s = raw.trim();

    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(minutes_of(dt.time()));
    }
    // Meridiem shape first: "7:30 PM" fails %H:%M on the trailing text
    // anyway, but the uppercase pass also tolerates "7:30 pm".
    if let Ok(t) = NaiveTime::parse_from_str(&s.to_uppercase(), "%I:%M %p") {
        return Ok(minutes_of(t));
    }
    if let Ok(t) = NaiveTime::parse_from_str(s, "%H:%M:%S") {
        return Ok(minutes_of(t));
    }
    if let Ok(t) = NaiveTime::parse_from_str(s, "%H:%M") {
        return Ok(minutes_of(t));
    }
    Err(FilterError::UnparsableTime(raw.to_string()))
}

/// One candidate that passed the filter, carrying its normalized time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedSlot {
    pub candidate: SlotCandidate,
    pub minutes: u16,
}

/// A subscriber's preferences compiled into a reusable predicate.
#[derive(Debug, Clone)]
pub struct SlotFilter {
    window_start: u16,
    window_end: u16,
    table_types: Vec<String>,
    weekdays: Vec<u8>,
}

impl SlotFilter {
    /// Compile a subscriber's preferences. An unparsable window bound is
    /// a local logic error that aborts only this subscriber's workflow.
    pub fn for_subscriber(sub: &Subscriber) -> Result<Self> {
        Ok(Self {
            window_start: parse_slot_minutes(&sub.window_start)?,
            window_end: parse_slot_minutes(&sub.window_end)?,
            table_types: sub.table_types.clone(),
            weekdays: sub.weekdays.clone(),
        })
    }

    /// Window membership, inclusive on both bounds. An end before the
    /// start means the window wraps past midnight: 22:00–02:00 matches
    /// 23:00 and 01:00 but not 03:00.
    pub fn window_contains(&self, minutes: u16) -> bool {
        if self.window_end < self.window_start {
            minutes >= self.window_start || minutes <= self.window_end
        } else {
            minutes >= self.window_start && minutes <= self.window_end
        }
    }

    /// Empty preference set passes everything; otherwise the label must
    /// contain at least one preference as a case-sensitive substring,
    /// and an unlabeled candidate never passes.
    fn table_type_matches(&self, label: Option<&str>) -> bool {
        if self.table_types.is_empty() {
            return true;
        }
        match label {
            Some(label) => self.table_types.iter().any(|t| label.contains(t.as_str())),
            None => false,
        }
    }

    /// Empty set means no restriction; 0 = Monday … 6 = Sunday.
    pub fn weekday_allowed(&self, date: NaiveDate) -> bool {
        self.weekdays.is_empty()
            || self
                .weekdays
                .contains(&(date.weekday().num_days_from_monday() as u8))
    }

    /// Apply every active predicate to one candidate. `Ok(Some(m))` is a
    /// pass with the normalized time, `Ok(None)` a filtered-out
    /// candidate, `Err` an unparsable slot time the caller must treat
    /// as "exclude".
    pub fn matches(&self, candidate: &SlotCandidate) -> Result<Option<u16>> {
        let minutes = parse_slot_minutes(&candidate.time)?;
        if !self.window_contains(minutes) {
            return Ok(None);
        }
        if !self.table_type_matches(candidate.table_type.as_deref()) {
            return Ok(None);
        }
        if !self.weekday_allowed(candidate.date) {
            return Ok(None);
        }
        Ok(Some(minutes))
    }

    /// Narrow raw candidates to this subscriber's wants, ranked earliest
    /// first — ascending (date, time). Unparsable slot times are
    /// excluded, per the contract above.
    pub fn filter_ranked(&self, candidates: &[SlotCandidate]) -> Vec<RankedSlot> {
        let mut ranked: Vec<RankedSlot> = candidates
            .iter()
            .filter_map(|candidate| match self.matches(candidate) {
                Ok(Some(minutes)) => Some(RankedSlot {
                    candidate: candidate.clone(),
                    minutes,
                }),
                Ok(None) => None,
                Err(e) => {
                    debug!("excluding candidate: {e}");
                    None
                }
            })
            .collect();
        ranked.sort_by_key(|slot| (slot.candidate.date, slot.minutes));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(time: &str, table_type: Option<&str>) -> SlotCandidate {
        SlotCandidate {
            venue_id: "v1".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 8, 21).unwrap(), // a Friday
            time: time.to_string(),
            config_id: "cfg".to_string(),
            table_type: table_type.map(str::to_string),
        }
    }

    fn filter(start: &str, end: &str) -> SlotFilter {
        SlotFilter {
            window_start: parse_slot_minutes(start).unwrap(),
            window_end: parse_slot_minutes(end).unwrap(),
            table_types: vec![],
            weekdays: vec![],
        }
    }

    // --- parsing ----------------------------------------------------------

    #[test]
    fn parses_twelve_hour_meridiem() {
        assert_eq!(parse_slot_minutes("7:30 PM").unwrap(), 19 * 60 + 30);
        assert_eq!(parse_slot_minutes("7:30 pm").unwrap(), 19 * 60 + 30);
        assert_eq!(parse_slot_minutes("12:00 AM").unwrap(), 0);
        assert_eq!(parse_slot_minutes("12:15 PM").unwrap(), 12 * 60 + 15);
    }

    #[test]
    fn parses_bare_twenty_four_hour() {
        assert_eq!(parse_slot_minutes("19:30").unwrap(), 19 * 60 + 30);
        assert_eq!(parse_slot_minutes("00:00").unwrap(), 0);
        assert_eq!(parse_slot_minutes("23:59").unwrap(), 1439);
        assert_eq!(parse_slot_minutes("19:30:00").unwrap(), 19 * 60 + 30);
    }

    #[test]
    fn parses_full_datetime_using_time_component_only() {
        assert_eq!(
            parse_slot_minutes("2026-08-21 19:30:00").unwrap(),
            19 * 60 + 30
        );
        assert_eq!(parse_slot_minutes("2026-01-01 00:00:00").unwrap(), 0);
    }

    #[test]
    fn parse_results_stay_in_range() {
        for time in ["12:00 AM", "11:59 PM", "00:00", "23:59", "2026-08-21 23:59:59"] {
            let m = parse_slot_minutes(time).unwrap();
            assert!(m <= 1439, "{time} parsed to {m}");
        }
    }

    #[test]
    fn rejects_other_shapes() {
        for bad in ["", "soon", "7:30PM-ish", "25:00", "19.30", "7:30 XM"] {
            assert!(
                matches!(parse_slot_minutes(bad), Err(FilterError::UnparsableTime(_))),
                "{bad:?} should not parse"
            );
        }
    }

    // --- window membership ------------------------------------------------

    #[test]
    fn window_is_inclusive_at_both_bounds() {
        let f = filter("18:00", "21:00");
        assert!(f.window_contains(parse_slot_minutes("18:00").unwrap()));
        assert!(f.window_contains(parse_slot_minutes("21:00").unwrap()));
        assert!(f.window_contains(parse_slot_minutes("19:30").unwrap()));
        assert!(!f.window_contains(parse_slot_minutes("17:59").unwrap()));
        assert!(!f.window_contains(parse_slot_minutes("21:01").unwrap()));
    }

    #[test]
    fn wrapping_window_spans_midnight() {
        let f = filter("22:00", "02:00");
        assert!(f.window_contains(parse_slot_minutes("23:00").unwrap()));
        assert!(f.window_contains(parse_slot_minutes("01:00").unwrap()));
        assert!(f.window_contains(parse_slot_minutes("22:00").unwrap()));
        assert!(f.window_contains(parse_slot_minutes("02:00").unwrap()));
        assert!(!f.window_contains(parse_slot_minutes("03:00").unwrap()));
        assert!(!f.window_contains(parse_slot_minutes("21:00").unwrap()));
    }

    // --- table type -------------------------------------------------------

    #[test]
    fn empty_table_type_set_passes_everything() {
        let f = filter("00:00", "23:59");
        assert_eq!(
            f.matches(&candidate("19:30", Some("Patio"))).unwrap(),
            Some(1170)
        );
        assert_eq!(f.matches(&candidate("19:30", None)).unwrap(), Some(1170));
    }

    #[test]
    fn unlabeled_candidate_never_passes_nonempty_set() {
        let mut f = filter("00:00", "23:59");
        f.table_types = vec!["Patio".to_string()];
        assert_eq!(f.matches(&candidate("19:30", None)).unwrap(), None);
    }

    #[test]
    fn table_type_substring_is_case_sensitive() {
        let mut f = filter("00:00", "23:59");
        f.table_types = vec!["Patio".to_string()];
        assert_eq!(
            f.matches(&candidate("19:30", Some("Heated Patio Table")))
                .unwrap(),
            Some(1170)
        );
        assert_eq!(
            f.matches(&candidate("19:30", Some("heated patio"))).unwrap(),
            None
        );
    }

    #[test]
    fn any_preference_match_suffices() {
        let mut f = filter("00:00", "23:59");
        f.table_types = vec!["Bar".to_string(), "Patio".to_string()];
        assert_eq!(
            f.matches(&candidate("19:30", Some("Outdoor Patio"))).unwrap(),
            Some(1170)
        );
    }

    // --- weekday ----------------------------------------------------------

    #[test]
    fn weekday_restriction_applies_to_candidate_date() {
        let mut f = filter("00:00", "23:59");
        // 2026-08-21 is a Friday (index 4).
        f.weekdays = vec![4];
        assert_eq!(f.matches(&candidate("19:30", None)).unwrap(), Some(1170));
        f.weekdays = vec![0, 1];
        assert_eq!(f.matches(&candidate("19:30", None)).unwrap(), None);
    }

    // --- ranking ----------------------------------------------------------

    #[test]
    fn ranked_output_ascends_by_date_then_time() {
        let f = filter("18:00", "21:00");
        let mut late = candidate("20:00", None);
        late.date = NaiveDate::from_ymd_opt(2026, 8, 22).unwrap();
        let candidates = vec![
            candidate("8:00 PM", None),
            late,
            candidate("19:30", None),
            candidate("18:45", None),
        ];
        let ranked = f.filter_ranked(&candidates);
        let times: Vec<(NaiveDate, u16)> = ranked
            .iter()
            .map(|s| (s.candidate.date, s.minutes))
            .collect();
        assert_eq!(
            times,
            vec![
                (NaiveDate::from_ymd_opt(2026, 8, 21).unwrap(), 1125),
                (NaiveDate::from_ymd_opt(2026, 8, 21).unwrap(), 1170),
                (NaiveDate::from_ymd_opt(2026, 8, 21).unwrap(), 1200),
                (NaiveDate::from_ymd_opt(2026, 8, 22).unwrap(), 1200),
            ]
        );
    }

    #[test]
    fn unparsable_candidates_are_excluded_not_fatal() {
        let f = filter("18:00", "21:00");
        let ranked = f.filter_ranked(&[candidate("whenever", None), candidate("19:30", None)]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].minutes, 1170);
    }

    #[test]
    fn subscriber_with_bad_window_fails_compilation() {
        let sub = Subscriber {
            id: "s1".to_string(),
            display_name: "S".to_string(),
            auth_token: "t".to_string(),
            payment_method_id: "pm".to_string(),
            venue_id: "v1".to_string(),
            party_size: 2,
            window_start: "sixish".to_string(),
            window_end: "21:00".to_string(),
            table_types: vec![],
            weekdays: vec![],
            enabled: true,
        };
        assert!(SlotFilter::for_subscriber(&sub).is_err());
    }
}
