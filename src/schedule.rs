//! Refresh schedule computation
//!
//! All day-of-month and fixed-date semantics are evaluated against the civil
//! calendar of one fixed reference timezone, then converted to absolute UTC
//! instants for storage. Due-ness comparisons stay in absolute-instant space
//! so they hold regardless of server timezone.
//!
//! The civil <-> instant conversion happens in exactly two places:
//! `civil_midnight_utc` (civil date -> stored instant) and `civil_date`
//! (instant -> reference-timezone date).

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Monthly day-of-month values are clamped to this to avoid month-length
/// ambiguity (Feb 29/30/31 do not exist).
pub const MAX_MONTHLY_DAY: u32 = 28;

/// When a ledger row's usage resets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RefreshPolicy {
    /// Every month on a fixed day (clamped to [1, 28])
    Monthly { day: u32 },
    /// Once, on a fixed calendar date
    FixedDate { date: NaiveDate },
    /// Once, at the owning scheme's campaign end
    CampaignEnd { end_date: Option<NaiveDate> },
}

/// Computes next-reset instants in a fixed reference timezone
#[derive(Debug, Clone, Copy)]
pub struct RefreshSchedule {
    offset: FixedOffset,
}

impl RefreshSchedule {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Next reset instant for `policy`, strictly after `now`.
    ///
    /// `None` means no further scheduled reset: a one-shot date already past,
    /// a campaign without an end date, or no policy at the call site.
    pub fn next_refresh(&self, policy: &RefreshPolicy, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match policy {
            RefreshPolicy::Monthly { day } => {
                let day = (*day).clamp(1, MAX_MONTHLY_DAY);
                let today = self.civil_date(now);
                let this_month = NaiveDate::from_ymd_opt(today.year(), today.month(), day)?;
                let candidate = self.civil_midnight_utc(this_month);
                if candidate > now {
                    return Some(candidate);
                }
                let (year, month) = if today.month() == 12 {
                    (today.year() + 1, 1)
                } else {
                    (today.year(), today.month() + 1)
                };
                let next_month = NaiveDate::from_ymd_opt(year, month, day)?;
                Some(self.civil_midnight_utc(next_month))
            }
            RefreshPolicy::FixedDate { date } => self.one_shot(*date, now),
            RefreshPolicy::CampaignEnd { end_date } => self.one_shot((*end_date)?, now),
        }
    }

    /// True iff the stored reset instant has elapsed
    pub fn is_due(&self, stored: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now >= stored
    }

    /// Human-readable description of a refresh policy; `None` means no policy
    pub fn describe(&self, policy: Option<&RefreshPolicy>) -> String {
        match policy {
            Some(RefreshPolicy::Monthly { day }) => {
                format!("resets monthly on day {}", (*day).clamp(1, MAX_MONTHLY_DAY))
            }
            Some(RefreshPolicy::FixedDate { date }) => format!("resets on {}", date),
            Some(RefreshPolicy::CampaignEnd { end_date: Some(date) }) => {
                format!("resets at campaign end ({})", date)
            }
            Some(RefreshPolicy::CampaignEnd { end_date: None }) => "resets at campaign end".to_string(),
            None => "no scheduled reset".to_string(),
        }
    }

    fn one_shot(&self, date: NaiveDate, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let instant = self.civil_midnight_utc(date);
        (instant > now).then_some(instant)
    }

    /// Midnight of `date` in the reference timezone, as a UTC instant
    fn civil_midnight_utc(&self, date: NaiveDate) -> DateTime<Utc> {
        Utc.from_utc_datetime(&(date.and_time(NaiveTime::MIN) - self.offset))
    }

    /// The civil date of `instant` in the reference timezone
    fn civil_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kst() -> RefreshSchedule {
        RefreshSchedule::new(FixedOffset::east_opt(9 * 3600).unwrap())
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_monthly_day_clamped_to_28() {
        let schedule = kst();
        let now = utc("2026-01-10T00:00:00Z");
        let next = schedule
            .next_refresh(&RefreshPolicy::Monthly { day: 31 }, now)
            .unwrap();
        // 2026-01-28 00:00 +09:00 == 2026-01-27 15:00 UTC
        assert_eq!(next, utc("2026-01-27T15:00:00Z"));
    }

    #[test]
    fn test_monthly_advances_within_month_then_rolls_over() {
        let schedule = kst();
        let policy = RefreshPolicy::Monthly { day: 15 };

        let before = utc("2026-03-01T00:00:00Z");
        assert_eq!(
            schedule.next_refresh(&policy, before).unwrap(),
            utc("2026-03-14T15:00:00Z")
        );

        let after = utc("2026-03-20T00:00:00Z");
        assert_eq!(
            schedule.next_refresh(&policy, after).unwrap(),
            utc("2026-04-14T15:00:00Z")
        );
    }

    #[test]
    fn test_monthly_occurrence_equal_to_now_goes_to_next_month() {
        let schedule = kst();
        // exactly midnight on day 15 in reference time
        let now = utc("2026-03-14T15:00:00Z");
        let next = schedule
            .next_refresh(&RefreshPolicy::Monthly { day: 15 }, now)
            .unwrap();
        assert_eq!(next, utc("2026-04-14T15:00:00Z"));
    }

    #[test]
    fn test_monthly_december_rolls_to_january() {
        let schedule = kst();
        let now = utc("2026-12-20T00:00:00Z");
        let next = schedule
            .next_refresh(&RefreshPolicy::Monthly { day: 5 }, now)
            .unwrap();
        assert_eq!(next, utc("2027-01-04T15:00:00Z"));
    }

    #[test]
    fn test_fixed_date_one_shot() {
        let schedule = kst();
        let policy = RefreshPolicy::FixedDate {
            date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
        };
        assert_eq!(
            schedule.next_refresh(&policy, utc("2026-01-01T00:00:00Z")),
            Some(utc("2026-05-31T15:00:00Z"))
        );
        // already past: no further scheduled reset
        assert_eq!(schedule.next_refresh(&policy, utc("2026-07-01T00:00:00Z")), None);
    }

    #[test]
    fn test_campaign_end_absent_or_past_is_none() {
        let schedule = kst();
        let now = utc("2026-01-01T00:00:00Z");
        assert_eq!(
            schedule.next_refresh(&RefreshPolicy::CampaignEnd { end_date: None }, now),
            None
        );
        let past = RefreshPolicy::CampaignEnd {
            end_date: NaiveDate::from_ymd_opt(2025, 1, 1),
        };
        assert_eq!(schedule.next_refresh(&past, now), None);
    }

    #[test]
    fn test_is_due_monotonic() {
        let schedule = kst();
        let stored = utc("2026-02-01T00:00:00Z");
        assert!(!schedule.is_due(stored, utc("2026-01-31T23:59:59Z")));
        assert!(schedule.is_due(stored, stored));
        assert!(schedule.is_due(stored, utc("2026-02-01T00:00:01Z")));
        assert!(schedule.is_due(stored, utc("2027-01-01T00:00:00Z")));
    }

    #[test]
    fn test_describe() {
        let schedule = kst();
        assert_eq!(
            schedule.describe(Some(&RefreshPolicy::Monthly { day: 31 })),
            "resets monthly on day 28"
        );
        assert_eq!(schedule.describe(None), "no scheduled reset");
    }
}
