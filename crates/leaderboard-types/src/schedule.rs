//! Reset schedules and reset-boundary arithmetic.
//!
//! A leaderboard's `reset_schedule` column holds one of the keywords
//! `permanent`, `daily`, `weekly`, `monthly`, or a five-field cron
//! expression (`minute hour day-of-month month day-of-week`). Cron
//! expressions are parsed once, when the configuration is loaded.
//!
//! All boundary arithmetic happens in the service's fixed local offset:
//! `daily` resets at local midnight, `weekly` at Monday local midnight,
//! `monthly` on the first of the month at local midnight.

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc,
};
use serde::{Deserialize, Serialize};

/// Upper bound on search steps when walking a cron expression through
/// the calendar. Each step skips a whole month, day, hour, or minute.
const MAX_SEARCH_STEPS: u32 = 100_000;

/// Errors produced when parsing a reset schedule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// A cron expression did not have exactly five fields.
    #[error("cron expression needs 5 fields, got {0}")]
    WrongFieldCount(usize),

    /// A cron field could not be parsed or was out of range.
    #[error("invalid cron {field} field: {value:?}")]
    InvalidField {
        /// Name of the offending field (`minute`, `hour`, ...).
        field: &'static str,
        /// The text that failed to parse.
        value: String,
    },
}

/// A set of allowed values for one cron field, as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        1_u64.checked_shl(value).is_some_and(|bit| self.0 & bit != 0)
    }

    fn insert(&mut self, value: u32) {
        if let Some(bit) = 1_u64.checked_shl(value) {
            self.0 |= bit;
        }
    }
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a cron expression.
    ///
    /// Supports `*`, single values, ranges (`a-b`), steps (`*/n`, `a-b/n`,
    /// `a/n`) and comma-separated lists. Day-of-week accepts `0`-`7`
    /// where both `0` and `7` mean Sunday.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError`] if the expression is malformed.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(ScheduleError::WrongFieldCount(fields.len()));
        };

        let mut days_of_week = parse_field(dow, 0, 7, "day-of-week")?;
        if days_of_week.contains(7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            source: fields.join(" "),
            minutes: parse_field(minute, 0, 59, "minute")?,
            hours: parse_field(hour, 0, 23, "hour")?,
            days_of_month: parse_field(dom, 1, 31, "day-of-month")?,
            months: parse_field(month, 1, 12, "month")?,
            days_of_week,
            dom_restricted: !dom.starts_with('*'),
            dow_restricted: !dow.starts_with('*'),
        })
    }

    /// The normalized source expression.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self.days_of_week.contains(date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// Earliest matching minute strictly after `after` (local time).
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = truncate_minute(after)?.checked_add_signed(TimeDelta::minutes(1))?;
        for _ in 0..MAX_SEARCH_STEPS {
            if !self.months.contains(t.month()) {
                t = first_of_next_month(t.date())?.and_hms_opt(0, 0, 0)?;
            } else if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
            } else if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)?.checked_add_signed(TimeDelta::hours(1))?;
            } else if !self.minutes.contains(t.minute()) {
                t = t.checked_add_signed(TimeDelta::minutes(1))?;
            } else {
                return Some(t);
            }
        }
        None
    }

    /// Latest matching minute at or before `at` (local time).
    pub fn prev_at_or_before(&self, at: NaiveDateTime) -> Option<NaiveDateTime> {
        let one_minute = TimeDelta::minutes(1);
        let mut t = truncate_minute(at)?;
        for _ in 0..MAX_SEARCH_STEPS {
            if !self.months.contains(t.month()) {
                let first = t.date().with_day(1)?.and_hms_opt(0, 0, 0)?;
                t = first.checked_sub_signed(one_minute)?;
            } else if !self.day_matches(t.date()) {
                t = t.date().and_hms_opt(0, 0, 0)?.checked_sub_signed(one_minute)?;
            } else if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)?.checked_sub_signed(one_minute)?;
            } else if !self.minutes.contains(t.minute()) {
                t = t.checked_sub_signed(one_minute)?;
            } else {
                return Some(t);
            }
        }
        None
    }
}

fn parse_field(
    spec: &str,
    min: u32,
    max: u32,
    field: &'static str,
) -> Result<FieldSet, ScheduleError> {
    let invalid = || ScheduleError::InvalidField {
        field,
        value: spec.to_owned(),
    };
    let number = |s: &str| s.parse::<u32>().map_err(|_e| invalid());

    let mut set = FieldSet(0);
    for part in spec.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(number(step)?)),
            None => (part, None),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (number(a)?, number(b)?)
        } else {
            let v = number(range)?;
            if step.is_some() { (v, max) } else { (v, v) }
        };
        let step = step.unwrap_or(1);
        if step == 0 || lo < min || hi > max || lo > hi {
            return Err(invalid());
        }
        let mut v = lo;
        while v <= hi {
            set.insert(v);
            match v.checked_add(step) {
                Some(next) => v = next,
                None => break,
            }
        }
    }
    Ok(set)
}

fn truncate_minute(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.with_second(0)?.with_nanosecond(0)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year().checked_add(1)?, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month().checked_add(1)?, 1)
    }
}

/// When a leaderboard is automatically cleared.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResetSchedule {
    /// Never reset.
    #[default]
    Permanent,
    /// Every day at local midnight.
    Daily,
    /// Every Monday at local midnight.
    Weekly,
    /// On the first of every month at local midnight.
    Monthly,
    /// On every minute matched by a cron expression.
    Custom(CronSchedule),
}

impl ResetSchedule {
    /// The most recent reset boundary at or before `now`, or `None` for
    /// [`ResetSchedule::Permanent`] (or a cron expression that never fires).
    pub fn latest_boundary(&self, now: DateTime<Utc>, tz: FixedOffset) -> Option<DateTime<Utc>> {
        let local = now.with_timezone(&tz).naive_local();
        let boundary = match self {
            Self::Permanent => return None,
            Self::Daily => local.date().and_hms_opt(0, 0, 0)?,
            Self::Weekly => {
                let back = TimeDelta::days(i64::from(local.weekday().num_days_from_monday()));
                local.date().checked_sub_signed(back)?.and_hms_opt(0, 0, 0)?
            }
            Self::Monthly => local.date().with_day(1)?.and_hms_opt(0, 0, 0)?,
            Self::Custom(cron) => cron.prev_at_or_before(local)?,
        };
        to_utc(boundary, tz)
    }

    /// The first reset boundary strictly after `after`.
    pub fn next_boundary(&self, after: DateTime<Utc>, tz: FixedOffset) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz).naive_local();
        let boundary = match self {
            Self::Permanent => return None,
            Self::Daily => local.date().succ_opt()?.and_hms_opt(0, 0, 0)?,
            Self::Weekly => {
                let ahead = 7_u32.checked_sub(local.weekday().num_days_from_monday())?;
                local
                    .date()
                    .checked_add_signed(TimeDelta::days(i64::from(ahead)))?
                    .and_hms_opt(0, 0, 0)?
            }
            Self::Monthly => first_of_next_month(local.date())?.and_hms_opt(0, 0, 0)?,
            Self::Custom(cron) => cron.next_after(local)?,
        };
        to_utc(boundary, tz)
    }

    /// The boundary a reset is due for, if one was crossed since
    /// `reference` (the last reset, or creation time if never reset).
    pub fn due_boundary(
        &self,
        reference: DateTime<Utc>,
        now: DateTime<Utc>,
        tz: FixedOffset,
    ) -> Option<DateTime<Utc>> {
        self.latest_boundary(now, tz).filter(|b| *b > reference)
    }

    /// Whether this schedule ever resets.
    pub const fn is_periodic(&self) -> bool {
        !matches!(self, Self::Permanent)
    }
}

fn to_utc(local: NaiveDateTime, tz: FixedOffset) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

impl FromStr for ResetSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "permanent" | "" => Ok(Self::Permanent),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => CronSchedule::parse(trimmed).map(Self::Custom),
        }
    }
}

impl fmt::Display for ResetSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent => f.write_str("permanent"),
            Self::Daily => f.write_str("daily"),
            Self::Weekly => f.write_str("weekly"),
            Self::Monthly => f.write_str("monthly"),
            Self::Custom(cron) => f.write_str(cron.as_str()),
        }
    }
}

impl TryFrom<String> for ResetSchedule {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResetSchedule> for String {
    fn from(schedule: ResetSchedule) -> Self {
        schedule.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn offset(secs: i32) -> FixedOffset {
        FixedOffset::east_opt(secs).unwrap()
    }

    #[test]
    fn daily_reset_due_after_midnight() {
        let last = utc("2026-10-18T23:59:59Z");
        let now = utc("2026-10-19T00:00:30Z");
        let due = ResetSchedule::Daily.due_boundary(last, now, offset(0));
        assert_eq!(due, Some(utc("2026-10-19T00:00:00Z")));
    }

    #[test]
    fn daily_reset_not_due_twice() {
        let last = utc("2026-10-19T00:00:00Z");
        let now = utc("2026-10-19T13:00:00Z");
        assert_eq!(ResetSchedule::Daily.due_boundary(last, now, offset(0)), None);
    }

    #[test]
    fn daily_boundary_respects_local_offset() {
        // 00:00:30 at UTC+8.
        let now = utc("2026-10-18T16:00:30Z");
        let boundary = ResetSchedule::Daily.latest_boundary(now, offset(8 * 3600));
        assert_eq!(boundary, Some(utc("2026-10-18T16:00:00Z")));
    }

    #[test]
    fn weekly_boundary_is_monday() {
        let now = utc("2026-10-22T10:00:00Z"); // Thursday
        let boundary = ResetSchedule::Weekly.latest_boundary(now, offset(0));
        assert_eq!(boundary, Some(utc("2026-10-19T00:00:00Z")));
        let next = ResetSchedule::Weekly.next_boundary(now, offset(0));
        assert_eq!(next, Some(utc("2026-10-26T00:00:00Z")));
    }

    #[test]
    fn monthly_boundary_is_first_of_month() {
        let now = utc("2026-12-31T23:00:00Z");
        assert_eq!(
            ResetSchedule::Monthly.latest_boundary(now, offset(0)),
            Some(utc("2026-12-01T00:00:00Z"))
        );
        assert_eq!(
            ResetSchedule::Monthly.next_boundary(now, offset(0)),
            Some(utc("2027-01-01T00:00:00Z"))
        );
    }

    #[test]
    fn permanent_never_resets() {
        let now = utc("2026-10-19T00:00:00Z");
        assert_eq!(ResetSchedule::Permanent.latest_boundary(now, offset(0)), None);
        assert!(!ResetSchedule::Permanent.is_periodic());
    }

    #[test]
    fn cron_step_next_after() {
        let cron = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(cron.next_after(naive("2026-10-19 10:07")), Some(naive("2026-10-19 10:15")));
        assert_eq!(cron.next_after(naive("2026-10-19 10:45")), Some(naive("2026-10-19 11:00")));
    }

    #[test]
    fn cron_prev_finds_monday_morning() {
        let cron = CronSchedule::parse("0 9 * * 1").unwrap();
        assert_eq!(
            cron.prev_at_or_before(naive("2026-10-21 12:00")),
            Some(naive("2026-10-19 09:00"))
        );
        assert_eq!(
            cron.prev_at_or_before(naive("2026-10-19 09:00")),
            Some(naive("2026-10-19 09:00"))
        );
    }

    #[test]
    fn cron_day_fields_are_ored() {
        // The 13th of any month, or any Friday.
        let cron = CronSchedule::parse("0 0 13 * 5").unwrap();
        assert_eq!(cron.next_after(naive("2026-10-19 00:00")), Some(naive("2026-10-23 00:00")));
        assert_eq!(cron.next_after(naive("2026-11-07 00:00")), Some(naive("2026-11-13 00:00")));
    }

    #[test]
    fn cron_sunday_as_seven() {
        let cron = CronSchedule::parse("30 2 * * 7").unwrap();
        assert_eq!(cron.next_after(naive("2026-10-19 00:00")), Some(naive("2026-10-25 02:30")));
    }

    #[test]
    fn cron_lists_and_ranges() {
        let cron = CronSchedule::parse("0 8-10,20 1 1-3 *").unwrap();
        assert_eq!(cron.next_after(naive("2026-10-19 00:00")), Some(naive("2027-01-01 08:00")));
        assert_eq!(cron.prev_at_or_before(naive("2026-10-19 00:00")), Some(naive("2026-03-01 20:00")));
    }

    #[test]
    fn cron_rejects_bad_input() {
        assert_eq!(CronSchedule::parse("* * *"), Err(ScheduleError::WrongFieldCount(3)));
        assert!(CronSchedule::parse("61 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-1 * * * *").is_err());
        assert!(CronSchedule::parse("x * * * *").is_err());
    }

    #[test]
    fn custom_schedule_boundary() {
        let schedule: ResetSchedule = "0 */6 * * *".parse().unwrap();
        let now = utc("2026-10-19T13:20:00Z");
        assert_eq!(schedule.latest_boundary(now, offset(0)), Some(utc("2026-10-19T12:00:00Z")));
        assert_eq!(
            schedule.due_boundary(utc("2026-10-19T06:00:00Z"), now, offset(0)),
            Some(utc("2026-10-19T12:00:00Z"))
        );
    }

    #[test]
    fn schedule_round_trips_through_strings() {
        for text in ["permanent", "daily", "weekly", "monthly", "15 4 * * 1-5"] {
            let schedule: ResetSchedule = text.parse().unwrap();
            assert_eq!(schedule.to_string(), text);
        }
        let json = serde_json::to_string(&ResetSchedule::Weekly).unwrap();
        assert_eq!(json, "\"weekly\"");
        let bad: Result<ResetSchedule, _> = serde_json::from_str("\"every tuesday\"");
        assert!(bad.is_err());
    }
}
