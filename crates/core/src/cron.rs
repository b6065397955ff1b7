//! Five-field cron expression parsing and next-fire computation.
//!
//! Supports the classic `minute hour day-of-month month day-of-week`
//! layout with `*`, single values, lists (`1,15,30`), ranges (`1-5`),
//! and step values (`*/15`, `10-50/10`). Day-of-week uses 0-6 with
//! Sunday as 0 (7 is accepted as an alias for Sunday).
//!
//! [`CronSchedule::next_after`] is pure arithmetic over UTC wall-clock
//! time; the scheduler feeds it the previous *scheduled* time so fires
//! do not drift with processing latency.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use thiserror::Error;

/// Cron expression rejection reasons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronParseError {
    /// The expression does not have exactly five whitespace-separated fields.
    #[error("expected 5 cron fields, found {found}")]
    FieldCount {
        /// Number of fields present.
        found: usize,
    },
    /// A field contains a malformed or out-of-range entry.
    #[error("invalid {field} field: {spec:?}")]
    Field {
        /// Which field failed (`"minute"`, `"hour"`, ...).
        field: &'static str,
        /// The offending field text.
        spec: String,
    },
}

/// A parsed cron schedule.
///
/// Equality and serialization use the original expression text.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    minutes: BTreeSet<u8>,
    hours: BTreeSet<u8>,
    days_of_month: BTreeSet<u8>,
    months: BTreeSet<u8>,
    days_of_week: BTreeSet<u8>,
    /// Bare `*` flags for the standard dom/dow OR rule.
    dom_is_star: bool,
    dow_is_star: bool,
}

impl CronSchedule {
    /// Parses a five-field cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`CronParseError`] on a malformed expression.
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError::FieldCount {
                found: fields.len(),
            });
        }

        let (minutes, _) = parse_field(fields[0], "minute", 0, 59)?;
        let (hours, _) = parse_field(fields[1], "hour", 0, 23)?;
        let (days_of_month, dom_is_star) = parse_field(fields[2], "day-of-month", 1, 31)?;
        let (months, _) = parse_field(fields[3], "month", 1, 12)?;
        let (mut days_of_week, dow_is_star) = parse_field(fields[4], "day-of-week", 0, 7)?;

        // 7 is an alias for Sunday.
        if days_of_week.remove(&7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            expr: expr.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_is_star,
            dow_is_star,
        })
    }

    /// Returns the original expression text.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// Computes the next matching minute strictly after `after`.
    ///
    /// Returns `None` only for schedules that can never fire (e.g.
    /// `0 0 30 2 *`), detected by bounding the search.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?
            + Duration::minutes(1);

        // Day-level skipping keeps the bound generous: 100k iterations
        // covers centuries of non-matching days.
        for _ in 0..100_000 {
            if !self.months.contains(&u8_from(t.month())) {
                t = start_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t) {
                t = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !self.hours.contains(&u8_from(t.hour())) {
                t = (t + Duration::hours(1)).with_minute(0)?;
                continue;
            }
            if !self.minutes.contains(&u8_from(t.minute())) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }

    /// Standard cron day rule: when both day fields are restricted, a
    /// day matches if *either* matches; otherwise the restricted field
    /// (if any) decides.
    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        let dom = self.days_of_month.contains(&u8_from(t.day()));
        let dow = self
            .days_of_week
            .contains(&u8_from(t.weekday().num_days_from_sunday()));

        match (self.dom_is_star, self.dow_is_star) {
            (true, true) => true,
            (false, true) => dom,
            (true, false) => dow,
            (false, false) => dom || dow,
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

#[allow(clippy::cast_possible_truncation)]
fn u8_from(value: u32) -> u8 {
    // Calendar components all fit in u8.
    value as u8
}

fn start_of_next_month(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Some(
        NaiveDate::from_ymd_opt(year, month, 1)?
            .and_hms_opt(0, 0, 0)?
            .and_utc(),
    )
}

/// Parses one cron field into its value set. Returns the set and
/// whether the field was a bare `*`.
fn parse_field(
    spec: &str,
    field: &'static str,
    min: u8,
    max: u8,
) -> Result<(BTreeSet<u8>, bool), CronParseError> {
    let err = || CronParseError::Field {
        field,
        spec: spec.to_string(),
    };

    let mut values = BTreeSet::new();
    for part in spec.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u8 = step.parse().map_err(|_| err())?;
                if step == 0 {
                    return Err(err());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            let lo: u8 = lo.parse().map_err(|_| err())?;
            let hi: u8 = hi.parse().map_err(|_| err())?;
            (lo, hi)
        } else {
            let v: u8 = range.parse().map_err(|_| err())?;
            // A bare value with a step (`5/2`) is not meaningful.
            if step != 1 {
                return Err(err());
            }
            (v, v)
        };

        if lo < min || hi > max || lo > hi {
            return Err(err());
        }
        values.extend((lo..=hi).step_by(usize::from(step)));
    }

    if values.is_empty() {
        return Err(err());
    }
    Ok((values, spec == "*"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn every_minute() {
        let sched = CronSchedule::parse("* * * * *").unwrap();
        let next = sched.next_after(utc(2026, 8, 28, 10, 30)).unwrap();
        assert_eq!(next, utc(2026, 8, 28, 10, 31));
    }

    #[test]
    fn strictly_after_even_at_exact_match() {
        // next_after from a matching minute returns the following fire.
        let sched = CronSchedule::parse("30 10 * * *").unwrap();
        let next = sched.next_after(utc(2026, 8, 28, 10, 30)).unwrap();
        assert_eq!(next, utc(2026, 8, 29, 10, 30));
    }

    #[test]
    fn seconds_are_truncated() {
        let sched = CronSchedule::parse("* * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 8, 28, 10, 30, 45).unwrap();
        assert_eq!(sched.next_after(after).unwrap(), utc(2026, 8, 28, 10, 31));
    }

    #[test]
    fn hourly_at_minute() {
        let sched = CronSchedule::parse("15 * * * *").unwrap();
        assert_eq!(
            sched.next_after(utc(2026, 8, 28, 10, 20)).unwrap(),
            utc(2026, 8, 28, 11, 15)
        );
        assert_eq!(
            sched.next_after(utc(2026, 8, 28, 10, 10)).unwrap(),
            utc(2026, 8, 28, 10, 15)
        );
    }

    #[test]
    fn daily_rollover() {
        let sched = CronSchedule::parse("0 9 * * *").unwrap();
        assert_eq!(
            sched.next_after(utc(2026, 8, 28, 12, 0)).unwrap(),
            utc(2026, 8, 29, 9, 0)
        );
    }

    #[test]
    fn month_rollover() {
        let sched = CronSchedule::parse("0 0 1 * *").unwrap();
        assert_eq!(
            sched.next_after(utc(2026, 8, 28, 12, 0)).unwrap(),
            utc(2026, 9, 1, 0, 0)
        );
    }

    #[test]
    fn year_rollover() {
        let sched = CronSchedule::parse("0 0 1 1 *").unwrap();
        assert_eq!(
            sched.next_after(utc(2026, 3, 1, 0, 0)).unwrap(),
            utc(2027, 1, 1, 0, 0)
        );
    }

    #[test]
    fn step_values() {
        let sched = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(
            sched.next_after(utc(2026, 8, 28, 10, 0)).unwrap(),
            utc(2026, 8, 28, 10, 15)
        );
        assert_eq!(
            sched.next_after(utc(2026, 8, 28, 10, 46)).unwrap(),
            utc(2026, 8, 28, 11, 0)
        );
    }

    #[test]
    fn ranges_and_lists() {
        let sched = CronSchedule::parse("0 9-11,14 * * *").unwrap();
        assert_eq!(
            sched.next_after(utc(2026, 8, 28, 11, 30)).unwrap(),
            utc(2026, 8, 28, 14, 0)
        );
        assert_eq!(
            sched.next_after(utc(2026, 8, 28, 15, 0)).unwrap(),
            utc(2026, 8, 29, 9, 0)
        );
    }

    #[test]
    fn range_with_step() {
        let sched = CronSchedule::parse("10-50/20 * * * *").unwrap();
        // Matches minutes 10, 30, 50.
        assert_eq!(
            sched.next_after(utc(2026, 8, 28, 10, 11)).unwrap(),
            utc(2026, 8, 28, 10, 30)
        );
    }

    #[test]
    fn weekday_schedule() {
        // 2026-08-28 is a Friday; next Monday is 08-31.
        let sched = CronSchedule::parse("0 8 * * 1").unwrap();
        assert_eq!(
            sched.next_after(utc(2026, 8, 28, 9, 0)).unwrap(),
            utc(2026, 8, 31, 8, 0)
        );
    }

    #[test]
    fn sunday_alias_seven() {
        let with_zero = CronSchedule::parse("0 8 * * 0").unwrap();
        let with_seven = CronSchedule::parse("0 8 * * 7").unwrap();
        let after = utc(2026, 8, 28, 0, 0);
        assert_eq!(with_zero.next_after(after), with_seven.next_after(after));
    }

    #[test]
    fn dom_dow_or_rule() {
        // Both restricted: fires on the 15th OR on Mondays.
        let sched = CronSchedule::parse("0 0 15 * 1").unwrap();
        // From Friday 2026-08-28: Monday 08-31 comes before the 15th.
        assert_eq!(
            sched.next_after(utc(2026, 8, 28, 0, 0)).unwrap(),
            utc(2026, 8, 31, 0, 0)
        );
    }

    #[test]
    fn impossible_date_returns_none() {
        let sched = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(sched.next_after(utc(2026, 1, 1, 0, 0)), None);
    }

    #[test]
    fn leap_day() {
        let sched = CronSchedule::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            sched.next_after(utc(2026, 1, 1, 0, 0)).unwrap(),
            utc(2028, 2, 29, 0, 0)
        );
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(
            CronSchedule::parse("* * * *"),
            Err(CronParseError::FieldCount { found: 4 })
        );
        assert!(matches!(
            CronSchedule::parse("* * * * * *"),
            Err(CronParseError::FieldCount { found: 6 })
        ));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronSchedule::parse("60 * * * *").is_err());
        assert!(CronSchedule::parse("* 24 * * *").is_err());
        assert!(CronSchedule::parse("* * 0 * *").is_err());
        assert!(CronSchedule::parse("* * 32 * *").is_err());
        assert!(CronSchedule::parse("* * * 13 *").is_err());
        assert!(CronSchedule::parse("* * * * 8").is_err());
    }

    #[test]
    fn rejects_malformed_fields() {
        assert!(CronSchedule::parse("a * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("5-1 * * * *").is_err());
        assert!(CronSchedule::parse("5/2 * * * *").is_err());
        assert!(CronSchedule::parse(" * * * *").is_err());
    }

    #[test]
    fn from_str_and_display_roundtrip() {
        let sched: CronSchedule = "*/5 9-17 * * 1-5".parse().unwrap();
        assert_eq!(sched.to_string(), "*/5 9-17 * * 1-5");
        assert_eq!(sched.expression(), "*/5 9-17 * * 1-5");
    }
}
