//! Cron expression evaluation.
//!
//! Self-contained 5-field parser (minute hour day-of-month month weekday)
//! and next-occurrence search. Supports `*`, literals, `a-b` ranges, `*/N`
//! and `a-b/N` steps, and comma lists. Pure functions over (expression,
//! timestamp); no third-party cron parser.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidExpression { expr: String, reason: String },
    #[error("cron expression '{0}' never matches a real date")]
    NeverMatches(String),
}

/// How far ahead `next_after` searches before declaring the schedule
/// unsatisfiable. Four years covers a leap cycle, so anything not found
/// by then (e.g. `0 0 30 2 *`) never fires.
const SEARCH_HORIZON_DAYS: i64 = 365 * 4 + 2;

/// One parsed field: either unrestricted (`*`) or a bitmask of allowed values.
#[derive(Debug, Clone, Copy)]
struct Field {
    any: bool,
    mask: u64,
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        self.any || (self.mask >> value) & 1 == 1
    }

    fn restricted(&self) -> bool {
        !self.any
    }
}

fn parse_field(text: &str, min: u32, max: u32, is_weekday: bool) -> Result<Field, String> {
    if text == "*" {
        return Ok(Field { any: true, mask: 0 });
    }

    let mut mask = 0u64;
    for part in text.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((b, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| format!("bad step '{s}'"))?;
                if step == 0 {
                    return Err("step must be at least 1".into());
                }
                (b, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if base == "*" {
            (min, max)
        } else if let Some((a, b)) = base.split_once('-') {
            let lo: u32 = a.parse().map_err(|_| format!("bad number '{a}'"))?;
            let hi: u32 = b.parse().map_err(|_| format!("bad number '{b}'"))?;
            if lo > hi {
                return Err(format!("reversed range '{base}'"));
            }
            (lo, hi)
        } else {
            let v: u32 = base.parse().map_err(|_| format!("bad number '{base}'"))?;
            // A bare value with a step ("5/10") ranges to the field max.
            if step > 1 { (v, max) } else { (v, v) }
        };

        if lo < min || hi > max {
            return Err(format!("value out of range {min}-{max} in '{part}'"));
        }

        let mut v = lo;
        while v <= hi {
            // Weekday 7 is an alias for Sunday (0).
            let bit = if is_weekday && v == 7 { 0 } else { v };
            mask |= 1u64 << bit;
            v += step;
        }
    }

    Ok(Field { any: false, mask })
}

/// A parsed 5-field cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    weekday: Field,
}

impl CronSchedule {
    /// Parse a 5-field expression, validating each field's range
    /// (minute 0-59, hour 0-23, day 1-31, month 1-12, weekday 0-7).
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let invalid = |reason: String| ScheduleError::InvalidExpression {
            expr: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, got {}", fields.len())));
        }

        Ok(Self {
            minute: parse_field(fields[0], 0, 59, false).map_err(&invalid)?,
            hour: parse_field(fields[1], 0, 23, false).map_err(&invalid)?,
            day_of_month: parse_field(fields[2], 1, 31, false).map_err(&invalid)?,
            month: parse_field(fields[3], 1, 12, false).map_err(&invalid)?,
            weekday: parse_field(fields[4], 0, 7, true).map_err(&invalid)?,
        })
    }

    /// Standard cron quirk: when both day-of-month and weekday are
    /// restricted, matching either is sufficient; otherwise the restricted
    /// one (if any) must match.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.day_of_month.matches(date.day());
        let dow = self.weekday.matches(date.weekday().num_days_from_sunday());
        match (self.day_of_month.restricted(), self.weekday.restricted()) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// The earliest minute-aligned timestamp strictly after `from` that
    /// satisfies the schedule, or `None` within the search horizon.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = truncate_to_minute(from) + Duration::minutes(1);
        let end = from + Duration::days(SEARCH_HORIZON_DAYS);

        while t <= end {
            if !self.month.matches(t.month()) {
                t = next_month_start(t);
                continue;
            }
            if !self.day_matches(t.date_naive()) {
                t = day_start(t.date_naive().succ_opt()?);
                continue;
            }
            if !self.hour.matches(t.hour()) {
                t = truncate_to_hour(t) + Duration::hours(1);
                continue;
            }
            if !self.minute.matches(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}

/// Compute the next run time strictly after `from` for a raw expression.
pub fn next_run_after(expression: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule = CronSchedule::parse(expression)?;
    schedule
        .next_after(from)
        .ok_or_else(|| ScheduleError::NeverMatches(expression.to_string()))
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_minute(t).with_minute(0).unwrap_or(t)
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

fn next_month_start(t: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    // Day 1 of any month always exists.
    day_start(NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(t.date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_every_minute_rounds_up() {
        let from = at(2024, 3, 15, 10, 0, 30);
        let next = next_run_after("* * * * *", from).unwrap();
        assert_eq!(next, at(2024, 3, 15, 10, 1, 0));

        // Exactly on a minute boundary still moves strictly forward
        let from = at(2024, 3, 15, 10, 0, 0);
        let next = next_run_after("* * * * *", from).unwrap();
        assert_eq!(next, at(2024, 3, 15, 10, 1, 0));
    }

    #[test]
    fn test_new_year_rollover() {
        let next = next_run_after("0 0 1 1 *", at(2024, 3, 15, 10, 0, 0)).unwrap();
        assert_eq!(next, at(2025, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_literal_fields() {
        let next = next_run_after("30 14 * * *", at(2024, 3, 15, 9, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 15, 14, 30, 0));

        // Past today's slot: tomorrow
        let next = next_run_after("30 14 * * *", at(2024, 3, 15, 15, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 16, 14, 30, 0));
    }

    #[test]
    fn test_weekday_field() {
        // 2024-03-15 is a Friday; next Monday is the 18th
        let next = next_run_after("0 0 * * 1", at(2024, 3, 15, 10, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 18, 0, 0, 0));
    }

    #[test]
    fn test_weekday_seven_is_sunday() {
        let from = at(2024, 3, 15, 10, 0, 0);
        let a = next_run_after("0 0 * * 0", from).unwrap();
        let b = next_run_after("0 0 * * 7", from).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, at(2024, 3, 17, 0, 0, 0));
    }

    #[test]
    fn test_dom_dow_or_quirk() {
        // Both restricted: earlier of day 15 or a Monday wins.
        // From Friday 2024-03-01, next Monday (Mar 4) beats day 15.
        let next = next_run_after("0 0 15 * 1", at(2024, 3, 1, 10, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 4, 0, 0, 0));

        // Only dom restricted: weekday is ignored
        let next = next_run_after("0 0 15 * *", at(2024, 3, 1, 10, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 15, 0, 0, 0));
    }

    #[test]
    fn test_step_field() {
        let next = next_run_after("*/15 * * * *", at(2024, 3, 15, 10, 32, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 15, 10, 45, 0));
    }

    #[test]
    fn test_range_and_list() {
        // Weekdays at 9:00 and 17:00
        let sched = CronSchedule::parse("0 9,17 * * 1-5").unwrap();
        // Friday 16:30 -> Friday 17:00
        let next = sched.next_after(at(2024, 3, 15, 16, 30, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 15, 17, 0, 0));
        // Friday 18:00 -> Monday 09:00
        let next = sched.next_after(at(2024, 3, 15, 18, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 18, 9, 0, 0));
    }

    #[test]
    fn test_range_with_step() {
        let next = next_run_after("10-40/10 * * * *", at(2024, 3, 15, 10, 22, 0)).unwrap();
        assert_eq!(next, at(2024, 3, 15, 10, 30, 0));
    }

    #[test]
    fn test_result_satisfies_restricted_fields() {
        let from = at(2024, 6, 3, 11, 7, 42);
        let next = next_run_after("5 4 * 7 *", from).unwrap();
        assert!(next > from);
        assert_eq!(next.minute(), 5);
        assert_eq!(next.hour(), 4);
        assert_eq!(next.month(), 7);
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in [
            "",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * 32 * *",
            "* * * 13 *",
            "* * * * 8",
            "a * * * *",
            "1-0 * * * *",
            "*/0 * * * *",
            "1;2 * * * *",
        ] {
            let err = next_run_after(expr, Utc::now());
            assert!(
                matches!(err, Err(ScheduleError::InvalidExpression { .. })),
                "expected InvalidExpression for {expr:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_never_matches() {
        // February 30th does not exist
        let err = next_run_after("0 0 30 2 *", at(2024, 1, 1, 0, 0, 0));
        assert!(matches!(err, Err(ScheduleError::NeverMatches(_))));
    }

    #[test]
    fn test_leap_day() {
        let next = next_run_after("0 12 29 2 *", at(2023, 3, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 2, 29, 12, 0, 0));
    }
}
