//! Cron-style schedule expressions
//!
//! Parses five-field (`minute hour day-of-month month day-of-week`) or
//! six-field (leading seconds) expressions and computes the next fire
//! instant after a given instant in any `chrono` time zone.
//!
//! Day-of-month and day-of-week are combined with OR when both fields are
//! restricted, and with AND when either one starts with `*` or `?`.

use chrono::{
    DateTime, Datelike, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone,
    Timelike,
};
use std::fmt;
use std::str::FromStr;

use crate::errors::ScheduleError;

/// How far ahead `next_fire_after` searches before giving up
pub const LOOKAHEAD_YEARS: i32 = 8;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Field::Second => "second",
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        }
    }

    fn bounds(self) -> (u32, u32) {
        match self {
            Field::Second | Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 6),
        }
    }

    /// Symbolic names and the numeric value of the first name
    fn names(self) -> Option<(&'static [&'static str], u32)> {
        match self {
            Field::Month => Some((&MONTH_NAMES, 1)),
            Field::DayOfWeek => Some((&WEEKDAY_NAMES, 0)),
            _ => None,
        }
    }

    fn accepts_question_mark(self) -> bool {
        matches!(self, Field::DayOfMonth | Field::DayOfWeek)
    }
}

/// Set of allowed values for one field, stored as a bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    /// Field text began with `*` or `?`
    star: bool,
}

impl FieldSet {
    fn single(value: u32) -> Self {
        Self {
            bits: 1 << value,
            star: false,
        }
    }

    fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }
}

/// A parsed, immutable schedule expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleExpression {
    source: String,
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl ScheduleExpression {
    /// Parse an expression, rejecting bad field counts and out-of-domain values
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::invalid(expression, "expression is empty"));
        }

        let expanded = if trimmed.starts_with('@') {
            expand_descriptor(trimmed).ok_or_else(|| {
                ScheduleError::invalid(expression, format!("unknown descriptor '{trimmed}'"))
            })?
        } else {
            trimmed
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let (seconds, rest) = match fields.len() {
            5 => (None, &fields[..]),
            6 => (Some(fields[0]), &fields[1..]),
            n => {
                return Err(ScheduleError::invalid(
                    expression,
                    format!("expected 5 or 6 fields, found {n}"),
                ));
            }
        };

        let field = |text: &str, kind: Field| {
            parse_field(text, kind).map_err(|reason| ScheduleError::invalid(expression, reason))
        };

        Ok(Self {
            source: trimmed.to_string(),
            seconds: match seconds {
                Some(text) => field(text, Field::Second)?,
                None => FieldSet::single(0),
            },
            minutes: field(rest[0], Field::Minute)?,
            hours: field(rest[1], Field::Hour)?,
            days_of_month: field(rest[2], Field::DayOfMonth)?,
            months: field(rest[3], Field::Month)?,
            days_of_week: field(rest[4], Field::DayOfWeek)?,
        })
    }

    /// The expression as it was written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Compute the first fire instant strictly after `after`
    ///
    /// Evaluation happens in `after`'s time zone. Local times skipped by a
    /// DST transition never fire; repeated local times fire at the earliest
    /// instant that is still after `after`.
    pub fn next_fire_after<Tz: TimeZone>(
        &self,
        after: &DateTime<Tz>,
    ) -> Result<DateTime<Tz>, ScheduleError> {
        let tz = after.timezone();
        let local = after.naive_local();
        let limit_year = local.year() + LOOKAHEAD_YEARS;

        let whole_second = local.with_nanosecond(0).unwrap_or(local);
        let mut t = self.advance(whole_second, TimeDelta::seconds(1))?;

        loop {
            if t.year() > limit_year {
                return Err(self.unsatisfiable());
            }

            if !self.months.contains(t.month()) {
                t = self.start_of_next_month(t.date())?;
                continue;
            }

            if !self.day_matches(t.date()) {
                let next_day = t.date().succ_opt().ok_or_else(|| self.unsatisfiable())?;
                t = next_day.and_time(NaiveTime::MIN);
                continue;
            }

            if !self.hours.contains(t.hour()) {
                let hour_start = self.truncate(t, t.hour(), 0)?;
                t = self.advance(hour_start, TimeDelta::hours(1))?;
                continue;
            }

            if !self.minutes.contains(t.minute()) {
                let minute_start = self.truncate(t, t.hour(), t.minute())?;
                t = self.advance(minute_start, TimeDelta::minutes(1))?;
                continue;
            }

            if !self.seconds.contains(t.second()) {
                t = self.advance(t, TimeDelta::seconds(1))?;
                continue;
            }

            let candidate = match tz.from_local_datetime(&t) {
                LocalResult::Single(dt) => Some(dt),
                LocalResult::Ambiguous(earliest, latest) => {
                    if earliest > *after {
                        Some(earliest)
                    } else {
                        Some(latest)
                    }
                }
                LocalResult::None => None,
            };

            if let Some(dt) = candidate {
                if dt > *after {
                    return Ok(dt);
                }
            }
            t = self.advance(t, TimeDelta::seconds(1))?;
        }
    }

    /// Successive fire instants after `after`, ending at the lookahead bound
    pub fn upcoming<Tz: TimeZone>(&self, after: DateTime<Tz>) -> impl Iterator<Item = DateTime<Tz>> {
        let mut cursor = after;
        std::iter::from_fn(move || {
            let next = self.next_fire_after(&cursor).ok()?;
            cursor = next.clone();
            Some(next)
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());

        if self.days_of_month.star || self.days_of_week.star {
            dom && dow
        } else {
            dom || dow
        }
    }

    fn start_of_next_month(&self, date: NaiveDate) -> Result<NaiveDateTime, ScheduleError> {
        let (year, month) = if date.month() == 12 {
            (date.year() + 1, 1)
        } else {
            (date.year(), date.month() + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|d| d.and_time(NaiveTime::MIN))
            .ok_or_else(|| self.unsatisfiable())
    }

    fn truncate(
        &self,
        t: NaiveDateTime,
        hour: u32,
        minute: u32,
    ) -> Result<NaiveDateTime, ScheduleError> {
        t.date()
            .and_hms_opt(hour, minute, 0)
            .ok_or_else(|| self.unsatisfiable())
    }

    fn advance(&self, t: NaiveDateTime, delta: TimeDelta) -> Result<NaiveDateTime, ScheduleError> {
        t.checked_add_signed(delta)
            .ok_or_else(|| self.unsatisfiable())
    }

    fn unsatisfiable(&self) -> ScheduleError {
        ScheduleError::UnsatisfiableExpression {
            expression: self.source.clone(),
            years: LOOKAHEAD_YEARS,
        }
    }
}

impl FromStr for ScheduleExpression {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ScheduleExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn expand_descriptor(descriptor: &str) -> Option<&'static str> {
    match descriptor.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Some("0 0 1 1 *"),
        "@monthly" => Some("0 0 1 * *"),
        "@weekly" => Some("0 0 * * 0"),
        "@daily" | "@midnight" => Some("0 0 * * *"),
        "@hourly" => Some("0 * * * *"),
        _ => None,
    }
}

fn parse_field(text: &str, field: Field) -> Result<FieldSet, String> {
    let mut bits = 0u64;
    for part in text.split(',') {
        if part.is_empty() {
            return Err(format!("empty entry in {} field '{}'", field.name(), text));
        }
        bits |= parse_part(part, field)?;
    }

    Ok(FieldSet {
        bits,
        star: text.starts_with('*') || text.starts_with('?'),
    })
}

fn parse_part(part: &str, field: Field) -> Result<u64, String> {
    let (min, max) = field.bounds();

    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(parse_step(step, field)?)),
        None => (part, None),
    };

    let is_wildcard = range == "*" || (range == "?" && field.accepts_question_mark());
    let (start, end) = if is_wildcard {
        (min, max)
    } else if let Some((low, high)) = range.split_once('-') {
        let (low, high) = (parse_value(low, field)?, parse_value(high, field)?);
        if low > high {
            return Err(format!(
                "range start {low} is after range end {high} in {} field",
                field.name()
            ));
        }
        (low, high)
    } else {
        let value = parse_value(range, field)?;
        // `a/n` runs from `a` to the field maximum
        if step.is_some() { (value, max) } else { (value, value) }
    };

    let step = step.unwrap_or(1);
    let mut bits = 0u64;
    let mut value = start;
    while value <= end {
        bits |= 1 << value;
        value += step;
    }
    Ok(bits)
}

fn parse_step(text: &str, field: Field) -> Result<u32, String> {
    let (_, max) = field.bounds();
    let step: u32 = text
        .parse()
        .map_err(|_| format!("invalid step '{}' in {} field", text, field.name()))?;

    if step == 0 {
        return Err(format!("step must be at least 1 in {} field", field.name()));
    }
    if step > max {
        return Err(format!(
            "step {} exceeds the {} field maximum of {}",
            step,
            field.name(),
            max
        ));
    }
    Ok(step)
}

fn parse_value(text: &str, field: Field) -> Result<u32, String> {
    let (min, max) = field.bounds();

    if let Ok(value) = text.parse::<u32>() {
        if value < min || value > max {
            return Err(format!(
                "value {} out of range {}-{} for {} field",
                value,
                min,
                max,
                field.name()
            ));
        }
        return Ok(value);
    }

    if let Some((names, first)) = field.names() {
        if let Some(index) = names.iter().position(|n| n.eq_ignore_ascii_case(text)) {
            return Ok(first + index as u32);
        }
    }

    Err(format!("invalid value '{}' in {} field", text, field.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use chrono_tz::Europe::London;
    use proptest::prelude::*;
    use rstest::rstest;

    fn utc(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn next(expression: &str, after: &str) -> DateTime<Utc> {
        ScheduleExpression::parse(expression)
            .unwrap()
            .next_fire_after(&utc(after))
            .unwrap()
    }

    #[rstest]
    #[case("*/61 * * * *")]
    #[case("* * * *")]
    #[case("* * * * * * *")]
    #[case("")]
    #[case("60 * * * *")]
    #[case("* 24 * * *")]
    #[case("* * 0 * *")]
    #[case("* * 32 * *")]
    #[case("* * * 13 *")]
    #[case("* * * * 7")]
    #[case("*/0 * * * *")]
    #[case("5-1 * * * *")]
    #[case("? * * * *")]
    #[case("1,,2 * * * *")]
    #[case("a * * * *")]
    #[case("-5 * * * *")]
    #[case("@every 5m")]
    #[case("60 * * * * *")]
    fn test_parse_rejects_invalid_expressions(#[case] expression: &str) {
        let result = ScheduleExpression::parse(expression);
        assert!(
            matches!(result, Err(ScheduleError::InvalidExpression { .. })),
            "expected '{expression}' to be rejected, got {result:?}"
        );
    }

    #[rstest]
    #[case("*/5 * * * *")]
    #[case("0 0 * * *")]
    #[case("30 2 1-15/2 JAN-MAR mon-fri")]
    #[case("0 12 ? * *")]
    #[case("*/10 * * * * *")]
    #[case("0,15,30,45 9-17 * * 1-5")]
    #[case("@daily")]
    #[case("@Hourly")]
    #[case("  0 0 1 1 *  ")]
    fn test_parse_accepts_valid_expressions(#[case] expression: &str) {
        assert!(ScheduleExpression::parse(expression).is_ok());
    }

    #[test]
    fn test_every_five_minutes_sequence() {
        let expr = ScheduleExpression::parse("*/5 * * * *").unwrap();
        let fires: Vec<_> = expr
            .upcoming(utc("2024-01-01T00:00:00Z"))
            .take(3)
            .collect();

        assert_eq!(
            fires,
            vec![
                utc("2024-01-01T00:05:00Z"),
                utc("2024-01-01T00:10:00Z"),
                utc("2024-01-01T00:15:00Z"),
            ]
        );
    }

    #[test]
    fn test_rolls_over_month_in_non_leap_year() {
        assert_eq!(
            next("*/5 * * * *", "2023-02-28T23:55:00Z"),
            utc("2023-03-01T00:00:00Z")
        );
    }

    #[test]
    fn test_rolls_over_year() {
        assert_eq!(
            next("*/5 * * * *", "2023-12-31T23:55:00Z"),
            utc("2024-01-01T00:00:00Z")
        );
        assert_eq!(
            next("0 0 1 1 *", "2023-06-15T12:00:00Z"),
            utc("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_leap_day() {
        assert_eq!(
            next("0 0 29 2 *", "2023-03-01T00:00:00Z"),
            utc("2024-02-29T00:00:00Z")
        );
        assert_eq!(
            next("*/5 * * * *", "2024-02-28T23:55:00Z"),
            utc("2024-02-29T00:00:00Z")
        );
    }

    #[test]
    fn test_result_is_strictly_after() {
        assert_eq!(
            next("0 0 * * *", "2024-01-01T00:00:00Z"),
            utc("2024-01-02T00:00:00Z")
        );
        assert_eq!(
            next("*/5 * * * *", "2024-01-01T00:04:59.500Z"),
            utc("2024-01-01T00:05:00Z")
        );
    }

    #[test]
    fn test_seconds_field() {
        assert_eq!(
            next("*/15 * * * * *", "2024-01-01T00:00:00Z"),
            utc("2024-01-01T00:00:15Z")
        );
        assert_eq!(
            next("30 0 12 * * *", "2024-01-01T00:00:00Z"),
            utc("2024-01-01T12:00:30Z")
        );
    }

    #[test]
    fn test_day_of_month_or_day_of_week_when_both_restricted() {
        // 13th of the month or any Friday; 2024-01-01 is a Monday
        let expr = ScheduleExpression::parse("0 0 13 * 5").unwrap();
        let fires: Vec<_> = expr
            .upcoming(utc("2024-01-01T00:00:00Z"))
            .take(4)
            .collect();

        assert_eq!(
            fires,
            vec![
                utc("2024-01-05T00:00:00Z"),
                utc("2024-01-12T00:00:00Z"),
                utc("2024-01-13T00:00:00Z"),
                utc("2024-01-19T00:00:00Z"),
            ]
        );
    }

    #[test]
    fn test_day_fields_combine_with_and_when_one_is_starred() {
        // Odd days of the month that are also Mondays
        assert_eq!(
            next("0 0 */2 * 1", "2024-01-01T00:00:00Z"),
            utc("2024-01-15T00:00:00Z")
        );
    }

    #[test]
    fn test_names_and_descriptors() {
        assert_eq!(
            next("0 9 * * MON", "2024-01-02T00:00:00Z"),
            utc("2024-01-08T09:00:00Z")
        );
        assert_eq!(
            next("@weekly", "2024-01-01T00:00:00Z"),
            utc("2024-01-07T00:00:00Z")
        );
        assert_eq!(
            next("0 0 1 dec *", "2024-01-01T00:00:00Z"),
            utc("2024-12-01T00:00:00Z")
        );
    }

    #[rstest]
    #[case("0 0 30 2 *")]
    #[case("0 0 31 4 *")]
    #[case("0 0 31 2,4,6,9,11 *")]
    fn test_unsatisfiable_expressions(#[case] expression: &str) {
        let expr = ScheduleExpression::parse(expression).unwrap();
        let result = expr.next_fire_after(&utc("2024-01-01T00:00:00Z"));
        assert!(matches!(
            result,
            Err(ScheduleError::UnsatisfiableExpression { years: LOOKAHEAD_YEARS, .. })
        ));
    }

    #[test]
    fn test_time_zone_evaluation() {
        let expr = ScheduleExpression::parse("0 9 * * *").unwrap();
        let after = utc("2024-06-01T00:00:00Z").with_timezone(&London);
        let fire = expr.next_fire_after(&after).unwrap();

        // British Summer Time is UTC+1
        assert_eq!(fire.with_timezone(&Utc), utc("2024-06-01T08:00:00Z"));
    }

    #[test]
    fn test_skips_local_time_missing_in_dst_gap() {
        // 01:30 does not exist in London on 2024-03-31
        let expr = ScheduleExpression::parse("30 1 * * *").unwrap();
        let after = utc("2024-03-31T00:00:00Z").with_timezone(&London);
        let fire = expr.next_fire_after(&after).unwrap();

        assert_eq!(fire.with_timezone(&Utc), utc("2024-04-01T00:30:00Z"));
    }

    #[test]
    fn test_display_keeps_source() {
        let expr: ScheduleExpression = "*/5 * * * *".parse().unwrap();
        assert_eq!(expr.to_string(), "*/5 * * * *");
        assert_eq!(expr.as_str(), "*/5 * * * *");
    }

    proptest! {
        #[test]
        fn prop_fire_times_strictly_increase(
            expression in prop::sample::select(vec![
                "* * * * *",
                "*/5 * * * *",
                "*/7 */3 * * *",
                "0 0 * * *",
                "15 4 1,15 * *",
                "0 12 * * 1-5",
                "0 0 13 * 5",
                "0 0 29 2 *",
                "*/20 * * * * *",
                "0 0 1 1 *",
                "@hourly",
            ]),
            start in 0i64..4_000_000_000i64,
        ) {
            let expr = ScheduleExpression::parse(expression).unwrap();
            let after = DateTime::from_timestamp(start, 0).unwrap();

            let mut previous = after;
            for fire in expr.upcoming(after).take(5) {
                prop_assert!(fire > previous);
                previous = fire;
            }
        }
    }
}
