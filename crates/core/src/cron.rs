// crates/core/src/cron.rs
//! Cron expression parsing and next-execution evaluation.
//!
//! Supports the standard 5-field form (minute hour day month weekday) plus
//! the `@yearly`/`@monthly`/`@weekly`/`@daily`/`@hourly` aliases. Weekday 0
//! is Sunday. All evaluation is in UTC.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

/// One year of minutes — the hard cap on the next-execution scan.
const MAX_SCAN_MINUTES: u32 = 366 * 24 * 60;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("empty cron expression")]
    Empty,

    #[error("unknown special expression: {0}")]
    UnknownAlias(String),

    #[error("invalid characters in cron expression: {0}")]
    InvalidCharacters(String),

    #[error("cron expression must have exactly 5 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid {field} value {value} (must be {min}-{max})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: u32,
        max: u32,
    },

    #[error("invalid step value in field: {0}")]
    InvalidStep(String),

    #[error("invalid range in field: {0}")]
    InvalidRange(String),

    #[error("invalid field value: {0}")]
    InvalidField(String),

    #[error("no valid values parsed from field: {0}")]
    EmptyField(String),

    #[error("no execution time within one year after {0}")]
    Unsatisfiable(DateTime<Utc>),
}

const FIELDS: [(&str, u32, u32); 5] = [
    ("minute", 0, 59),
    ("hour", 0, 23),
    ("day", 1, 31),
    ("month", 1, 12),
    ("weekday", 0, 6),
];

/// A parsed cron expression: the admitted value set per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: BTreeSet<u32>,
    hour: BTreeSet<u32>,
    day: BTreeSet<u32>,
    month: BTreeSet<u32>,
    weekday: BTreeSet<u32>,
    expression: String,
}

impl CronSchedule {
    /// Parse a cron expression, expanding `@` aliases first.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(CronError::Empty);
        }

        let expanded = if trimmed.starts_with('@') {
            match trimmed {
                "@yearly" | "@annually" => "0 0 1 1 *",
                "@monthly" => "0 0 1 * *",
                "@weekly" => "0 0 * * 0",
                "@daily" | "@midnight" => "0 0 * * *",
                "@hourly" => "0 * * * *",
                other => return Err(CronError::UnknownAlias(other.to_string())),
            }
        } else {
            trimmed
        };

        // Allow-list check before any structural parsing.
        let safe = expanded
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'*' | b',' | b'-' | b'/') || b.is_ascii_whitespace());
        if !safe {
            return Err(CronError::InvalidCharacters(expanded.to_string()));
        }

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let mut parsed = Vec::with_capacity(5);
        for (raw, (name, min, max)) in fields.iter().zip(FIELDS) {
            parsed.push(parse_field(raw, name, min, max)?);
        }
        let mut it = parsed.into_iter();

        Ok(Self {
            minute: it.next().unwrap(),
            hour: it.next().unwrap(),
            day: it.next().unwrap(),
            month: it.next().unwrap(),
            weekday: it.next().unwrap(),
            expression: expanded.to_string(),
        })
    }

    /// True when the expression parses.
    pub fn is_valid(expression: &str) -> bool {
        Self::parse(expression).is_ok()
    }

    /// The normalized 5-field expression (aliases already expanded).
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Earliest minute strictly after `from` matching every field.
    ///
    /// Scans minute-by-minute with a cap of one calendar year; a schedule
    /// that never fires (e.g. `0 0 30 2 *`) is `Unsatisfiable`.
    pub fn next_execution(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let mut candidate = from
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(from)
            + Duration::minutes(1);

        for _ in 0..MAX_SCAN_MINUTES {
            if self.matches(candidate) {
                return Ok(candidate);
            }
            candidate += Duration::minutes(1);
        }

        Err(CronError::Unsatisfiable(from))
    }

    fn matches(&self, t: DateTime<Utc>) -> bool {
        self.minute.contains(&t.minute())
            && self.hour.contains(&t.hour())
            && self.day.contains(&t.day())
            && self.month.contains(&t.month())
            && self.weekday.contains(&t.weekday().num_days_from_sunday())
    }

    #[cfg(test)]
    pub(crate) fn minutes(&self) -> &BTreeSet<u32> {
        &self.minute
    }
}

/// Parse one field: `*`, literals, `A-B` ranges, comma lists, `/S` steps.
fn parse_field(
    field: &str,
    name: &'static str,
    min: u32,
    max: u32,
) -> Result<BTreeSet<u32>, CronError> {
    if field == "*" {
        return Ok((min..=max).collect());
    }

    let mut values = BTreeSet::new();

    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (spec, step) = match part.split_once('/') {
            Some((spec, step_str)) => {
                let step: u32 = step_str
                    .parse()
                    .map_err(|_| CronError::InvalidStep(part.to_string()))?;
                if step == 0 {
                    return Err(CronError::InvalidStep(part.to_string()));
                }
                (spec, step)
            }
            None => (part, 1),
        };

        if let Some((start_str, end_str)) = spec.split_once('-') {
            let start = if start_str == "*" {
                min
            } else {
                start_str
                    .parse()
                    .map_err(|_| CronError::InvalidRange(part.to_string()))?
            };
            let end = if end_str == "*" {
                max
            } else {
                end_str
                    .parse()
                    .map_err(|_| CronError::InvalidRange(part.to_string()))?
            };
            if start > end {
                return Err(CronError::InvalidRange(part.to_string()));
            }
            for v in (start..=end).step_by(step as usize) {
                if (min..=max).contains(&v) {
                    values.insert(v);
                }
            }
        } else if spec == "*" {
            for v in (min..=max).step_by(step as usize) {
                values.insert(v);
            }
        } else {
            let v: i64 = spec
                .parse()
                .map_err(|_| CronError::InvalidField(part.to_string()))?;
            if v < min as i64 || v > max as i64 {
                return Err(CronError::OutOfRange {
                    field: name,
                    value: v,
                    min,
                    max,
                });
            }
            values.insert(v as u32);
        }
    }

    if values.is_empty() {
        return Err(CronError::EmptyField(field.to_string()));
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_daily_alias_expansion() {
        let sched = CronSchedule::parse("@daily").unwrap();
        assert_eq!(sched.expression(), "0 0 * * *");

        let next = sched.next_execution(utc(2024, 6, 15, 10, 30)).unwrap();
        assert_eq!(next, utc(2024, 6, 16, 0, 0));
    }

    #[test]
    fn test_all_aliases_parse() {
        for alias in ["@yearly", "@annually", "@monthly", "@weekly", "@midnight", "@hourly"] {
            assert!(CronSchedule::is_valid(alias), "{alias} should parse");
        }
        assert!(matches!(
            CronSchedule::parse("@fortnightly"),
            Err(CronError::UnknownAlias(_))
        ));
    }

    #[test]
    fn test_step_field_minutes() {
        let sched = CronSchedule::parse("*/15 * * * *").unwrap();
        let expected: BTreeSet<u32> = [0, 15, 30, 45].into_iter().collect();
        assert_eq!(sched.minutes(), &expected);
    }

    #[test]
    fn test_range_with_step() {
        let sched = CronSchedule::parse("1-10/2 * * * *").unwrap();
        let expected: BTreeSet<u32> = [1, 3, 5, 7, 9].into_iter().collect();
        assert_eq!(sched.minutes(), &expected);
    }

    #[test]
    fn test_comma_list() {
        let sched = CronSchedule::parse("1,3,5 * * * *").unwrap();
        let expected: BTreeSet<u32> = [1, 3, 5].into_iter().collect();
        assert_eq!(sched.minutes(), &expected);
    }

    #[test]
    fn test_invalid_characters_rejected() {
        assert!(matches!(
            CronSchedule::parse("* * * * MON"),
            Err(CronError::InvalidCharacters(_))
        ));
        assert!(matches!(
            CronSchedule::parse("*; DROP TABLE * * * *"),
            Err(CronError::InvalidCharacters(_))
        ));
    }

    #[test]
    fn test_field_count_enforced() {
        assert!(matches!(
            CronSchedule::parse("* * * *"),
            Err(CronError::FieldCount(4))
        ));
        assert!(matches!(CronSchedule::parse(""), Err(CronError::Empty)));
    }

    #[test]
    fn test_out_of_range_literal() {
        assert!(matches!(
            CronSchedule::parse("60 * * * *"),
            Err(CronError::OutOfRange { field: "minute", .. })
        ));
        assert!(matches!(
            CronSchedule::parse("* 24 * * *"),
            Err(CronError::OutOfRange { field: "hour", .. })
        ));
    }

    #[test]
    fn test_zero_step_rejected() {
        assert!(matches!(
            CronSchedule::parse("*/0 * * * *"),
            Err(CronError::InvalidStep(_))
        ));
    }

    #[test]
    fn test_weekday_sunday_is_zero() {
        // 2024-06-16 is a Sunday.
        let sched = CronSchedule::parse("0 0 * * 0").unwrap();
        let next = sched.next_execution(utc(2024, 6, 14, 12, 0)).unwrap();
        assert_eq!(next, utc(2024, 6, 16, 0, 0));
    }

    #[test]
    fn test_next_execution_strictly_after_from() {
        // `from` is itself a match — the result must be the next slot.
        let sched = CronSchedule::parse("30 10 * * *").unwrap();
        let next = sched.next_execution(utc(2024, 6, 15, 10, 30)).unwrap();
        assert_eq!(next, utc(2024, 6, 16, 10, 30));
    }

    #[test]
    fn test_next_execution_idempotence() {
        let sched = CronSchedule::parse("*/5 * * * *").unwrap();
        let t0 = utc(2024, 6, 15, 10, 2);
        let t1 = sched.next_execution(t0).unwrap();
        let t2 = sched.next_execution(t1).unwrap();
        assert!(t1 > t0);
        assert!(t2 > t1);
    }

    #[test]
    fn test_unsatisfiable_schedule() {
        // February 30th never exists.
        let sched = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert!(matches!(
            sched.next_execution(utc(2024, 1, 1, 0, 0)),
            Err(CronError::Unsatisfiable(_))
        ));
    }

    #[test]
    fn test_seconds_truncated_before_scan() {
        let sched = CronSchedule::parse("* * * * *").unwrap();
        let from = Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 45).unwrap();
        let next = sched.next_execution(from).unwrap();
        assert_eq!(next, utc(2024, 6, 15, 10, 31));
    }
}
