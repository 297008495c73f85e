// Tally - Tariff-aware utility metering engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Reset scheduling
//!
//! Converts a named period plus offset into a five-field calendar pattern
//! (the backward-compatible configuration form) and computes the next
//! reset instant after a given time. The pattern language is the cron
//! subset the legacy format used - minute, hour, day of month, month and
//! day of week - not a general cron parser.
//!
//! Malformed patterns are construction-time errors. A validated pattern
//! never fails to produce a next instant: month sets are anchored at
//! January, which has a 31st, so any validated day of month occurs within
//! thirteen months (leap-day patterns within eight years).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::config::{ResetOffset, ScheduleSpec};
use crate::error::{MeterError, Result};

/// Named reset period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Period {
    QuarterHourly,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Bimonthly,
    Quarterly,
    Yearly,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::QuarterHourly => "quarter-hourly",
            Period::Hourly => "hourly",
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::Bimonthly => "bimonthly",
            Period::Quarterly => "quarterly",
            Period::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = MeterError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "quarter-hourly" => Ok(Period::QuarterHourly),
            "hourly" => Ok(Period::Hourly),
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            "bimonthly" => Ok(Period::Bimonthly),
            "quarterly" => Ok(Period::Quarterly),
            "yearly" => Ok(Period::Yearly),
            _ => Err(MeterError::UnknownPeriod(raw.to_string())),
        }
    }
}

/// One field of a calendar pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Matches every value.
    Any,
    /// Matches exactly one value.
    Fixed(u32),
    /// Matches `start`, `start + step`, `start + 2*step`, ...
    Step { start: u32, step: u32 },
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        match *self {
            Field::Any => true,
            Field::Fixed(fixed) => value == fixed,
            Field::Step { start, step } => value >= start && (value - start) % step == 0,
        }
    }

    fn is_restricted(&self) -> bool {
        !matches!(self, Field::Any)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Field::Any => f.write_str("*"),
            Field::Fixed(fixed) => write!(f, "{fixed}"),
            Field::Step { start, step } => write!(f, "{start}/{step}"),
        }
    }
}

/// Bound on the `next_after` forward search. A validated pattern with a
/// Feb-29 constraint fires at least once per leap cycle.
const SEARCH_HORIZON_DAYS: i64 = 366 * 9;

/// A recurring reset-instant specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarPattern {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CalendarPattern {
    /// Resolve a schedule specification into its calendar pattern.
    pub fn resolve(spec: &ScheduleSpec) -> Result<Self> {
        match spec {
            ScheduleSpec::Periodic { period, offset } => Self::for_period(*period, *offset),
            ScheduleSpec::Pattern(raw) => Self::parse(raw),
        }
    }

    /// Convert a named period plus offset into its calendar pattern.
    ///
    /// The offset's day component maps to a 1-based day of month (day of
    /// week for weekly periods); its seconds map to hour and minute.
    pub fn for_period(period: Period, offset: ResetOffset) -> Result<Self> {
        use Field::{Any, Fixed, Step};

        let minute = (offset.seconds % 3600) / 60;
        let hour = offset.seconds / 3600;
        let day = offset.days + 1;

        let (minute, hour, day_of_month, month, day_of_week) = match period {
            Period::QuarterHourly => (Step { start: minute, step: 15 }, Any, Any, Any, Any),
            Period::Hourly => (Fixed(minute), Any, Any, Any, Any),
            Period::Daily => (Fixed(minute), Fixed(hour), Any, Any, Any),
            Period::Weekly => (Fixed(minute), Fixed(hour), Any, Any, Fixed(day)),
            Period::Monthly => (Fixed(minute), Fixed(hour), Fixed(day), Any, Any),
            Period::Bimonthly => (
                Fixed(minute),
                Fixed(hour),
                Fixed(day),
                Step { start: 1, step: 2 },
                Any,
            ),
            Period::Quarterly => (
                Fixed(minute),
                Fixed(hour),
                Fixed(day),
                Step { start: 1, step: 3 },
                Any,
            ),
            Period::Yearly => (
                Fixed(minute),
                Fixed(hour),
                Fixed(day),
                Step { start: 1, step: 12 },
                Any,
            ),
        };

        Self {
            minute,
            hour,
            day_of_month,
            month,
            day_of_week: normalize_dow(day_of_week),
        }
        .validated()
    }

    /// Parse an explicit five-field pattern: `minute hour dom month dow`.
    ///
    /// Each field is `*`, a number, or `start/step` (`*` as start means
    /// the field's lower bound). Day of week 7 is Sunday, same as 0.
    pub fn parse(pattern: &str) -> Result<Self> {
        let fields: Vec<&str> = pattern.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(MeterError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: format!("expected 5 fields, got {}", fields.len()),
            });
        }

        let build = || -> std::result::Result<Self, String> {
            Ok(Self {
                minute: parse_field(fields[0], 0)?,
                hour: parse_field(fields[1], 0)?,
                day_of_month: parse_field(fields[2], 1)?,
                month: parse_field(fields[3], 1)?,
                day_of_week: normalize_dow(parse_field(fields[4], 0)?),
            })
        };

        build()
            .map_err(|reason| MeterError::InvalidPattern {
                pattern: pattern.to_string(),
                reason,
            })?
            .validated()
    }

    /// First matching instant strictly after `now`.
    ///
    /// Total for validated patterns; day-of-month overflow in short
    /// months simply skips to the next month that has the day.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let start_date = now.date_naive();
        for day_offset in 0..=SEARCH_HORIZON_DAYS {
            let date = start_date + Duration::days(day_offset);
            if !self.matches_date(date) {
                continue;
            }
            for hour in 0..24 {
                if !self.hour.matches(hour) {
                    continue;
                }
                for minute in 0..60 {
                    if !self.minute.matches(minute) {
                        continue;
                    }
                    if let Some(naive) = date.and_hms_opt(hour, minute, 0) {
                        let candidate = naive.and_utc();
                        if candidate > now {
                            return candidate;
                        }
                    }
                }
            }
        }
        unreachable!("validated patterns match within the search horizon")
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.month.matches(date.month()) {
            return false;
        }
        let dom = self.day_of_month.matches(date.day());
        let dow = self.day_of_week.matches(cron_weekday(date.weekday()));
        // Standard cron day rule: with both fields restricted, either may
        // claim the day.
        if self.day_of_month.is_restricted() && self.day_of_week.is_restricted() {
            dom || dow
        } else {
            dom && dow
        }
    }

    fn validated(self) -> Result<Self> {
        if let Err(reason) = self.check() {
            return Err(MeterError::InvalidPattern {
                pattern: self.to_string(),
                reason,
            });
        }
        Ok(self)
    }

    fn check(&self) -> std::result::Result<(), String> {
        check_range(self.minute, "minute", 0, 59)?;
        check_range(self.hour, "hour", 0, 23)?;
        check_range(self.day_of_month, "day of month", 1, 31)?;
        check_range(self.month, "month", 1, 12)?;
        check_range(self.day_of_week, "day of week", 0, 6)?;

        // A day-of-month-only pattern must name a day that exists in at
        // least one matching month (Feb 30 never fires).
        if let Field::Fixed(day) = self.day_of_month {
            if !self.day_of_week.is_restricted() {
                let longest = (1..=12)
                    .filter(|&month| self.month.matches(month))
                    .map(days_in_month)
                    .max()
                    .unwrap_or(0);
                if day > longest {
                    return Err(format!("day {day} never occurs in the matching months"));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for CalendarPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month, self.day_of_week
        )
    }
}

fn parse_field(raw: &str, floor: u32) -> std::result::Result<Field, String> {
    if raw == "*" {
        return Ok(Field::Any);
    }
    if let Some((start_raw, step_raw)) = raw.split_once('/') {
        let step: u32 = step_raw
            .parse()
            .map_err(|_| format!("bad step '{step_raw}'"))?;
        if step == 0 {
            return Err("step must be positive".to_string());
        }
        let start = if start_raw == "*" {
            floor
        } else {
            start_raw
                .parse()
                .map_err(|_| format!("bad value '{start_raw}'"))?
        };
        return Ok(Field::Step { start, step });
    }
    raw.parse()
        .map(Field::Fixed)
        .map_err(|_| format!("bad value '{raw}'"))
}

fn check_range(field: Field, name: &str, min: u32, max: u32) -> std::result::Result<(), String> {
    let value = match field {
        Field::Any => return Ok(()),
        Field::Fixed(value) => value,
        Field::Step { start, .. } => start,
    };
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(format!("{name} {value} out of range {min}-{max}"))
    }
}

/// Day of week 7 is an alias for Sunday.
fn normalize_dow(field: Field) -> Field {
    match field {
        Field::Fixed(7) => Field::Fixed(0),
        Field::Step { start: 7, step } => Field::Step { start: 0, step },
        other => other,
    }
}

fn cron_weekday(weekday: Weekday) -> u32 {
    weekday.num_days_from_sunday()
}

/// Maximum length a month can have, Feb counted as 29.
fn days_in_month(month: u32) -> u32 {
    match month {
        2 => 29,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}
