// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Five-field cron expressions evaluated in UTC.
//!
//! Supports `*`, lists (`1,5`), ranges (`1-5`), steps (`*/15`, `10-40/10`),
//! month and weekday names, `7` as Sunday, and the `@hourly`, `@daily`,
//! `@midnight`, `@weekly`, `@monthly`, `@yearly`/`@annually` shorthands.
//! When both day-of-month and day-of-week are restricted, a day matching
//! either fires (classic cron semantics).

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("cron expression '{0}' must have 5 fields")]
    FieldCount(String),
    #[error("invalid {field} field '{value}' in cron expression")]
    InvalidField { field: &'static str, value: String },
}

const MONTHS: &[&str] =
    &["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];
const WEEKDAYS: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Give up looking for a matching minute after this many years
const SEARCH_YEARS: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u32,
    days: u32,
    months: u16,
    weekdays: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let trimmed = expr.trim();
        let expanded = match trimmed {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            other => other,
        };
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(CronError::FieldCount(expr.to_string()));
        };

        let mut weekdays = parse_field("day-of-week", dow, 0, 7, WEEKDAYS)?;
        if weekdays & (1 << 7) != 0 {
            weekdays = (weekdays | 1) & !(1 << 7);
        }

        Ok(Self {
            expr: trimmed.to_string(),
            minutes: parse_field("minute", minute, 0, 59, &[])?,
            hours: parse_field("hour", hour, 0, 23, &[])? as u32,
            days: parse_field("day-of-month", dom, 1, 31, &[])? as u32,
            months: parse_field("month", month, 1, 12, MONTHS)? as u16,
            weekdays: weekdays as u8,
            dom_restricted: !dom.starts_with('*'),
            dow_restricted: !dow.starts_with('*'),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First matching minute strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let naive = after.naive_utc();
        let mut t =
            naive.date().and_hms_opt(naive.hour(), naive.minute(), 0)? + TimeDelta::minutes(1);
        let give_up = naive.year() + SEARCH_YEARS;

        while t.year() <= give_up {
            if !bit(self.months as u64, t.month()) {
                t = first_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours as u64, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + TimeDelta::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += TimeDelta::minutes(1);
                continue;
            }
            return Some(Utc.from_utc_datetime(&t));
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days as u64, date.day());
        let dow = bit(self.weekdays as u64, date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expr)
    }
}

impl std::str::FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn bit(mask: u64, n: u32) -> bool {
    mask & (1u64 << n) != 0
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (y, m) =
        if date.month() == 12 { (date.year() + 1, 1) } else { (date.year(), date.month() + 1) };
    NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)
}

fn parse_field(
    field: &'static str,
    value: &str,
    min: u32,
    max: u32,
    names: &[&str],
) -> Result<u64, CronError> {
    let invalid = || CronError::InvalidField { field, value: value.to_string() };
    let parse_value = |s: &str| -> Result<u32, CronError> {
        if let Ok(n) = s.parse::<u32>() {
            return Ok(n);
        }
        let lower = s.to_ascii_lowercase();
        names
            .iter()
            .position(|name| *name == lower)
            .map(|idx| idx as u32 + min)
            .ok_or_else(invalid)
    };

    let mut mask = 0u64;
    for part in value.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step.parse::<u32>().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, Some(step))
            }
            None => (part, None),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo)?, parse_value(hi)?)
        } else {
            let v = parse_value(range)?;
            (v, if step.is_some() { max } else { v })
        };
        if lo < min || hi > max || lo > hi {
            return Err(invalid());
        }
        for v in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            mask |= 1u64 << v;
        }
    }
    Ok(mask)
}

#[cfg(test)]
#[path = "cron_tests.rs"]
mod tests;
