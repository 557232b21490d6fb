// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn next(expr: &str, after: DateTime<Utc>) -> DateTime<Utc> {
    CronSchedule::parse(expr).unwrap().next_after(after).unwrap()
}

#[test]
fn every_minute_fires_next_minute() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 30).unwrap();
    assert_eq!(next("* * * * *", start), at(2024, 1, 1, 10, 16));
}

#[test]
fn next_is_strictly_after() {
    assert_eq!(next("30 10 * * *", at(2024, 1, 1, 10, 30)), at(2024, 1, 2, 10, 30));
}

#[yare::parameterized(
    step_minutes   = { "*/15 * * * *",   at(2024, 1, 1, 10, 16), at(2024, 1, 1, 10, 30) },
    daily_at_3     = { "0 3 * * *",      at(2024, 1, 1, 10, 0),  at(2024, 1, 2, 3, 0) },
    range_step     = { "10-40/10 * * * *", at(2024, 1, 1, 10, 41), at(2024, 1, 1, 11, 10) },
    list           = { "5,50 * * * *",   at(2024, 1, 1, 10, 6),  at(2024, 1, 1, 10, 50) },
    month_name     = { "0 0 1 mar *",    at(2024, 1, 15, 0, 0),  at(2024, 3, 1, 0, 0) },
    year_wrap      = { "0 0 1 1 *",      at(2024, 6, 1, 0, 0),   at(2025, 1, 1, 0, 0) },
    leap_day       = { "0 12 29 2 *",    at(2024, 3, 1, 0, 0),   at(2028, 2, 29, 12, 0) },
    sunday_as_7    = { "0 0 * * 7",      at(2024, 1, 1, 0, 0),   at(2024, 1, 7, 0, 0) },
    weekday_name   = { "0 9 * * Fri",    at(2024, 1, 1, 0, 0),   at(2024, 1, 5, 9, 0) },
    hourly_macro   = { "@hourly",        at(2024, 1, 1, 10, 1),  at(2024, 1, 1, 11, 0) },
    daily_macro    = { "@daily",         at(2024, 1, 1, 10, 0),  at(2024, 1, 2, 0, 0) },
)]
fn next_fire_time(expr: &str, after: DateTime<Utc>, expected: DateTime<Utc>) {
    assert_eq!(next(expr, after), expected);
}

#[test]
fn restricted_dom_and_dow_match_either() {
    // 2024-01-01 is a Monday; the 15th is a Monday too
    let schedule = CronSchedule::parse("0 0 15 * 5").unwrap();
    // first Friday after Jan 1st is Jan 5th, before the 15th
    assert_eq!(schedule.next_after(at(2024, 1, 1, 0, 0)), Some(at(2024, 1, 5, 0, 0)));
    assert_eq!(schedule.next_after(at(2024, 1, 13, 0, 0)), Some(at(2024, 1, 15, 0, 0)));
}

#[test]
fn impossible_date_gives_up() {
    let schedule = CronSchedule::parse("0 0 31 2 *").unwrap();
    assert_eq!(schedule.next_after(at(2024, 1, 1, 0, 0)), None);
}

#[yare::parameterized(
    too_few      = { "* * * *" },
    too_many     = { "* * * * * *" },
    minute_range = { "60 * * * *" },
    hour_range   = { "0 24 * * *" },
    zero_dom     = { "0 0 0 * *" },
    zero_step    = { "*/0 * * * *" },
    bad_name     = { "0 0 * foo *" },
    reversed     = { "30-10 * * * *" },
    empty        = { "" },
)]
fn parse_rejects(expr: &str) {
    assert!(CronSchedule::parse(expr).is_err());
}

#[test]
fn display_keeps_expression() {
    let schedule: CronSchedule = " 0 3 * * * ".parse().unwrap();
    assert_eq!(schedule.to_string(), "0 3 * * *");
    assert_eq!(schedule.expression(), "0 3 * * *");
}
