// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling.
//!
//! Deploy timestamps, timer deadlines and cron schedules are all wall-clock
//! (`DateTime<Utc>`); the monotonic `Instant` is only used to size sleeps.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A clock that provides the current time
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for testing with controllable time.
///
/// Both the monotonic and the wall clock move together on `advance()`.
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<Instant>>,
    wall: Arc<Mutex<DateTime<Utc>>>,
}

/// 2024-01-01T00:00:00Z
const FAKE_EPOCH_SECS: i64 = 1_704_067_200;

impl FakeClock {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
            wall: Arc::new(Mutex::new(
                DateTime::from_timestamp(FAKE_EPOCH_SECS, 0).unwrap_or_default(),
            )),
        }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
        *self.wall.lock() += TimeDelta::from_std(duration).unwrap_or(TimeDelta::zero());
    }

    /// Jump the wall clock to a specific point in time
    pub fn set_utc(&self, at: DateTime<Utc>) {
        let mut wall = self.wall.lock();
        if let Ok(forward) = (at - *wall).to_std() {
            *self.current.lock() += forward;
        }
        *wall = at;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        *self.wall.lock()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
