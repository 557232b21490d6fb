// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_returns_increasing_time() {
    let clock = SystemClock;
    let t1 = clock.now();
    std::thread::sleep(Duration::from_millis(1));
    let t2 = clock.now();
    assert!(t2 > t1);
}

#[test]
fn fake_clock_starts_at_fixed_wall_time() {
    let clock = FakeClock::new();
    assert_eq!(clock.utc_now().timestamp(), FAKE_EPOCH_SECS);
}

#[test]
fn fake_clock_advances_both_clocks() {
    let clock = FakeClock::new();
    let t1 = clock.now();
    let w1 = clock.utc_now();
    clock.advance(Duration::from_secs(60));
    assert!(clock.now().duration_since(t1) >= Duration::from_secs(60));
    assert_eq!((clock.utc_now() - w1).num_seconds(), 60);
}

#[test]
fn fake_clock_is_cloneable_and_shared() {
    let clock1 = FakeClock::new();
    let clock2 = clock1.clone();
    let w1 = clock1.utc_now();
    clock2.advance(Duration::from_secs(30));
    assert_eq!((clock1.utc_now() - w1).num_seconds(), 30);
}

#[test]
fn fake_clock_set_utc_moves_monotonic_forward() {
    let clock = FakeClock::new();
    let t1 = clock.now();
    let target = clock.utc_now() + TimeDelta::seconds(3600);
    clock.set_utc(target);
    assert_eq!(clock.utc_now(), target);
    assert!(clock.now().duration_since(t1) >= Duration::from_secs(3600));
}

#[test]
fn fake_clock_set_utc_backwards_keeps_monotonic() {
    let clock = FakeClock::new();
    let t1 = clock.now();
    let target = clock.utc_now() - TimeDelta::seconds(10);
    clock.set_utc(target);
    assert_eq!(clock.utc_now(), target);
    assert_eq!(clock.now(), t1);
}
