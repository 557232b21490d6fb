// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scheduling scenarios

use crate::prelude::*;
use crate::prelude::assert_eq;
use chrono::{TimeZone, Utc};
use cv_engine::{DeployOutcome, ResourceModel, TimerKind, TimerManager};

fn outcome(hash: &str, status: HandlerResult) -> DeployOutcome {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    DeployOutcome {
        attribute_hash: hash.to_string(),
        status,
        change: Change::NoChange,
        started: at,
        finished: at,
    }
}

#[test]
fn repair_failure_after_success_turns_non_compliant() {
    let mut model = ResourceModel::new();
    model.mark_new_intent(intent("a", "h1", &[]), false);
    model.set_version(1);

    model.apply_deploy_result(&res("a"), &outcome("h1", HandlerResult::Deployed)).unwrap();
    assert_eq!(model.state(&res("a")).unwrap().compliance, Compliance::Compliant);

    model.apply_deploy_result(&res("a"), &outcome("h1", HandlerResult::Failed)).unwrap();
    assert_eq!(model.state(&res("a")).unwrap().compliance, Compliance::NonCompliant);
}

#[tokio::test]
async fn dependent_of_undefined_resource_is_hard_blocked() {
    let mut world = World::new();
    world
        .take_in(
            ModelVersion::new(1)
                .with_undefined(intent("a", "a1", &[]))
                .with_resource(intent("b", "b1", &["a"])),
        )
        .await;
    world.settle().await;

    let b = world.state("b");
    assert_eq!(b.blocked, Blocked::Blocked);
    assert_eq!(b.status(), ResourceStatus::SkippedForUndefined);
    assert_eq!(world.state("a").status(), ResourceStatus::Undefined);
    assert!(world.executor.calls().is_empty());
}

/// `d` sends events, `c` requires it and listens
async fn event_world() -> World {
    let mut world = World::new();
    let d = ResourceIntent::builder().id(res("d")).attribute_hash("d1").send_event(true).build();
    let c = intent("c", "c1", &["d"]);
    world.take_in(ModelVersion::new(1).with_resource(d).with_resource(c)).await;
    world.settle().await;
    world.clock.advance(Duration::from_secs(60));
    world
}

#[tokio::test]
async fn created_change_redeploys_the_listener() {
    let mut world = event_world().await;
    world.executor.script(&res("d"), [FakeOutcome::deployed(Change::Created)]);

    world.sched.deploy_resource(&res("d"), "manual", TaskPriority::UserDeploy).unwrap();
    world.settle().await;

    assert_eq!(world.executor.deploys_of(&res("c")), 2);
}

#[tokio::test]
async fn nochange_does_not_redeploy_the_listener() {
    let mut world = event_world().await;

    world.sched.deploy_resource(&res("d"), "manual", TaskPriority::UserDeploy).unwrap();
    world.settle().await;

    assert_eq!(world.executor.deploys_of(&res("c")), 1);
}

#[tokio::test]
async fn resource_dropped_by_new_version_is_orphaned() {
    let mut world = World::new();
    world.take_in(chain(1, &["x", "y"])).await;
    world.settle().await;
    let x_before = world.state("x");

    world.take_in(ModelVersion::new(2).with_resource(intent("x", "x-v1", &[]))).await;

    assert!(world.state("y").is_orphan);
    assert!(world.store.record(&world.env, &res("y")).unwrap().state.is_orphan);
    assert_eq!(world.state("x"), x_before);
    assert!(!world.store.record(&world.env, &res("x")).unwrap().state.is_orphan);
}

#[test]
fn compliant_resource_only_gets_a_repair_timer() {
    let clock = FakeClock::new();
    let config = SchedulerConfig::default()
        .deploy_interval(TimerSetting::from_seconds(100))
        .repair_interval(TimerSetting::from_seconds(50));
    let mut timers = TimerManager::new(clock.clone(), &config);
    let deployed_at = clock.utc_now();
    let state = ResourceState::builder()
        .compliance(Compliance::Compliant)
        .last_deploy_result(DeployResult::Deployed)
        .last_deployed(Some(deployed_at))
        .build();

    timers.update_timer(&res("a"), &state);

    let timer = timers.timer(&res("a")).unwrap();
    assert_eq!(timer.kind, TimerKind::Repair);
    assert_eq!(timer.due, deployed_at + chrono::Duration::seconds(50));
    assert_eq!(timers.len(), 1);
}

#[tokio::test]
async fn duplicate_release_notification_changes_nothing() {
    let mut once = World::new();
    once.release(chain(1, &["a", "b"]));
    assert!(once.sched.new_version(1).await.unwrap());
    let queued_once = once.sched.queue().pending_len();

    let mut twice = World::new();
    twice.release(chain(1, &["a", "b"]));
    assert!(twice.sched.new_version(1).await.unwrap());
    assert!(!twice.sched.new_version(1).await.unwrap());
    assert_eq!(twice.sched.queue().pending_len(), queued_once);

    once.settle().await;
    twice.settle().await;
    for name in ["a", "b"] {
        assert_eq!(twice.state(name), once.state(name));
    }
    assert_eq!(twice.executor.calls().len(), once.executor.calls().len());
}
