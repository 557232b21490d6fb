// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::timers::TimerKind;
use cv_adapters::{ExecutorError, FakeOutcome};
use cv_core::test_support::intent;
use cv_core::{Change, DeployResult, HandlerResult, LogLevel};
use cv_storage::FailPoint;
use std::time::Duration;

// =============================================================================
// Results
// =============================================================================

#[tokio::test]
async fn successful_deploy_is_recorded_everywhere() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.run().await;

    let state = ctx.state("a");
    assert_eq!(state.compliance, Compliance::Compliant);
    assert_eq!(state.last_deploy_result, DeployResult::Deployed);
    assert_eq!(state.last_deployed_hash.as_deref(), Some("a-v1"));
    assert_eq!(state.last_handler_run_compliant, Some(true));

    let record = ctx.store.record(&ctx.env, &r("a")).unwrap();
    assert_eq!(record.state, state);
    let actions = ctx.store.actions_for(&ctx.env, &r("a"));
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].status, HandlerResult::Deployed);
    assert!(actions[0].is_finished());
}

#[tokio::test]
async fn failed_deploy_leaves_resource_non_compliant() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.executor.script(&r("a"), [FakeOutcome::Error(ExecutorError::Failed("boom".into()))]);
    ctx.run().await;

    let state = ctx.state("a");
    assert_eq!(state.compliance, Compliance::NonCompliant);
    assert_eq!(state.last_deploy_result, DeployResult::Failed);
    assert!(ctx.sched.model.is_dirty(&r("a")));

    let action = &ctx.store.actions_for(&ctx.env, &r("a"))[0];
    assert_eq!(action.status, HandlerResult::Failed);
    assert_eq!(action.messages[0].level, LogLevel::Error);
    assert!(action.messages[0].msg.contains("boom"));
}

#[tokio::test]
async fn cancelled_deploy_is_recorded_as_cancelled() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.executor.script(&r("a"), [FakeOutcome::Error(ExecutorError::Cancelled)]);
    ctx.run().await;

    assert_eq!(ctx.state("a").last_deploy_result, DeployResult::Failed);
    let action = &ctx.store.actions_for(&ctx.env, &r("a"))[0];
    assert_eq!(action.status, HandlerResult::Cancelled);
    assert_eq!(action.messages[0].level, LogLevel::Warning);
}

#[tokio::test]
async fn stale_result_only_records_the_attempt() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.executor.hold();
    assert_eq!(ctx.sched.dispatch_ready(), 1);

    ctx.take_in(ModelVersion::new(2).with_resource(intent("a", "a-v2", &[]))).await;
    assert!(ctx.sched.queue.is_pending(&TaskKey::deploy(r("a"))), "new intent queued");

    ctx.executor.open();
    let joined = ctx.sched.running.join_next().await.unwrap();
    ctx.sched.on_joined(joined).await;

    let state = ctx.state("a");
    assert_eq!(state.compliance, Compliance::HasUpdate);
    assert_eq!(state.last_deploy_result, DeployResult::Deployed);
    assert_eq!(state.last_deployed_hash, None);

    ctx.run().await;
    let state = ctx.state("a");
    assert_eq!(state.compliance, Compliance::Compliant);
    assert_eq!(state.last_deployed_hash.as_deref(), Some("a-v2"));
    let hashes: Vec<String> =
        ctx.executor.calls().into_iter().map(|c| c.attribute_hash).collect();
    assert_eq!(hashes, vec!["a-v1", "a-v2"]);
}

#[tokio::test]
async fn result_for_orphaned_resource_lands_on_the_orphan() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a", "b"])).await;
    ctx.executor.hold();
    assert_eq!(ctx.sched.dispatch_ready(), 1);

    ctx.take_in(ModelVersion::new(2).with_resource(intent("b", "b-v2", &[]))).await;
    assert!(!ctx.sched.model.contains(&r("a")));

    ctx.executor.open();
    ctx.run().await;

    let orphan = ctx.sched.get_resource_state(&r("a")).unwrap();
    assert!(orphan.is_orphan);
    assert_eq!(orphan.last_deploy_result, DeployResult::Deployed);
    assert_eq!(ctx.compliance("b"), Compliance::Compliant);
}

// =============================================================================
// Persistence failures
// =============================================================================

#[tokio::test]
async fn unrecorded_start_skips_the_executor() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.store.fail_next(FailPoint::InProgress, 1);
    ctx.run().await;

    assert!(ctx.executor.calls().is_empty());
    assert_eq!(ctx.compliance("a"), Compliance::HasUpdate);
    assert!(ctx.sched.is_idle(), "no immediate retry");

    assert_eq!(ctx.sched.deploy("retry", TaskPriority::UserDeploy, None), 1);
    ctx.run().await;
    assert_eq!(ctx.compliance("a"), Compliance::Compliant);
}

#[tokio::test]
async fn unrecorded_repair_start_rearms_the_timer() {
    let config = test_config().repair_interval(TimerSetting::Interval(Duration::from_secs(50)));
    let mut ctx = setup_with(config);
    ctx.take_in(chain(1, &["a"])).await;
    ctx.run().await;
    assert_eq!(ctx.compliance("a"), Compliance::Compliant);

    ctx.clock.advance(Duration::from_secs(50));
    assert_eq!(ctx.sched.fire_timers(), 1);
    ctx.store.fail_next(FailPoint::InProgress, 1);
    ctx.run().await;

    assert_eq!(ctx.executor.deploys_of(&r("a")), 1, "repair never reached the executor");
    let timer = ctx.sched.timers.timer(&r("a")).expect("timer re-armed");
    assert_eq!(timer.kind, TimerKind::Repair);
    assert_eq!(timer.due, ctx.clock.utc_now() + chrono::TimeDelta::seconds(50));
    assert_eq!(ctx.sched.fire_timers(), 0, "not due again right away");

    ctx.clock.advance(Duration::from_secs(50));
    assert_eq!(ctx.sched.fire_timers(), 1);
    ctx.run().await;
    assert_eq!(ctx.executor.deploys_of(&r("a")), 2);
}

#[tokio::test]
async fn unrecorded_result_is_closed_out_as_failed() {
    let config = test_config()
        .deploy_interval(TimerSetting::Interval(Duration::from_secs(30)))
        .repair_interval(TimerSetting::Interval(Duration::from_secs(100)));
    let mut ctx = setup_with(config);
    ctx.take_in(chain(1, &["a"])).await;
    ctx.store.fail_next(FailPoint::DeployDone, 1);
    ctx.run().await;

    assert_eq!(ctx.executor.calls().len(), 1);
    let state = ctx.state("a");
    assert_eq!(state.compliance, Compliance::NonCompliant);
    assert_eq!(state.last_deploy_result, DeployResult::Failed);
    assert!(ctx.sched.model.is_dirty(&r("a")));
    assert_eq!(ctx.sched.timers.timer(&r("a")).unwrap().kind, TimerKind::Deploy);
    assert!(ctx.sched.is_idle());

    let action = &ctx.store.actions_for(&ctx.env, &r("a"))[0];
    assert_eq!(action.status, HandlerResult::Failed);
    assert!(action.is_finished());
    let last = action.messages.last().unwrap();
    assert_eq!(last.level, LogLevel::Error);
    assert!(last.msg.contains("could not record deploy result"), "{}", last.msg);
    let record = ctx.store.record(&ctx.env, &r("a")).unwrap();
    assert_eq!(record.state.last_deploy_result, DeployResult::Failed);

    ctx.clock.advance(Duration::from_secs(30));
    assert_eq!(ctx.sched.fire_timers(), 1);
    ctx.run().await;
    assert_eq!(ctx.compliance("a"), Compliance::Compliant);
}

// =============================================================================
// Blocking
// =============================================================================

#[tokio::test]
async fn failure_temporarily_blocks_dependents() {
    let mut ctx = chain_of_three().await;
    ctx.executor.script(&r("a"), [FakeOutcome::status(HandlerResult::Failed)]);
    ctx.run().await;

    assert_eq!(ctx.state("a").last_deploy_result, DeployResult::Failed);
    for name in ["b", "c"] {
        let state = ctx.state(name);
        assert_eq!(state.blocked, Blocked::TemporarilyBlocked, "{name}");
        assert_eq!(state.compliance, Compliance::NonCompliant, "{name}");
    }
    let record = ctx.store.record(&ctx.env, &r("b")).unwrap();
    assert_eq!(record.state.blocked, Blocked::NotBlocked, "temporary blocks are not persisted");
}

#[tokio::test]
async fn success_after_failure_recovers_dependents() {
    let mut ctx = chain_of_three().await;
    ctx.executor.script(&r("a"), [FakeOutcome::status(HandlerResult::Failed)]);
    ctx.run().await;
    assert_eq!(ctx.sched.deploy("env deploy", TaskPriority::UserDeploy, None), 1, "only a");

    ctx.run().await;

    for name in ["a", "b", "c"] {
        let state = ctx.state(name);
        assert_eq!(state.compliance, Compliance::Compliant, "{name}");
        assert_eq!(state.blocked, Blocked::NotBlocked, "{name}");
    }
    let last_b = ctx.executor.calls().into_iter().filter(|c| c.resource == r("b")).last();
    assert_eq!(
        last_b.unwrap().reason,
        format!("Deploying because a recovery event was received from {}", r("a"))
    );
}

#[tokio::test]
async fn temporarily_blocked_success_warns_about_failed_requirement() {
    let mut ctx = chain_of_three().await;
    ctx.executor.script(&r("a"), [FakeOutcome::status(HandlerResult::Failed)]);
    ctx.run().await;
    assert_eq!(ctx.state("b").blocked, Blocked::TemporarilyBlocked);

    ctx.clock.advance(Duration::from_secs(10));
    ctx.executor.script(&r("b"), [FakeOutcome::deployed(Change::NoChange)]);
    ctx.sched.deploy_resource(&r("b"), "manual", TaskPriority::UserDeploy).unwrap();
    ctx.run().await;

    assert_eq!(ctx.state("b").blocked, Blocked::NotBlocked);
    let actions = ctx.store.actions_for(&ctx.env, &r("b"));
    let action = actions.iter().find(|a| a.status == HandlerResult::Deployed).unwrap();
    let warning = action.messages.iter().find(|m| m.level == LogLevel::Warning).unwrap();
    assert!(warning.msg.contains("expected to skip for dependencies"), "{}", warning.msg);
    assert!(warning.msg.contains(&format!("{}: failed", r("a"))), "{}", warning.msg);
}

#[tokio::test]
async fn plain_success_carries_no_warning() {
    let mut ctx = chain_of_three().await;
    ctx.run().await;

    for name in ["a", "b", "c"] {
        let action = ctx.store.actions_for(&ctx.env, &r(name)).pop().unwrap();
        assert!(action.messages.iter().all(|m| m.level != LogLevel::Warning), "{name}");
    }
}

#[tokio::test]
async fn undefined_result_hard_blocks_dependents() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a", "b"])).await;
    ctx.executor.script(&r("a"), [FakeOutcome::status(HandlerResult::Undefined)]);
    ctx.run().await;

    assert_eq!(ctx.executor.calls().len(), 1);
    assert_eq!(ctx.compliance("a"), Compliance::Undefined);
    assert_eq!(ctx.state("a").blocked, Blocked::Blocked);
    assert_eq!(ctx.state("b").blocked, Blocked::Blocked);
    let record = ctx.store.record(&ctx.env, &r("b")).unwrap();
    assert_eq!(record.state.blocked, Blocked::Blocked);
}

// =============================================================================
// Events
// =============================================================================

/// `d` sends events to `c`
async fn event_pair() -> TestContext {
    let mut ctx = setup();
    let model = ModelVersion::new(1)
        .with_resource(sender("d", "d1"))
        .with_resource(intent("c", "c1", &["d"]));
    ctx.take_in(model).await;
    ctx.run().await;
    ctx.clock.advance(Duration::from_secs(10));
    ctx
}

#[tokio::test]
async fn change_on_sender_redeploys_listener() {
    let mut ctx = event_pair().await;
    assert_eq!(ctx.executor.deploys_of(&r("c")), 1);

    ctx.executor.script(&r("d"), [FakeOutcome::deployed(Change::Created)]);
    ctx.sched.deploy_resource(&r("d"), "manual", TaskPriority::UserDeploy).unwrap();
    ctx.run().await;

    assert_eq!(ctx.executor.deploys_of(&r("c")), 2);
    let last = ctx.executor.calls().pop().unwrap();
    assert_eq!(last.resource, r("c"));
    assert_eq!(last.reason, format!("Deploying because an event was received from {}", r("d")));
}

#[tokio::test]
async fn nochange_on_sender_sends_no_event() {
    let mut ctx = event_pair().await;

    ctx.sched.deploy_resource(&r("d"), "manual", TaskPriority::UserDeploy).unwrap();
    ctx.run().await;

    assert_eq!(ctx.executor.deploys_of(&r("d")), 2);
    assert_eq!(ctx.executor.deploys_of(&r("c")), 1);
}

#[tokio::test]
async fn events_from_several_requirements_coalesce() {
    let mut ctx = setup();
    let model = ModelVersion::new(1)
        .with_resource(sender("a", "a1"))
        .with_resource(sender("b", "b1"))
        .with_resource(intent("c", "c1", &["a", "b"]));
    ctx.take_in(model).await;
    ctx.run().await;
    assert_eq!(ctx.executor.deploys_of(&r("c")), 1);
    ctx.clock.advance(Duration::from_secs(10));

    for name in ["a", "b"] {
        ctx.executor.script(&r(name), [FakeOutcome::deployed(Change::Updated)]);
        ctx.sched.deploy_resource(&r(name), "manual", TaskPriority::UserDeploy).unwrap();
    }
    ctx.run().await;

    assert_eq!(ctx.executor.deploys_of(&r("c")), 2, "one deploy for both events");
}

#[tokio::test]
async fn listener_that_opts_out_is_not_redeployed() {
    let mut ctx = setup();
    let deaf = ResourceIntent::builder()
        .id(r("c"))
        .attribute_hash("c1")
        .require(r("d"))
        .receive_events(false)
        .build();
    ctx.take_in(ModelVersion::new(1).with_resource(sender("d", "d1")).with_resource(deaf)).await;
    ctx.run().await;
    ctx.clock.advance(Duration::from_secs(10));

    ctx.executor.script(&r("d"), [FakeOutcome::deployed(Change::Created)]);
    ctx.sched.deploy_resource(&r("d"), "manual", TaskPriority::UserDeploy).unwrap();
    ctx.run().await;

    assert_eq!(ctx.executor.deploys_of(&r("c")), 1);
}
