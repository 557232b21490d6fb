// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! What users see when deploys keep failing

use crate::prelude::*;
use crate::prelude::assert_eq;

/// `a <- b`, plus an unrelated `z`
fn with_bystander() -> ModelVersion {
    ModelVersion::new(1)
        .with_resource(intent("a", "a1", &[]))
        .with_resource(intent("b", "b1", &["a"]))
        .with_resource(intent("z", "z1", &[]))
}

#[tokio::test]
async fn failing_resource_is_retried_on_its_deploy_interval() {
    let config = quiet_config().deploy_interval(TimerSetting::from_seconds(60));
    let mut world = World::with_config(config);
    let failed = FakeOutcome::status(HandlerResult::Failed);
    world.executor.script(&res("a"), [failed.clone(), failed]);
    world.take_in(with_bystander()).await;
    world.settle().await;

    assert_eq!(world.state("a").compliance, Compliance::NonCompliant);
    assert_eq!(world.state("b").blocked, Blocked::TemporarilyBlocked);
    assert_eq!(world.state("z").compliance, Compliance::Compliant);

    world.clock.advance(Duration::from_secs(60));
    assert_eq!(world.sched.fire_timers(), 1);
    world.settle().await;
    assert_eq!(world.state("a").compliance, Compliance::NonCompliant);
    assert_eq!(world.executor.deploys_of(&res("a")), 2);

    world.clock.advance(Duration::from_secs(60));
    assert_eq!(world.sched.fire_timers(), 1);
    world.settle().await;

    for name in ["a", "b", "z"] {
        let state = world.state(name);
        assert_eq!(state.compliance, Compliance::Compliant, "{name}");
        assert_eq!(state.blocked, Blocked::NotBlocked, "{name}");
    }
    assert_eq!(world.executor.deploys_of(&res("z")), 1, "bystander left alone");
}

#[tokio::test]
async fn unreachable_agent_fails_the_deploy() {
    let mut world = World::new();
    world.executor.script(
        &res("a"),
        [FakeOutcome::Error(ExecutorError::Unreachable("agent1".to_string()))],
    );
    world.take_in(chain(1, &["a"])).await;
    world.settle().await;

    assert_eq!(world.state("a").compliance, Compliance::NonCompliant);
    let actions = world.store.actions_for(&world.env, &res("a"));
    assert_eq!(actions[0].status, HandlerResult::Failed);
    assert!(actions[0].messages[0].msg.contains("unreachable"));
}

#[tokio::test]
async fn lost_deploy_result_is_redeployed_on_request() {
    let mut world = World::new();
    world.take_in(chain(1, &["a"])).await;
    world.store.fail_next(FailPoint::DeployDone, 1);
    world.settle().await;
    assert_eq!(world.state("a").compliance, Compliance::HasUpdate);

    assert_eq!(world.sched.deploy("retry", TaskPriority::UserDeploy, None), 1);
    world.settle().await;
    assert_eq!(world.state("a").compliance, Compliance::Compliant);
    assert_eq!(world.executor.deploys_of(&res("a")), 2);
}

#[tokio::test]
async fn intake_survives_a_failed_commit() {
    let mut world = World::new();
    world.release(chain(1, &["a"]));
    world.store.fail_next(FailPoint::Commit, 1);

    assert!(world.sched.read_version().await.is_err());
    assert_eq!(world.sched.version(), None);

    assert!(world.sched.read_version().await.unwrap());
    world.settle().await;
    assert_eq!(world.state("a").compliance, Compliance::Compliant);
}
