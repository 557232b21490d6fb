// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cv_adapters::CallKind;
use cv_core::test_support::intent;
use cv_core::{ResourceStatus, TaskKind};

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn chain_deploys_in_dependency_order() {
    let mut ctx = chain_of_three().await;

    assert_eq!(ctx.sched.dispatch_ready(), 1, "only the root may start");
    assert!(ctx.sched.queue.is_running(&TaskKey::deploy(r("a"))));
    ctx.run().await;

    let order: Vec<ResourceId> = ctx.executor.calls().into_iter().map(|c| c.resource).collect();
    assert_eq!(order, vec![r("a"), r("b"), r("c")]);
    for name in ["a", "b", "c"] {
        assert_eq!(ctx.compliance(name), Compliance::Compliant, "{name}");
    }
    assert!(ctx.sched.is_idle());
}

#[tokio::test]
async fn requirement_statuses_reach_the_executor() {
    let mut ctx = chain_of_three().await;
    ctx.run().await;

    let calls = ctx.executor.calls();
    assert!(calls[0].requires.is_empty());
    assert_eq!(calls[1].requires.get(&r("a")), Some(&ResourceStatus::Deployed));
    assert_eq!(calls[2].requires.get(&r("b")), Some(&ResourceStatus::Deployed));
}

#[tokio::test]
async fn deploy_reason_is_passed_along() {
    let mut ctx = setup();
    ctx.take_in(chain(3, &["a"])).await;
    ctx.run().await;

    let calls = ctx.executor.calls();
    assert_eq!(calls[0].reason, "Deploying because a new version 3 was released");
    assert!(!calls[0].repair);
    assert_eq!(calls[0].attribute_hash, "a-v3");
}

// =============================================================================
// Blocking
// =============================================================================

#[tokio::test]
async fn blocked_resources_are_never_dispatched() {
    let mut ctx = setup();
    let model = ModelVersion::new(1)
        .with_undefined(intent("u", "u1", &[]))
        .with_resource(intent("d", "d1", &["u"]))
        .with_resource(intent("free", "free1", &[]));
    ctx.take_in(model).await;
    ctx.run().await;

    let deployed: Vec<ResourceId> =
        ctx.executor.calls().into_iter().map(|c| c.resource).collect();
    assert_eq!(deployed, vec![r("free")]);
    assert_eq!(ctx.state("u").blocked, Blocked::Blocked);
    assert_eq!(ctx.state("d").blocked, Blocked::Blocked);
}

#[tokio::test]
async fn queued_task_for_blocked_resource_is_dropped() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.sched.model.set_blocked(&r("a"), Blocked::Blocked).unwrap();

    assert_eq!(ctx.sched.dispatch_ready(), 0);
    assert!(!ctx.scheduled("a"));
    assert!(ctx.executor.calls().is_empty());
}

// =============================================================================
// Exclusivity and concurrency
// =============================================================================

#[tokio::test]
async fn repair_waits_for_in_flight_deploy() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.executor.hold();
    assert_eq!(ctx.sched.dispatch_ready(), 1);

    ctx.sched.repair("manual repair", TaskPriority::UserRepair, None);
    assert_eq!(ctx.sched.dispatch_ready(), 0, "deploy slot is taken");

    ctx.executor.open();
    ctx.run().await;

    let kinds: Vec<bool> = ctx.executor.calls().iter().map(|c| c.repair).collect();
    assert_eq!(kinds, vec![false, true]);
    assert!(!ctx.executor.overlap_detected());
}

#[tokio::test]
async fn agent_concurrency_limits_in_flight_work() {
    let mut ctx = setup_with(test_config().default_agent_concurrency(1));
    let model = ModelVersion::new(1)
        .with_resource(intent("a", "a1", &[]))
        .with_resource(intent("b", "b1", &[]))
        .with_resource(
            ResourceIntent::builder().id(rid("agent2", "c")).attribute_hash("c1").build(),
        );
    ctx.take_in(model).await;

    assert_eq!(ctx.sched.dispatch_ready(), 2, "one per agent");
    ctx.run().await;

    assert_eq!(ctx.executor.max_in_flight(), 2);
    assert_eq!(ctx.executor.calls().len(), 3);
}

#[tokio::test]
async fn max_concurrency_caps_the_whole_environment() {
    let mut ctx = setup_with(test_config().max_concurrency(1usize));
    let model = ModelVersion::new(1)
        .with_resource(intent("a", "a1", &[]))
        .with_resource(intent("b", "b1", &[]));
    ctx.take_in(model).await;

    assert_eq!(ctx.sched.dispatch_ready(), 1);
    ctx.run().await;
    assert_eq!(ctx.executor.max_in_flight(), 1);
}

#[tokio::test]
async fn facts_run_alongside_a_deploy() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.executor.hold();
    ctx.sched.get_facts(&r("a")).unwrap();

    assert_eq!(ctx.sched.dispatch_ready(), 2);
    assert!(ctx.sched.queue.is_running(&TaskKey::new(r("a"), TaskKind::GetFact)));

    ctx.executor.open();
    ctx.run().await;
    let kinds: Vec<CallKind> = ctx.executor.calls().iter().map(|c| c.kind).collect();
    assert!(kinds.contains(&CallKind::Facts));
    assert!(kinds.contains(&CallKind::Deploy));
    assert!(!ctx.executor.overlap_detected());
}

#[tokio::test]
async fn untracked_resource_is_rejected() {
    let mut ctx = chain_of_three().await;

    let err = ctx.sched.deploy_resource(&r("nope"), "manual", TaskPriority::UserDeploy);
    assert!(matches!(err, Err(SchedulerError::UnknownResource(_))));
    assert!(matches!(ctx.sched.get_facts(&r("nope")), Err(SchedulerError::UnknownResource(_))));
}
