// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cv_adapters::FakeOutcome;
use cv_core::test_support::intent;
use cv_core::HandlerResult;
use cv_storage::FailPoint;

// =============================================================================
// Taking in versions
// =============================================================================

#[tokio::test]
async fn new_version_queues_every_new_resource() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a", "b"])).await;

    assert_eq!(ctx.sched.version(), Some(1));
    assert_eq!(ctx.sched.queue.pending_len(), 2);
    let task = ctx.sched.queue.task(&TaskKey::deploy(r("b"))).unwrap();
    assert_eq!(task.priority, TaskPriority::NewVersionDeploy);
    assert_eq!(task.reason, "Deploying because a new version 1 was released");

    let record = ctx.store.record(&ctx.env, &r("a")).unwrap();
    assert_eq!(record.state.compliance, Compliance::HasUpdate);
    assert_eq!(record.model_version, 1);
}

#[tokio::test]
async fn unchanged_intent_is_not_redeployed() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a", "b"])).await;
    ctx.run().await;

    let v2 = ModelVersion::new(2)
        .with_resource(intent("a", "a-v1", &[]))
        .with_resource(intent("b", "b-v2", &["a"]));
    ctx.take_in(v2).await;

    assert_eq!(ctx.compliance("a"), Compliance::Compliant);
    assert_eq!(ctx.compliance("b"), Compliance::HasUpdate);
    assert!(!ctx.scheduled("a"));
    assert!(ctx.scheduled("b"));
}

#[tokio::test]
async fn same_version_twice_is_a_no_op() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.run().await;

    assert!(!ctx.sched.new_version(1).await.unwrap());
    assert!(!ctx.sched.read_version().await.unwrap());
    assert!(ctx.sched.is_idle());
    assert_eq!(ctx.executor.calls().len(), 1);
}

#[tokio::test]
async fn read_version_catches_up_to_the_newest() {
    let mut ctx = setup();
    ctx.release(chain(1, &["a"]));
    ctx.release(chain(2, &["a", "b"]));
    ctx.release(chain(3, &["a", "b"]));

    assert!(ctx.sched.read_version().await.unwrap());
    assert_eq!(ctx.sched.version(), Some(3));
    assert_eq!(ctx.sched.model.intent(&r("b")).unwrap().attribute_hash, "b-v3");
    assert_eq!(ctx.store.data().environments[&ctx.env].last_processed_version, Some(3));
}

#[tokio::test]
async fn new_version_can_stop_at_an_intermediate() {
    let mut ctx = setup();
    ctx.release(chain(1, &["a", "b"]));
    ctx.release(chain(2, &["a"]));

    assert!(ctx.sched.new_version(1).await.unwrap());
    assert_eq!(ctx.sched.version(), Some(1));
    assert!(ctx.sched.model.contains(&r("b")));

    assert!(ctx.sched.new_version(2).await.unwrap());
    assert_eq!(ctx.sched.version(), Some(2));
    assert!(!ctx.sched.model.contains(&r("b")));
}

#[tokio::test]
async fn unknown_version_is_rejected() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;

    let err = ctx.sched.new_version(9).await.unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownVersion(9)));
    assert_eq!(ctx.sched.version(), Some(1));
}

// =============================================================================
// Orphans
// =============================================================================

#[tokio::test]
async fn dropped_resource_becomes_an_orphan() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a", "b"])).await;
    ctx.run().await;

    ctx.take_in(ModelVersion::new(2).with_resource(intent("b", "b-v2", &[]))).await;

    assert!(!ctx.sched.model.contains(&r("a")));
    assert!(ctx.sched.model.orphan(&r("a")).is_some());
    assert!(!ctx.scheduled("a"));
    let record = ctx.store.record(&ctx.env, &r("a")).unwrap();
    assert!(record.state.is_orphan);

    ctx.run().await;
    assert_eq!(ctx.executor.deploys_of(&r("a")), 1, "orphans are never deployed");
}

// =============================================================================
// Failure and restart
// =============================================================================

#[tokio::test]
async fn failed_commit_leaves_the_model_untouched() {
    let mut ctx = setup();
    ctx.release(chain(1, &["a"]));
    ctx.store.fail_next(FailPoint::Commit, 1);

    assert!(ctx.sched.read_version().await.is_err());
    assert_eq!(ctx.sched.version(), None);
    assert!(ctx.sched.model.is_empty());
    assert!(ctx.sched.is_idle());

    assert!(ctx.sched.read_version().await.unwrap(), "retried on the next trigger");
    assert_eq!(ctx.sched.version(), Some(1));
}

#[tokio::test]
async fn start_restores_state_and_catches_up() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a", "b"])).await;
    ctx.executor.script(&r("a"), [FakeOutcome::status(HandlerResult::Failed)]);
    ctx.run().await;
    assert_eq!(ctx.state("b").blocked, Blocked::TemporarilyBlocked);

    ctx.release(
        ModelVersion::new(2)
            .with_resource(intent("a", "a-v1", &[]))
            .with_resource(intent("b", "b-v1", &["a"]))
            .with_resource(intent("c", "c-v2", &[])),
    );
    ctx.restart();
    ctx.sched.start().await.unwrap();

    assert_eq!(ctx.sched.version(), Some(2));
    assert_eq!(ctx.compliance("a"), Compliance::NonCompliant);
    assert_eq!(ctx.state("b").blocked, Blocked::NotBlocked, "temporary block not restored");
    let reason = &ctx.sched.queue.task(&TaskKey::deploy(r("a"))).unwrap().reason;
    assert_eq!(reason, &format!("Deploying {} because it was dirty at startup", r("a")));
    assert!(ctx.scheduled("c"));

    ctx.run().await;
    for name in ["a", "b", "c"] {
        assert_eq!(ctx.compliance(name), Compliance::Compliant, "{name}");
    }
}
