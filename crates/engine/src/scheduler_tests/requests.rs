// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::status::Discrepancy;
use crate::timers::TimerKind;
use crate::work::Enqueued;
use cv_core::test_support::intent;
use cv_core::{DryRunId, HandlerResult, TaskKind};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// `u` is undefined, `d` requires it, `f` stands alone
fn partly_undefined(version: u64) -> ModelVersion {
    ModelVersion::new(version)
        .with_undefined(intent("u", "u1", &[]))
        .with_resource(intent("d", "d1", &["u"]))
        .with_resource(intent("f", "f1", &[]))
}

// =============================================================================
// Deploy and repair
// =============================================================================

#[tokio::test]
async fn deploy_can_target_one_agent() {
    let mut ctx = setup();
    let x = ResourceIntent::builder().id(rid("agent2", "x")).attribute_hash("x1").build();
    let model = ModelVersion::new(1).with_resource(intent("a", "a1", &[])).with_resource(x);
    ctx.take_in(model).await;
    ctx.sched.queue.clear_pending();

    let queued = ctx.sched.deploy("agent deploy", TaskPriority::UserDeploy, Some("agent2"));
    assert_eq!(queued, 1);
    assert!(ctx.sched.queue.is_pending(&TaskKey::deploy(rid("agent2", "x"))));
    assert!(!ctx.scheduled("a"));
}

#[tokio::test]
async fn deploy_skips_compliant_resources() {
    let mut ctx = chain_of_three().await;
    ctx.run().await;

    assert_eq!(ctx.sched.deploy("env deploy", TaskPriority::UserDeploy, None), 0);
    assert!(ctx.sched.is_idle());
}

#[tokio::test]
async fn repair_covers_everything_not_hard_blocked() {
    let mut ctx = setup();
    ctx.take_in(partly_undefined(1)).await;
    ctx.run().await;

    assert_eq!(ctx.sched.repair("env repair", TaskPriority::UserRepair, None), 1);
    ctx.run().await;

    let last = ctx.executor.calls().pop().unwrap();
    assert_eq!(last.resource, r("f"));
    assert!(last.repair);
    assert_eq!(last.reason, "env repair");
}

#[tokio::test]
async fn deploy_resource_redeploys_a_compliant_resource() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.run().await;

    let queued = ctx.sched.deploy_resource(&r("a"), "manual", TaskPriority::UserDeploy).unwrap();
    assert_eq!(queued, Enqueued::Queued);
    ctx.run().await;
    assert_eq!(ctx.executor.deploys_of(&r("a")), 2);
}

#[tokio::test]
async fn deploy_resource_refuses_blocked_resources() {
    let mut ctx = setup();
    ctx.take_in(partly_undefined(1)).await;

    let err = ctx.sched.deploy_resource(&r("d"), "manual", TaskPriority::UserDeploy);
    assert!(matches!(err, Err(SchedulerError::InvalidTransition { .. })));
}

#[tokio::test]
async fn deploy_resource_joins_an_in_flight_deploy_of_the_same_intent() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.executor.hold();
    ctx.sched.dispatch_ready();

    let queued = ctx.sched.deploy_resource(&r("a"), "manual", TaskPriority::UserDeploy).unwrap();
    assert_eq!(queued, Enqueued::Duplicate);

    ctx.executor.open();
    ctx.run().await;
    assert_eq!(ctx.executor.deploys_of(&r("a")), 1);
}

// =============================================================================
// Pause and halt
// =============================================================================

/// `a` on agent1 and `x` on agent2, both fresh
fn two_agents(version: u64) -> ModelVersion {
    let x = ResourceIntent::builder().id(rid("agent2", "x")).attribute_hash("x1").build();
    ModelVersion::new(version).with_resource(intent("a", "a1", &[])).with_resource(x)
}

#[tokio::test]
async fn paused_agent_keeps_its_tasks_queued() {
    let mut ctx = setup();
    assert!(ctx.sched.pause_agent("agent1").await.unwrap());
    assert!(!ctx.sched.pause_agent("agent1").await.unwrap(), "already paused");
    ctx.take_in(two_agents(1)).await;
    ctx.run().await;

    assert_eq!(ctx.executor.deploys_of(&rid("agent2", "x")), 1);
    assert_eq!(ctx.executor.deploys_of(&r("a")), 0);
    assert!(ctx.sched.queue.is_pending(&TaskKey::deploy(r("a"))));
    let stored = ctx.store.run_state(&ctx.env).await.unwrap();
    assert!(stored.paused_agents.contains("agent1"));

    assert!(ctx.sched.resume_agent("agent1").await.unwrap());
    ctx.run().await;
    assert_eq!(ctx.compliance("a"), Compliance::Compliant);
    assert!(ctx.store.run_state(&ctx.env).await.unwrap().paused_agents.is_empty());
}

#[tokio::test]
async fn halt_holds_every_agent_until_resumed() {
    let mut ctx = setup();
    ctx.take_in(two_agents(1)).await;
    assert!(ctx.sched.halt().await.unwrap());
    ctx.run().await;

    assert!(ctx.executor.calls().is_empty());
    assert!(!ctx.sched.is_idle());
    assert!(ctx.sched.is_halted());

    assert!(ctx.sched.resume().await.unwrap());
    assert!(!ctx.sched.resume().await.unwrap(), "already running");
    ctx.run().await;
    assert_eq!(ctx.compliance("a"), Compliance::Compliant);
    assert!(ctx.sched.is_idle());
}

#[tokio::test]
async fn dry_run_skips_paused_agents() {
    let mut ctx = setup();
    ctx.release(two_agents(1));
    ctx.sched.pause_agent("agent2").await.unwrap();
    let id = DryRunId::new("dr-paused");

    assert_eq!(ctx.sched.dry_run(id.clone(), 1).await.unwrap(), 1);
    ctx.run().await;

    let reports = ctx.store.dryrun_reports(&ctx.env, &id);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].rvid.resource_id(), r("a"));
}

#[tokio::test]
async fn run_state_is_restored_on_start() {
    let mut ctx = setup();
    ctx.take_in(two_agents(1)).await;
    ctx.sched.pause_agent("agent2").await.unwrap();
    ctx.sched.halt().await.unwrap();

    ctx.restart();
    ctx.sched.start().await.unwrap();

    assert!(ctx.sched.is_halted());
    assert!(ctx.sched.is_agent_paused("agent2"));
    assert!(!ctx.sched.is_agent_paused("agent1"));
}

#[tokio::test]
async fn failed_pause_leaves_the_agent_running() {
    let mut ctx = setup();
    ctx.store.fail_next(cv_storage::FailPoint::RunState, 1);
    assert!(ctx.sched.pause_agent("agent1").await.is_err());
    assert!(!ctx.sched.is_agent_paused("agent1"));
}

// =============================================================================
// Dry runs and facts
// =============================================================================

#[tokio::test]
async fn dry_run_reports_every_resource() {
    let mut ctx = setup();
    ctx.release(partly_undefined(1));
    let id = DryRunId::new("dr-1");

    assert_eq!(ctx.sched.dry_run(id.clone(), 1).await.unwrap(), 1);
    ctx.run().await;

    let reports: BTreeMap<ResourceId, HandlerResult> = ctx
        .store
        .dryrun_reports(&ctx.env, &id)
        .into_iter()
        .map(|report| (report.rvid.resource_id(), report.status))
        .collect();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[&r("u")], HandlerResult::Failed);
    assert_eq!(reports[&r("d")], HandlerResult::Failed);
    assert_eq!(reports[&r("f")], HandlerResult::Dry);
    assert!(ctx.sched.model.is_empty(), "dry runs do not touch tracked state");
}

#[tokio::test]
async fn dry_run_tasks_are_kept_apart_from_deploys() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    let id = DryRunId::new("dr-2");

    assert_eq!(ctx.sched.dry_run(id.clone(), 1).await.unwrap(), 1);
    assert!(ctx.sched.queue.is_pending(&TaskKey::new(r("a"), TaskKind::DryRun(id.clone()))));
    assert!(ctx.sched.queue.is_pending(&TaskKey::deploy(r("a"))));
    ctx.run().await;

    assert_eq!(ctx.store.dryrun_reports(&ctx.env, &id).len(), 1);
    assert_eq!(ctx.compliance("a"), Compliance::Compliant);
    assert!(!ctx.executor.overlap_detected());
}

#[tokio::test]
async fn dry_run_of_unknown_version_fails() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;

    let err = ctx.sched.dry_run(DryRunId::new("dr-3"), 5).await.unwrap_err();
    assert!(matches!(err, SchedulerError::UnknownVersion(5)));
}

#[tokio::test]
async fn facts_are_stored_as_parameters() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.run().await;
    ctx.executor.set_facts(&r("a"), BTreeMap::from([("size".to_string(), json!(3))]));

    assert_eq!(ctx.sched.get_facts(&r("a")).unwrap(), Enqueued::Queued);
    ctx.run().await;

    let record = ctx.store.record(&ctx.env, &r("a")).unwrap();
    assert_eq!(record.parameters.get("size"), Some(&json!(3)));
}

// =============================================================================
// Timers
// =============================================================================

#[tokio::test]
async fn compliant_resource_gets_a_repair_timer() {
    let config = test_config()
        .deploy_interval(TimerSetting::from_seconds(100))
        .repair_interval(TimerSetting::from_seconds(50));
    let mut ctx = setup_with(config);
    ctx.take_in(chain(1, &["a"])).await;
    ctx.run().await;

    let timer = ctx.sched.timers.timer(&r("a")).unwrap();
    assert_eq!(timer.kind, TimerKind::Repair);

    ctx.clock.advance(Duration::from_secs(49));
    assert_eq!(ctx.sched.fire_timers(), 0);
    ctx.clock.advance(Duration::from_secs(1));
    assert_eq!(ctx.sched.fire_timers(), 1);

    let task = ctx.sched.queue.task(&TaskKey::new(r("a"), TaskKind::Repair)).unwrap();
    assert_eq!(task.priority, TaskPriority::IntervalRepair);
    ctx.run().await;
    assert!(ctx.executor.calls().pop().unwrap().repair);
    assert!(ctx.sched.timers.timer(&r("a")).is_some(), "re-armed after the repair");
}

#[tokio::test]
async fn failed_resource_gets_a_deploy_timer() {
    let config = test_config().deploy_interval(TimerSetting::from_seconds(30));
    let mut ctx = setup_with(config);
    ctx.take_in(chain(1, &["a"])).await;
    ctx.executor.script(&r("a"), [cv_adapters::FakeOutcome::status(HandlerResult::Failed)]);
    ctx.run().await;

    assert_eq!(ctx.sched.timers.timer(&r("a")).unwrap().kind, TimerKind::Deploy);
    ctx.clock.advance(Duration::from_secs(30));
    assert_eq!(ctx.sched.fire_timers(), 1);
    ctx.run().await;
    assert_eq!(ctx.compliance("a"), Compliance::Compliant);
}

#[tokio::test]
async fn cron_repair_covers_the_environment() {
    let config = test_config().repair_interval(TimerSetting::parse("*/5 * * * *").unwrap());
    let mut ctx = setup_with(config);
    ctx.take_in(partly_undefined(1)).await;
    ctx.run().await;
    assert!(ctx.sched.timers.timer(&r("f")).is_none(), "cron settings arm no resource timers");

    ctx.clock.advance(Duration::from_secs(300));
    assert_eq!(ctx.sched.fire_timers(), 1);

    let task = ctx.sched.queue.task(&TaskKey::new(r("f"), TaskKind::Repair)).unwrap();
    assert!(task.reason.starts_with("Global repair triggered because of cron expression"));
    assert_eq!(ctx.sched.queue.pending_len(), 1, "blocked resources are left out");
}

#[tokio::test]
async fn reload_config_rearms_timers() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a"])).await;
    ctx.run().await;
    assert!(ctx.sched.timers.timer(&r("a")).is_none());

    let config = test_config().repair_interval(TimerSetting::from_seconds(60));
    assert!(ctx.sched.reload_config(config.clone()));
    assert_eq!(ctx.sched.timers.timer(&r("a")).unwrap().kind, TimerKind::Repair);
    assert!(!ctx.sched.reload_config(config), "unchanged settings");
}

// =============================================================================
// Status and orphans
// =============================================================================

#[tokio::test]
async fn status_report_matches_the_store() {
    let mut ctx = chain_of_three().await;
    ctx.run().await;

    let report = ctx.sched.status_report().await.unwrap();
    assert!(report.is_consistent(), "{report:?}");
    assert_eq!(report.model_version, Some(1));
    assert_eq!((report.queued, report.in_flight), (0, 0));
}

#[tokio::test]
async fn status_report_flags_divergence() {
    let mut ctx = chain_of_three().await;
    ctx.run().await;
    ctx.sched.model.mark_orphan(&r("c"));

    let report = ctx.sched.status_report().await.unwrap();
    assert!(!report.is_consistent());
    assert_eq!(
        report.discrepancies,
        vec![Discrepancy::Orphan { resource: r("c"), memory: true, persisted: false }]
    );
}

#[tokio::test]
async fn purge_forgets_orphans() {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a", "b"])).await;
    ctx.run().await;
    ctx.take_in(ModelVersion::new(2).with_resource(intent("b", "b-v2", &[]))).await;

    assert!(ctx.sched.get_resource_state(&r("a")).is_some());
    assert_eq!(ctx.sched.purge_orphans(), 1);
    assert!(ctx.sched.get_resource_state(&r("a")).is_none());
    assert!(ctx.sched.get_resource_state(&r("b")).is_some());
}
