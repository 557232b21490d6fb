// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use async_trait::async_trait;
use cv_adapters::{DeployRequest, DryRunRequest, Executor, ExecutorError, FactRequest};
use cv_core::{DeployReport, DeployResult, DryrunReport, FactReport, HandlerResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_compliance(handle: &SchedulerHandle, resource: ResourceId) {
    for _ in 0..200 {
        let state = handle.get_resource_state(resource.clone()).await.unwrap();
        if state.is_some_and(|s| s.compliance == Compliance::Compliant) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{resource} never became compliant");
}

// =============================================================================
// Running on its own task
// =============================================================================

#[tokio::test(start_paused = true)]
async fn handle_drives_a_version_to_compliance() {
    let ctx = setup();
    ctx.release(chain(1, &["a", "b"]));
    let (handle, task) = ctx.sched.spawn();

    assert!(handle.new_version(1).await.unwrap());
    wait_for_compliance(&handle, r("b")).await;
    let a = handle.get_resource_state(r("a")).await.unwrap().unwrap();
    assert_eq!(a.compliance, Compliance::Compliant);

    let report = handle.status_report().await.unwrap();
    assert!(report.is_consistent(), "{report:?}");

    handle.shutdown();
    task.await.unwrap();
    assert!(handle.is_closed());
    let err = handle.deploy("late", TaskPriority::UserDeploy, None).await.unwrap_err();
    assert!(matches!(err, SchedulerError::ShutDown));
}

#[tokio::test(start_paused = true)]
async fn handle_forwards_requests() {
    let ctx = setup();
    ctx.release(chain(1, &["a"]));
    let (handle, task) = ctx.sched.spawn();

    assert!(handle.read_version().await.unwrap());
    wait_for_compliance(&handle, r("a")).await;
    assert_eq!(handle.repair("repair", TaskPriority::UserRepair, None).await.unwrap(), 1);
    wait_for("the repair", || ctx.executor.calls().iter().any(|c| c.repair)).await;

    let err = handle.deploy_resource(r("zz"), "manual", TaskPriority::UserDeploy).await;
    assert!(matches!(err, Err(SchedulerError::UnknownResource(_))));
    assert_eq!(handle.purge_orphans().await.unwrap(), 0);
    handle.reload_all_timers().await.unwrap();

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_stops_the_scheduler() {
    let ctx = setup();
    let (handle, task) = ctx.sched.spawn();
    drop(handle);
    task.await.unwrap();
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_work_that_outlives_the_grace_period() {
    let ctx = setup_with(test_config().shutdown_grace_ms(50));
    ctx.release(chain(1, &["a", "b"]));
    ctx.executor.hold();
    let (handle, task) = ctx.sched.spawn();

    handle.new_version(1).await.unwrap();
    wait_for("a to start", || ctx.executor.in_flight() == 1).await;
    handle.shutdown();
    task.await.unwrap();

    let actions = ctx.store.actions_for(&ctx.env, &r("a"));
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].status, HandlerResult::Cancelled);
    let record = ctx.store.record(&ctx.env, &r("a")).unwrap();
    assert_eq!(record.state.last_deploy_result, DeployResult::Failed);
    assert_eq!(ctx.executor.deploys_of(&r("b")), 0, "queued work is dropped");
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_in_flight_work_finish_within_grace() {
    let mut ctx = setup_with(test_config().shutdown_grace_ms(5_000));
    ctx.take_in(chain(1, &["a"])).await;
    ctx.executor.hold();
    assert_eq!(ctx.sched.dispatch_ready(), 1);

    let executor = ctx.executor.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        executor.open();
    });
    ctx.sched.shutdown().await;

    assert!(ctx.sched.is_shutting_down());
    assert_eq!(ctx.compliance("a"), Compliance::Compliant);
    assert!(ctx.sched.is_idle());
    assert_eq!(ctx.sched.deploy("late", TaskPriority::UserDeploy, None), 0);
    assert_eq!(ctx.sched.dispatch_ready(), 0);
}

/// Deploys take ten seconds and ignore cancellation
#[derive(Clone, Default)]
struct StubbornExecutor {
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl Executor for StubbornExecutor {
    async fn deploy(
        &self,
        request: DeployRequest,
        _cancel: CancellationToken,
    ) -> Result<DeployReport, ExecutorError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(DeployReport::new(request.action_id, request.rvid, HandlerResult::Deployed))
    }

    async fn dry_run(
        &self,
        request: DryRunRequest,
        _cancel: CancellationToken,
    ) -> Result<DryrunReport, ExecutorError> {
        Ok(DryrunReport::undeployable(request.dryrun_id, request.rvid, chrono::Utc::now()))
    }

    async fn get_facts(
        &self,
        _request: FactRequest,
        _cancel: CancellationToken,
    ) -> Result<FactReport, ExecutorError> {
        Err(ExecutorError::Failed("no facts".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_an_executor_that_ignores_cancellation() {
    let store = MemoryStore::new();
    let env = EnvironmentId::new("test-env");
    store.release_version(&env, chain(1, &["a"])).unwrap();
    let executor = StubbornExecutor::default();
    let deps = SchedulerDeps {
        persistence: Arc::new(store.clone()),
        executor: Arc::new(executor.clone()),
        clock: FakeClock::new(),
        ids: SequentialIdGen::new("action"),
    };
    let mut sched =
        ResourceScheduler::new(deps, env.clone(), test_config().shutdown_grace_ms(50));
    sched.read_version().await.unwrap();
    assert_eq!(sched.dispatch_ready(), 1);
    tokio::time::sleep(Duration::from_millis(10)).await;

    sched.shutdown().await;
    assert!(sched.is_idle());
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert!(!executor.finished.load(Ordering::SeqCst), "executor kept running");
    let actions = store.actions_for(&env, &r("a"));
    assert_eq!(actions[0].status, HandlerResult::Cancelled);
    let state = sched.get_resource_state(&r("a")).unwrap();
    assert_eq!(state.last_deploy_result, DeployResult::Failed);
}

// =============================================================================
// Panicking executors
// =============================================================================

struct PanickingExecutor;

#[async_trait]
impl Executor for PanickingExecutor {
    async fn deploy(
        &self,
        _request: DeployRequest,
        _cancel: CancellationToken,
    ) -> Result<DeployReport, ExecutorError> {
        panic!("handler exploded")
    }

    async fn dry_run(
        &self,
        _request: DryRunRequest,
        _cancel: CancellationToken,
    ) -> Result<DryrunReport, ExecutorError> {
        panic!("handler exploded")
    }

    async fn get_facts(
        &self,
        _request: FactRequest,
        _cancel: CancellationToken,
    ) -> Result<FactReport, ExecutorError> {
        panic!("handler exploded")
    }
}

#[tokio::test]
async fn panicking_executor_fails_the_deploy() {
    let store = MemoryStore::new();
    let env = EnvironmentId::new("test-env");
    store.release_version(&env, chain(1, &["a"])).unwrap();
    let deps = SchedulerDeps {
        persistence: Arc::new(store.clone()),
        executor: Arc::new(PanickingExecutor),
        clock: FakeClock::new(),
        ids: SequentialIdGen::new("action"),
    };
    let mut sched = ResourceScheduler::new(deps, env.clone(), test_config());

    sched.read_version().await.unwrap();
    sched.run_until_idle().await;

    let state = sched.get_resource_state(&r("a")).unwrap();
    assert_eq!(state.compliance, Compliance::NonCompliant);
    assert_eq!(state.last_deploy_result, DeployResult::Failed);
    assert_eq!(store.actions_for(&env, &r("a"))[0].status, HandlerResult::Failed);
    assert!(sched.is_idle());
}
