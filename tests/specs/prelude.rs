// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared setup for the specs

pub use cv_adapters::{ExecutorError, FakeExecutor, FakeOutcome};
pub use cv_core::test_support::{chain, intent, rid};
pub use cv_core::{
    Blocked, Change, Clock, Compliance, DeployResult, EnvironmentId, FakeClock, HandlerResult,
    ModelVersion, ResourceId, ResourceIntent, ResourceState, ResourceStatus, SchedulerConfig,
    SequentialIdGen, TaskPriority, TimerSetting,
};
pub use cv_engine::{ResourceScheduler, SchedulerDeps};
pub use cv_storage::{FailPoint, MemoryStore};
pub use similar_asserts::assert_eq;
pub use std::sync::Arc;
pub use std::time::Duration;

pub type Scheduler = ResourceScheduler<MemoryStore, FakeExecutor, FakeClock, SequentialIdGen>;

/// `test::Res[agent1,name=<name>]`
pub fn res(name: &str) -> ResourceId {
    rid("agent1", name)
}

/// Timers off and room for every resource to run at once
pub fn quiet_config() -> SchedulerConfig {
    SchedulerConfig::default()
        .deploy_interval(TimerSetting::Disabled)
        .repair_interval(TimerSetting::Disabled)
        .default_agent_concurrency(16)
}

/// One environment: scheduler, store, executor and clock
pub struct World {
    pub sched: Scheduler,
    pub store: MemoryStore,
    pub executor: FakeExecutor,
    pub clock: FakeClock,
    pub ids: SequentialIdGen,
    pub env: EnvironmentId,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(quiet_config())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::over(MemoryStore::new(), config)
    }

    /// A world whose scheduler sits on top of an existing store
    pub fn over(store: MemoryStore, config: SchedulerConfig) -> Self {
        init_tracing();
        let executor = FakeExecutor::new();
        let clock = FakeClock::new();
        let ids = SequentialIdGen::new("spec");
        let env = EnvironmentId::new("spec-env");
        let sched = build(&store, &executor, &clock, &ids, &env, config);
        Self { sched, store, executor, clock, ids, env }
    }

    pub fn release(&self, model: ModelVersion) {
        self.store.release_version(&self.env, model).unwrap();
    }

    /// Release `model` and take it in
    pub async fn take_in(&mut self, model: ModelVersion) {
        self.release(model);
        self.sched.read_version().await.unwrap();
    }

    /// Run until nothing more can be dispatched
    pub async fn settle(&mut self) {
        self.sched.run_until_idle().await;
    }

    pub fn state(&self, name: &str) -> ResourceState {
        self.sched.get_resource_state(&res(name)).unwrap()
    }

    /// Replace the scheduler, keeping store, executor and clock
    pub fn restart(&mut self) {
        let config = self.sched.config().clone();
        self.sched = build(&self.store, &self.executor, &self.clock, &self.ids, &self.env, config);
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Route scheduler logs to the test output; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn build(
    store: &MemoryStore,
    executor: &FakeExecutor,
    clock: &FakeClock,
    ids: &SequentialIdGen,
    env: &EnvironmentId,
    config: SchedulerConfig,
) -> Scheduler {
    let deps = SchedulerDeps {
        persistence: Arc::new(store.clone()),
        executor: Arc::new(executor.clone()),
        clock: clock.clone(),
        ids: ids.clone(),
    };
    ResourceScheduler::new(deps, env.clone(), config)
}
