// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::SchedulerError;
use cv_adapters::FakeExecutor;
use cv_core::test_support::{chain, rid};
use cv_core::{
    Blocked, Compliance, FakeClock, ModelVersion, ResourceState, SequentialIdGen, TimerSetting,
};
use cv_storage::MemoryStore;

mod completion;
mod dispatch;
mod intake;
mod lifecycle;
mod requests;

type TestScheduler = ResourceScheduler<MemoryStore, FakeExecutor, FakeClock, SequentialIdGen>;

struct TestContext {
    sched: TestScheduler,
    store: MemoryStore,
    executor: FakeExecutor,
    clock: FakeClock,
    /// Shared with every scheduler built for this context, so action ids
    /// stay unique across restarts
    ids: SequentialIdGen,
    env: EnvironmentId,
}

/// Timers off, no agent concurrency limit worth hitting
fn test_config() -> SchedulerConfig {
    SchedulerConfig::default()
        .deploy_interval(TimerSetting::Disabled)
        .repair_interval(TimerSetting::Disabled)
        .default_agent_concurrency(10)
}

fn setup() -> TestContext {
    setup_with(test_config())
}

fn setup_with(config: SchedulerConfig) -> TestContext {
    init_tracing();
    let store = MemoryStore::new();
    let executor = FakeExecutor::new();
    let clock = FakeClock::new();
    let ids = SequentialIdGen::new("action");
    let env = EnvironmentId::new("test-env");
    let deps = SchedulerDeps {
        persistence: Arc::new(store.clone()),
        executor: Arc::new(executor.clone()),
        clock: clock.clone(),
        ids: ids.clone(),
    };
    let sched = ResourceScheduler::new(deps, env.clone(), config);
    TestContext { sched, store, executor, clock, ids, env }
}

/// Route scheduler logs to the test output; `RUST_LOG` picks the level
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn r(name: &str) -> ResourceId {
    rid("agent1", name)
}

impl TestContext {
    fn release(&self, model: ModelVersion) {
        self.store.release_version(&self.env, model).unwrap();
    }

    /// Release `model` and let the scheduler pick it up
    async fn take_in(&mut self, model: ModelVersion) {
        self.release(model);
        assert!(self.sched.read_version().await.unwrap());
    }

    /// Replace the scheduler with a fresh one over the same store, as
    /// after a process restart
    fn restart(&mut self) {
        let config = self.sched.config.clone();
        let deps = SchedulerDeps {
            persistence: Arc::new(self.store.clone()),
            executor: Arc::new(self.executor.clone()),
            clock: self.clock.clone(),
            ids: self.ids.clone(),
        };
        self.sched = ResourceScheduler::new(deps, self.env.clone(), config);
    }

    async fn run(&mut self) {
        self.sched.run_until_idle().await;
    }

    fn state(&self, name: &str) -> ResourceState {
        self.sched.model.state(&r(name)).cloned().unwrap()
    }

    fn compliance(&self, name: &str) -> Compliance {
        self.state(name).compliance
    }

    /// Queued or in flight
    fn scheduled(&self, name: &str) -> bool {
        self.sched.queue.is_scheduled(&r(name))
    }
}

/// `a <- b <- c`, all fresh at version 1
async fn chain_of_three() -> TestContext {
    let mut ctx = setup();
    ctx.take_in(chain(1, &["a", "b", "c"])).await;
    ctx
}

/// Resource `name` that emits events to its dependents
fn sender(name: &str, hash: &str) -> ResourceIntent {
    ResourceIntent::builder().id(r(name)).attribute_hash(hash).send_event(true).build()
}
