// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The resource scheduler: one control flow owning the model, the work
//! queue and the timers.
//!
//! Executor and persistence calls for deploys run on spawned tasks and
//! report back as [`Completion`]s. Every state mutation happens on the
//! scheduler's own task, between awaits.

mod completion;
mod dispatch;
mod handle;
mod intake;
mod requests;

pub use handle::{Command, SchedulerHandle};

pub(crate) use dispatch::Completion;

use crate::model::ResourceModel;
use crate::timers::TimerManager;
use crate::work::WorkQueue;
use cv_adapters::Executor;
use cv_core::{
    Clock, EnvironmentId, IdGen, ResourceId, ResourceIntent, ResourceVersionId, SchedulerConfig,
    TaskKey, TaskPriority,
};
use cv_storage::StatePersistence;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Collaborators the scheduler is built from
pub struct SchedulerDeps<P, E, C, G> {
    pub persistence: Arc<P>,
    pub executor: Arc<E>,
    pub clock: C,
    pub ids: G,
}

/// Event wave bookkeeping: who notified a dependent, and how urgently
#[derive(Debug, Clone)]
struct PendingEvent {
    priority: TaskPriority,
    sender: ResourceId,
}

pub struct ResourceScheduler<P, E, C: Clock, G> {
    env: EnvironmentId,
    config: SchedulerConfig,
    persistence: Arc<P>,
    executor: Arc<E>,
    clock: C,
    ids: G,
    model: ResourceModel,
    queue: WorkQueue,
    timers: TimerManager<C>,
    running: JoinSet<Completion>,
    /// The spawned executor futures behind `running`, aborted at shutdown
    executing: Vec<AbortHandle>,
    /// Agents whose tasks stay queued until resumed
    paused_agents: BTreeSet<String>,
    /// Nothing is dispatched while the environment is halted
    halted: bool,
    /// Intents of queued dry runs, which may belong to any version
    dryruns: HashMap<TaskKey, (ResourceVersionId, ResourceIntent)>,
    /// Dependents notified in the current event wave
    pending_events: BTreeMap<ResourceId, PendingEvent>,
    cancel: CancellationToken,
    shutting_down: bool,
}

impl<P, E, C, G> ResourceScheduler<P, E, C, G>
where
    P: StatePersistence,
    E: Executor,
    C: Clock,
    G: IdGen,
{
    pub fn new(
        deps: SchedulerDeps<P, E, C, G>,
        env: EnvironmentId,
        config: SchedulerConfig,
    ) -> Self {
        let timers = TimerManager::new(deps.clock.clone(), &config);
        Self {
            env,
            config,
            persistence: deps.persistence,
            executor: deps.executor,
            clock: deps.clock,
            ids: deps.ids,
            model: ResourceModel::new(),
            queue: WorkQueue::new(),
            timers,
            running: JoinSet::new(),
            executing: Vec::new(),
            paused_agents: BTreeSet::new(),
            halted: false,
            dryruns: HashMap::new(),
            pending_events: BTreeMap::new(),
            cancel: CancellationToken::new(),
            shutting_down: false,
        }
    }

    pub fn env(&self) -> &EnvironmentId {
        &self.env
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Read-only view of the tracked resources
    pub fn model(&self) -> &ResourceModel {
        &self.model
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn timers(&self) -> &TimerManager<C> {
        &self.timers
    }

    /// Model version the scheduler has taken in
    pub fn version(&self) -> Option<u64> {
        self.model.version()
    }

    /// Nothing queued and nothing running
    pub fn is_idle(&self) -> bool {
        self.queue.is_idle() && self.running.is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }
}

#[cfg(test)]
#[path = "../scheduler_tests/mod.rs"]
mod tests;
