// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch: start ready tasks on spawned futures

use super::ResourceScheduler;
use chrono::{DateTime, Utc};
use cv_adapters::{DeployRequest, DryRunRequest, Executor, ExecutorError, FactRequest};
use cv_core::{
    ActionId, Blocked, Clock, DeployReport, DryRunId, DryrunReport, FactReport, IdGen,
    ResourceVersionId, Task, TaskKey, TaskKind, TaskPriority,
};
use cv_storage::{PersistenceError, StatePersistence};
use std::future::Future;
use std::sync::Arc;

/// Context of one dispatched deploy or repair
#[derive(Debug, Clone)]
pub(crate) struct DeployJob {
    pub key: TaskKey,
    pub priority: TaskPriority,
    pub action_id: ActionId,
    pub rvid: ResourceVersionId,
    pub attribute_hash: String,
    pub started: DateTime<Utc>,
}

/// What a spawned task reports back to the scheduler
#[derive(Debug)]
pub(crate) enum Completion {
    Deploy { job: DeployJob, finished: DateTime<Utc>, result: Result<DeployReport, ExecutorError> },
    /// The start could not be recorded, so the executor was never called
    NotStarted { key: TaskKey, error: PersistenceError },
    DryRun {
        key: TaskKey,
        dryrun_id: DryRunId,
        rvid: ResourceVersionId,
        started: DateTime<Utc>,
        result: Result<DryrunReport, ExecutorError>,
    },
    Facts { key: TaskKey, result: Result<FactReport, ExecutorError> },
}

/// Why a queued task can not start yet
enum Hold {
    /// Keep it queued
    Wait,
    /// It can never run: drop it
    Drop(&'static str),
}

impl<P, E, C, G> ResourceScheduler<P, E, C, G>
where
    P: StatePersistence,
    E: Executor,
    C: Clock,
    G: IdGen,
{
    /// Start every queued task that may run now, in priority order.
    /// Returns how many were started.
    pub fn dispatch_ready(&mut self) -> usize {
        if self.shutting_down {
            return 0;
        }
        self.flush_events();

        let mut started = 0;
        for task in self.queue.ordered() {
            match self.hold(&task) {
                Some(Hold::Wait) => continue,
                Some(Hold::Drop(why)) => {
                    tracing::debug!(task = %task.key, why, "dropping queued task");
                    self.queue.remove(&task.key);
                    self.dryruns.remove(&task.key);
                    continue;
                }
                None => {}
            }
            if !self.queue.can_start(&task, &self.config) {
                continue;
            }
            match task.key.kind.clone() {
                TaskKind::Deploy | TaskKind::Repair => self.spawn_deploy(task),
                TaskKind::DryRun(dryrun_id) => self.spawn_dry_run(task, dryrun_id),
                TaskKind::GetFact => self.spawn_facts(task),
            }
            started += 1;
        }
        started
    }

    fn hold(&self, task: &Task) -> Option<Hold> {
        let resource = task.resource();
        if self.halted || self.paused_agents.contains(resource.agent_name()) {
            return Some(Hold::Wait);
        }
        if let TaskKind::DryRun(_) = task.key.kind {
            return (!self.dryruns.contains_key(&task.key)).then_some(Hold::Drop("no intent"));
        }
        let Some(state) = self.model.state(resource) else {
            return Some(Hold::Drop("resource is not tracked"));
        };
        if !task.key.kind.applies_intent() {
            return None;
        }
        if state.blocked == Blocked::Blocked {
            return Some(Hold::Drop("resource is blocked"));
        }
        let waiting = self
            .model
            .graph()
            .requires_of(resource)
            .iter()
            .any(|req| self.queue.is_scheduled(req));
        waiting.then_some(Hold::Wait)
    }

    /// Run `task` on its own tokio task so a panic can not take the
    /// scheduler down. `lost` builds the report for a task that panicked
    /// or was aborted.
    fn spawn_guarded<F, L>(&mut self, task: F, lost: L)
    where
        F: Future<Output = Completion> + Send + 'static,
        L: FnOnce(ExecutorError) -> Completion + Send + 'static,
    {
        let inner = tokio::spawn(task);
        self.executing.retain(|h| !h.is_finished());
        self.executing.push(inner.abort_handle());
        self.running.spawn(async move {
            match inner.await {
                Ok(done) => done,
                Err(e) if e.is_cancelled() => lost(ExecutorError::Cancelled),
                Err(e) => {
                    tracing::error!(error = %e, "scheduler task panicked");
                    lost(ExecutorError::Failed(e.to_string()))
                }
            }
        });
    }

    /// Abort every executor future still running. Their completions
    /// still arrive through `running`, as cancelled.
    pub(super) fn abort_executing(&mut self) -> usize {
        let mut aborted = 0;
        for handle in self.executing.drain(..) {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        aborted
    }

    fn spawn_deploy(&mut self, task: Task) {
        let resource = task.resource().clone();
        let (Some(intent), Some(version)) =
            (self.model.intent(&resource).cloned(), self.model.version())
        else {
            self.queue.remove(&task.key);
            return;
        };
        self.queue.mark_started(&task.key, Some(intent.attribute_hash.clone()));

        let job = DeployJob {
            key: task.key.clone(),
            priority: task.priority,
            action_id: ActionId::new(self.ids.next()),
            rvid: resource.with_version(version),
            attribute_hash: intent.attribute_hash.clone(),
            started: self.clock.utc_now(),
        };
        tracing::info!(
            %resource,
            action_id = %job.action_id,
            kind = %task.key.kind,
            priority = %task.priority,
            reason = %task.reason,
            "dispatching deploy"
        );

        let env = self.env.clone();
        let persistence = Arc::clone(&self.persistence);
        let executor = Arc::clone(&self.executor);
        let clock = self.clock.clone();
        let cancel = self.cancel.child_token();
        let lost_job = job.clone();
        let lost_clock = self.clock.clone();
        self.spawn_guarded(
            async move {
                let requires = match persistence
                    .send_in_progress(&env, &job.action_id, &job.rvid, job.started)
                    .await
                {
                    Ok(requires) => requires,
                    Err(error) => return Completion::NotStarted { key: job.key, error },
                };
                let request = DeployRequest {
                    action_id: job.action_id.clone(),
                    rvid: job.rvid.clone(),
                    intent,
                    requires,
                    repair: job.key.kind == TaskKind::Repair,
                    reason: task.reason,
                };
                let result = executor.deploy(request, cancel).await;
                Completion::Deploy { job, finished: clock.utc_now(), result }
            },
            move |error| Completion::Deploy {
                job: lost_job,
                finished: lost_clock.utc_now(),
                result: Err(error),
            },
        );
    }

    fn spawn_dry_run(&mut self, task: Task, dryrun_id: DryRunId) {
        let Some((rvid, intent)) = self.dryruns.remove(&task.key) else {
            self.queue.remove(&task.key);
            return;
        };
        self.queue.mark_started(&task.key, None);
        tracing::debug!(%rvid, %dryrun_id, "dispatching dry run");

        let executor = Arc::clone(&self.executor);
        let cancel = self.cancel.child_token();
        let started = self.clock.utc_now();
        let key = task.key.clone();
        let (lost_id, lost_rvid) = (dryrun_id.clone(), rvid.clone());
        self.spawn_guarded(
            async move {
                let request =
                    DryRunRequest { dryrun_id: dryrun_id.clone(), rvid: rvid.clone(), intent };
                let result = executor.dry_run(request, cancel).await;
                Completion::DryRun { key, dryrun_id, rvid, started, result }
            },
            move |error| Completion::DryRun {
                key: task.key,
                dryrun_id: lost_id,
                rvid: lost_rvid,
                started,
                result: Err(error),
            },
        );
    }

    fn spawn_facts(&mut self, task: Task) {
        let resource = task.resource().clone();
        let Some(intent) = self.model.intent(&resource).cloned() else {
            self.queue.remove(&task.key);
            return;
        };
        self.queue.mark_started(&task.key, None);
        tracing::debug!(%resource, "dispatching fact refresh");

        let executor = Arc::clone(&self.executor);
        let cancel = self.cancel.child_token();
        let key = task.key.clone();
        self.spawn_guarded(
            async move {
                let request = FactRequest { resource_id: resource, intent };
                let result = executor.get_facts(request, cancel).await;
                Completion::Facts { key, result }
            },
            move |error| Completion::Facts {
                key: task.key,
                result: Err(error),
            },
        );
    }
}
