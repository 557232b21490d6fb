// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Requests from the surrounding system, plus timer firing

use super::ResourceScheduler;
use crate::error::SchedulerError;
use crate::graph::DependencyGraph;
use crate::model::ResourceModel;
use crate::status::{self, StatusReport};
use crate::timers::{TimerFire, TimerKind};
use crate::work::Enqueued;
use cv_adapters::Executor;
use cv_core::{
    Blocked, Clock, DryRunId, DryrunReport, IdGen, ResourceId, ResourceState, SchedulerConfig,
    Task, TaskKey, TaskKind, TaskPriority,
};
use cv_storage::StatePersistence;

impl<P, E, C, G> ResourceScheduler<P, E, C, G>
where
    P: StatePersistence,
    E: Executor,
    C: Clock,
    G: IdGen,
{
    /// Deploy every dirty, unblocked resource, optionally of one agent only.
    /// Returns how many tasks were queued or promoted.
    pub fn deploy(&mut self, reason: &str, priority: TaskPriority, agent: Option<&str>) -> usize {
        let targets = self.targets(agent, |model, rid| model.is_dirty(rid));
        tracing::info!(reason, %priority, agent, targets = targets.len(), "deploy requested");
        let mut queued = 0;
        for rid in targets {
            let task = Task::new(TaskKey::deploy(rid), priority, reason);
            if self.enqueue(task, true) != Enqueued::Duplicate {
                queued += 1;
            }
        }
        queued
    }

    /// Repair every resource that is not hard blocked, optionally of one
    /// agent only
    pub fn repair(&mut self, reason: &str, priority: TaskPriority, agent: Option<&str>) -> usize {
        let targets = self.targets(agent, |model, rid| {
            model.state(rid).is_some_and(|s| s.blocked != Blocked::Blocked)
        });
        tracing::info!(reason, %priority, agent, targets = targets.len(), "repair requested");
        let mut queued = 0;
        for rid in targets {
            let task = Task::new(TaskKey::new(rid, TaskKind::Repair), priority, reason);
            if self.enqueue(task, false) != Enqueued::Duplicate {
                queued += 1;
            }
        }
        queued
    }

    fn targets(
        &self,
        agent: Option<&str>,
        wanted: impl Fn(&ResourceModel, &ResourceId) -> bool,
    ) -> Vec<ResourceId> {
        self.model
            .resources()
            .map(|(rid, _)| rid)
            .filter(|rid| agent.is_none_or(|a| rid.agent_name() == a))
            .filter(|rid| wanted(&self.model, rid))
            .cloned()
            .collect()
    }

    /// Deploy one resource now, whatever its compliance. Its timer is
    /// cancelled and re-derived once the deploy finishes.
    pub fn deploy_resource(
        &mut self,
        resource: &ResourceId,
        reason: &str,
        priority: TaskPriority,
    ) -> Result<Enqueued, SchedulerError> {
        let state = self
            .model
            .state(resource)
            .ok_or_else(|| SchedulerError::UnknownResource(resource.clone()))?;
        if state.blocked == Blocked::Blocked {
            return Err(SchedulerError::InvalidTransition {
                resource: resource.clone(),
                reason: "resource is blocked".to_string(),
            });
        }
        if self.shutting_down {
            return Err(SchedulerError::ShutDown);
        }
        self.timers.cancel_timer(resource);
        Ok(self.enqueue(Task::new(TaskKey::deploy(resource.clone()), priority, reason), true))
    }

    /// Queue a dry run of every resource in `version`. Resources the
    /// version leaves undeployable get a failed report right away and are
    /// never dispatched. Returns how many dry runs were queued.
    pub async fn dry_run(
        &mut self,
        dryrun_id: DryRunId,
        version: u64,
    ) -> Result<usize, SchedulerError> {
        if self.shutting_down {
            return Err(SchedulerError::ShutDown);
        }
        let model = self
            .persistence
            .get_version(&self.env, version)
            .await?
            .ok_or(SchedulerError::UnknownVersion(version))?;
        let blocked = DependencyGraph::from_version(&model).closure(model.undefined.iter());

        let mut queued = 0;
        let mut paused = 0;
        for (rid, intent) in model.resources {
            if self.paused_agents.contains(rid.agent_name()) {
                paused += 1;
                continue;
            }
            let rvid = rid.with_version(version);
            if blocked.contains(&rid) {
                let report =
                    DryrunReport::undeployable(dryrun_id.clone(), rvid, self.clock.utc_now());
                self.persistence.dryrun_update(&self.env, report).await?;
                continue;
            }
            let key = TaskKey::new(rid, TaskKind::DryRun(dryrun_id.clone()));
            self.dryruns.insert(key.clone(), (rvid, intent));
            let reason = format!("Dry run {dryrun_id} of version {version}");
            let task = Task::new(key, TaskPriority::DryRun, reason);
            if self.enqueue(task, false) == Enqueued::Queued {
                queued += 1;
            }
        }
        tracing::info!(
            %dryrun_id,
            version,
            queued,
            paused,
            blocked = blocked.len(),
            "dry run requested"
        );
        Ok(queued)
    }

    /// Hold back every task of `agent` until it is resumed. Running tasks
    /// finish normally. Returns false when it was already paused.
    pub async fn pause_agent(&mut self, agent: &str) -> Result<bool, SchedulerError> {
        if self.paused_agents.contains(agent) {
            return Ok(false);
        }
        self.persistence.set_agent_paused(&self.env, agent, true).await?;
        self.paused_agents.insert(agent.to_string());
        tracing::info!(agent, "agent paused");
        Ok(true)
    }

    /// Let a paused agent's queued tasks dispatch again
    pub async fn resume_agent(&mut self, agent: &str) -> Result<bool, SchedulerError> {
        if !self.paused_agents.contains(agent) {
            return Ok(false);
        }
        self.persistence.set_agent_paused(&self.env, agent, false).await?;
        self.paused_agents.remove(agent);
        tracing::info!(agent, queued = self.queue.pending_len(), "agent resumed");
        Ok(true)
    }

    /// Stop dispatching for the whole environment. Work keeps being queued.
    pub async fn halt(&mut self) -> Result<bool, SchedulerError> {
        if self.halted {
            return Ok(false);
        }
        self.persistence.set_halted(&self.env, true).await?;
        self.halted = true;
        tracing::info!(env = %self.env, in_flight = self.running.len(), "environment halted");
        Ok(true)
    }

    pub async fn resume(&mut self) -> Result<bool, SchedulerError> {
        if !self.halted {
            return Ok(false);
        }
        self.persistence.set_halted(&self.env, false).await?;
        self.halted = false;
        tracing::info!(env = %self.env, queued = self.queue.pending_len(), "environment resumed");
        Ok(true)
    }

    /// Reload the halt and pause flags, which storage owns
    pub async fn refresh_run_state(&mut self) -> Result<(), SchedulerError> {
        let state = self.persistence.run_state(&self.env).await?;
        if state.halted != self.halted || state.paused_agents != self.paused_agents {
            tracing::info!(
                halted = state.halted,
                paused = ?state.paused_agents,
                "run state refreshed"
            );
        }
        self.halted = state.halted;
        self.paused_agents = state.paused_agents;
        Ok(())
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_agent_paused(&self, agent: &str) -> bool {
        self.paused_agents.contains(agent)
    }

    /// Refresh the facts of one tracked resource
    pub fn get_facts(&mut self, resource: &ResourceId) -> Result<Enqueued, SchedulerError> {
        if !self.model.contains(resource) {
            return Err(SchedulerError::UnknownResource(resource.clone()));
        }
        let reason = format!("Refreshing facts of {resource}");
        let key = TaskKey::new(resource.clone(), TaskKind::GetFact);
        Ok(self.enqueue(Task::new(key, TaskPriority::FactRefresh, reason), false))
    }

    /// Re-derive the timer of every tracked resource
    pub fn reload_all_timers(&mut self) {
        for (rid, state) in self.model.resources() {
            self.timers.update_timer(rid, state);
        }
        tracing::debug!(timers = self.timers.len(), "reloaded all timers");
    }

    /// Swap in new settings. Returns whether the timer settings changed,
    /// in which case every timer was re-derived.
    pub fn reload_config(&mut self, config: SchedulerConfig) -> bool {
        let changed = self.timers.reload_config(&config);
        self.config = config;
        if changed {
            self.reload_all_timers();
        }
        changed
    }

    /// Snapshot of a tracked or orphaned resource's state
    pub fn get_resource_state(&self, resource: &ResourceId) -> Option<ResourceState> {
        self.model.snapshot(resource)
    }

    pub async fn status_report(&self) -> Result<StatusReport, SchedulerError> {
        let records = self.persistence.load_resources(&self.env).await?;
        let persisted_version = self.persistence.last_processed_version(&self.env).await?;
        let discrepancies = status::compare(&self.model, &records);
        if !discrepancies.is_empty() {
            tracing::warn!(count = discrepancies.len(), "state differs from persisted records");
        }
        Ok(StatusReport {
            model_version: self.model.version(),
            persisted_version,
            discrepancies,
            queued: self.queue.pending_len(),
            in_flight: self.queue.in_flight_len(),
            timers: self.timers.len(),
        })
    }

    /// Forget every orphaned resource
    pub fn purge_orphans(&mut self) -> usize {
        let purged = self.model.purge_orphans();
        tracing::info!(purged, "purged orphans");
        purged
    }

    /// Turn every due timer into work. Returns how many timers fired.
    pub fn fire_timers(&mut self) -> usize {
        let fired = self.timers.fired_timers();
        let count = fired.len();
        for fire in fired {
            let priority = fire.priority();
            match fire {
                TimerFire::Resource { resource, kind, reason } => {
                    let Some(state) = self.model.state(&resource) else {
                        continue;
                    };
                    if state.blocked == Blocked::Blocked {
                        continue;
                    }
                    let task_kind = match kind {
                        TimerKind::Deploy => TaskKind::Deploy,
                        TimerKind::Repair => TaskKind::Repair,
                    };
                    let dedup = task_kind == TaskKind::Deploy;
                    let task = Task::new(TaskKey::new(resource, task_kind), priority, reason);
                    self.enqueue(task, dedup);
                }
                TimerFire::Global { kind: TimerKind::Deploy, reason } => {
                    self.deploy(&reason, priority, None);
                }
                TimerFire::Global { kind: TimerKind::Repair, reason } => {
                    self.repair(&reason, priority, None);
                }
            }
        }
        count
    }

    /// Dispatch and complete work until nothing is left that can run
    pub async fn run_until_idle(&mut self) {
        loop {
            self.dispatch_ready();
            let Some(joined) = self.running.join_next().await else {
                break;
            };
            self.on_joined(joined).await;
        }
    }
}
