// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup recovery and released-version intake

use super::ResourceScheduler;
use crate::error::SchedulerError;
use crate::intake::{plan_intake, IntakePlan};
use crate::model::ResourceModel;
use cv_adapters::Executor;
use cv_core::{Blocked, Clock, IdGen, ModelVersion, Task, TaskKey, TaskPriority};
use cv_storage::{PersistenceError, StatePersistence, StateTransaction};

impl<P, E, C, G> ResourceScheduler<P, E, C, G>
where
    P: StatePersistence,
    E: Executor,
    C: Clock,
    G: IdGen,
{
    /// Rebuild the model from persisted records, re-arm timers, queue
    /// every dirty resource and catch up on versions released meanwhile.
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        let records = self.persistence.load_resources(&self.env).await?;
        let version = self.persistence.last_processed_version(&self.env).await?;
        self.model = ResourceModel::from_records(version, records);
        self.refresh_run_state().await?;
        tracing::info!(
            env = %self.env,
            version = ?version,
            resources = self.model.len(),
            halted = self.halted,
            paused = self.paused_agents.len(),
            "restored scheduler state"
        );

        self.reload_all_timers();
        let dirty: Vec<_> = self
            .model
            .resources()
            .map(|(rid, _)| rid.clone())
            .filter(|rid| self.model.is_dirty(rid))
            .collect();
        for rid in dirty {
            let reason = format!("Deploying {rid} because it was dirty at startup");
            let task = Task::new(TaskKey::deploy(rid), TaskPriority::NewVersionDeploy, reason);
            self.enqueue(task, true);
        }

        self.read_version().await?;
        Ok(())
    }

    /// Take in every version released since the last processed one,
    /// reconciling straight to the newest. Returns whether anything was
    /// taken in.
    pub async fn read_version(&mut self) -> Result<bool, SchedulerError> {
        let after = self.model.version().unwrap_or_default();
        let mut released = self.persistence.released_versions_since(&self.env, after).await?;
        let Some(newest) = released.pop() else {
            return Ok(false);
        };
        self.take_in(&newest, &released, true).await
    }

    /// Take in one released version, identified by number. Versions
    /// released between the current one and it are caught up on.
    pub async fn new_version(&mut self, version: u64) -> Result<bool, SchedulerError> {
        let after = self.model.version().unwrap_or_default();
        if self.model.version().is_some() && version <= after {
            tracing::debug!(version, "version already processed");
            return Ok(false);
        }
        let mut released = self.persistence.released_versions_since(&self.env, after).await?;
        let Some(pos) = released.iter().position(|v| v.version == version) else {
            return Err(SchedulerError::UnknownVersion(version));
        };
        let is_newest = pos + 1 == released.len();
        released.truncate(pos + 1);
        let Some(target) = released.pop() else {
            return Err(SchedulerError::UnknownVersion(version));
        };
        self.take_in(&target, &released, is_newest).await
    }

    /// Persist a planned intake, then apply it in memory.
    ///
    /// A version at or below the current one is a no-op. When persisting
    /// fails the model is left untouched and the version is retried on the
    /// next trigger. Dropped resources are only orphaned outright when no
    /// later version is released; otherwise the reference check decides.
    async fn take_in(
        &mut self,
        newest: &ModelVersion,
        intermediates: &[ModelVersion],
        is_newest: bool,
    ) -> Result<bool, SchedulerError> {
        if self.model.version().is_some_and(|current| newest.version <= current) {
            tracing::debug!(version = newest.version, "version already processed");
            return Ok(false);
        }
        let plan = plan_intake(&self.model, newest, intermediates)?;
        if let Err(e) = self.persist_plan(&plan, is_newest).await {
            tracing::error!(
                version = plan.version,
                error = %e,
                "version intake failed, will retry"
            );
            return Err(e.into());
        }

        let IntakePlan { version, model, deleted, changed, blocks, .. } = plan;
        self.model = model;

        for rid in deleted.iter().chain(blocks.newly_blocked.iter()) {
            self.timers.cancel_timer(rid);
            self.queue.drop_deploys(rid);
        }
        for rid in changed.iter().chain(blocks.unblocked.iter()) {
            let Some(state) = self.model.state(rid).cloned() else {
                continue;
            };
            if state.blocked == Blocked::Blocked {
                self.timers.cancel_timer(rid);
                self.queue.drop_deploys(rid);
                continue;
            }
            self.timers.update_timer(rid, &state);
            if self.model.is_dirty(rid) {
                let reason = format!("Deploying because a new version {version} was released");
                let task =
                    Task::new(TaskKey::deploy(rid.clone()), TaskPriority::NewVersionDeploy, reason);
                self.enqueue(task, true);
            }
        }
        tracing::info!(
            env = %self.env,
            version,
            queued = self.queue.pending_len(),
            "took in model version"
        );
        Ok(true)
    }

    async fn persist_plan(
        &self,
        plan: &IntakePlan,
        is_newest: bool,
    ) -> Result<(), PersistenceError> {
        let mut txn = self.persistence.get_connection().await?;
        txn.update_resource_intent(&self.env, plan.version, plan.updates.clone(), true).await?;
        if is_newest && !plan.deleted.is_empty() {
            txn.mark_as_orphan(&self.env, &plan.deleted).await?;
        }
        txn.mark_all_orphans(&self.env, plan.version).await?;
        txn.set_last_processed_model_version(&self.env, plan.version).await?;
        txn.commit().await
    }
}
