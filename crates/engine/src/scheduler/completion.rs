// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Completion handling: fold finished tasks back into the model.
//!
//! Executor and persistence failures end here as resource outcomes. None of
//! them escape the scheduler.

use super::dispatch::{Completion, DeployJob};
use super::{PendingEvent, ResourceScheduler};
use crate::error::SchedulerError;
use crate::model::{BlockChanges, DeployOutcome, DeployTransition};
use crate::work::Enqueued;
use chrono::{DateTime, Utc};
use cv_adapters::{Executor, ExecutorError};
use cv_core::{
    Blocked, Change, Clock, Compliance, DeployReport, DeployResult, DryRunId, DryrunReport,
    FactReport, HandlerResult, IdGen, LogLevel, LogLine, ResourceId, ResourceState,
    ResourceVersionId, Task, TaskKey, TaskKind, TaskPriority,
};
use cv_storage::{DeployDone, IntentUpdates, PersistenceError, StatePersistence, StateTransaction};
use tokio::task::JoinError;

impl<P, E, C, G> ResourceScheduler<P, E, C, G>
where
    P: StatePersistence,
    E: Executor,
    C: Clock,
    G: IdGen,
{
    /// Handle one task joined from the running set
    pub(super) async fn on_joined(&mut self, joined: Result<Completion, JoinError>) {
        let completion = match joined {
            Ok(completion) => completion,
            Err(e) => {
                // Guard tasks catch their executor's panics and aborts
                tracing::error!(error = %e, "lost track of a scheduler task");
                return;
            }
        };
        match completion {
            Completion::Deploy { job, finished, result } => {
                self.on_deploy_done(job, finished, result).await
            }
            Completion::NotStarted { key, error } => {
                tracing::warn!(
                    task = %key,
                    error = %error,
                    "could not record deploy start, executor not called"
                );
                self.queue.finish(&key);
                // The timer that queued this task was consumed when it fired
                if let Some(state) = self.model.state(&key.resource).cloned() {
                    self.timers.rearm_timer(&key.resource, &state);
                }
            }
            Completion::DryRun { key, dryrun_id, rvid, started, result } => {
                self.on_dry_run_done(&key, dryrun_id, rvid, started, result).await
            }
            Completion::Facts { key, result } => self.on_facts_done(&key, result).await,
        }
    }

    async fn on_deploy_done(
        &mut self,
        job: DeployJob,
        finished: DateTime<Utc>,
        result: Result<DeployReport, ExecutorError>,
    ) {
        let resource = job.key.resource.clone();
        let mut report = deploy_report(&job, finished, result);
        if let Some(warning) = self.unexpected_success_warning(&resource, &report, finished) {
            tracing::warn!(%resource, action_id = %job.action_id, "{}", warning.msg);
            report.messages.push(warning);
        }
        let mut outcome = DeployOutcome {
            attribute_hash: job.attribute_hash.clone(),
            status: report.status,
            change: report.change,
            started: job.started,
            finished,
        };
        let mut transition = self.model.transition_for_result(&resource, &outcome);

        let done = DeployDone {
            attribute_hash: job.attribute_hash.clone(),
            report: report.clone(),
            state: fresh_state(&transition),
            started: job.started,
            finished,
        };
        if let Err(e) = self.persistence.send_deploy_done(&self.env, done).await {
            tracing::error!(
                %resource,
                action_id = %job.action_id,
                error = %e,
                "failed to record deploy result, closing the action as failed"
            );
            // Whatever the executor did is unknown to storage: count it as
            // a failure so the resource stays dirty and gets retried
            outcome.status = HandlerResult::Failed;
            outcome.change = Change::NoChange;
            transition = self.model.transition_for_result(&resource, &outcome);
            let mut closed =
                DeployReport::new(job.action_id.clone(), job.rvid.clone(), HandlerResult::Failed);
            closed.messages = report.messages;
            closed.messages.push(LogLine::new(
                LogLevel::Error,
                format!("could not record deploy result: {e}"),
                finished,
            ));
            let retry = DeployDone {
                attribute_hash: job.attribute_hash.clone(),
                report: closed,
                state: fresh_state(&transition),
                started: job.started,
                finished,
            };
            if let Err(e) = self.persistence.send_deploy_done(&self.env, retry).await {
                tracing::error!(
                    %resource,
                    action_id = %job.action_id,
                    error = %e,
                    "failed to close deploy action"
                );
            }
        }
        let transition = match transition {
            Ok(transition) => transition,
            Err(e) => {
                tracing::warn!(%resource, error = %e, "deploy result for untracked resource");
                self.queue.finish(&job.key);
                return;
            }
        };

        self.model.commit_transition(&transition);
        tracing::info!(
            %resource,
            action_id = %job.action_id,
            status = %outcome.status,
            change = %outcome.change,
            compliance = %transition.next.compliance,
            stale = transition.stale,
            "deploy finished"
        );
        if transition.orphan {
            self.queue.finish(&job.key);
            return;
        }
        if transition.stale {
            tracing::debug!(%resource, "recorded stale deploy result");
        }
        self.timers.update_timer(&resource, &transition.next);

        if transition.next.compliance == Compliance::Undefined {
            let changes = self.model.recompute_hard_blocks();
            self.apply_block_changes(changes, job.priority).await;
        }

        if transition.next.blocked == Blocked::TemporarilyBlocked
            && transition.previous.blocked != Blocked::TemporarilyBlocked
        {
            for dependent in self.model.propagate_temporary_block(&resource) {
                if let Some(state) = self.model.state(&dependent).cloned() {
                    self.timers.update_timer(&dependent, &state);
                }
            }
        }

        if transition.next.last_deploy_result == DeployResult::Deployed
            && (!transition.stale || transition.recovered())
        {
            self.recover_dependents(&resource, job.priority);
        }

        for listener in self.model.event_listeners(&resource) {
            let pending = self
                .pending_events
                .entry(listener)
                .or_insert(PendingEvent { priority: job.priority, sender: resource.clone() });
            if job.priority.is_more_urgent_than(pending.priority) {
                *pending = PendingEvent { priority: job.priority, sender: resource.clone() };
            }
        }

        self.queue.finish(&job.key);
    }

    /// Warning for a temporarily blocked resource that deployed anyway.
    ///
    /// Either its handler skipped for dependencies it did not actually
    /// wait for, or the block outlived the failures that caused it.
    fn unexpected_success_warning(
        &self,
        resource: &ResourceId,
        report: &DeployReport,
        at: DateTime<Utc>,
    ) -> Option<LogLine> {
        let state = self.model.state(resource)?;
        if state.blocked != Blocked::TemporarilyBlocked || report.status != HandlerResult::Deployed
        {
            return None;
        }
        let bad: Vec<String> = self
            .model
            .graph()
            .requires_of(resource)
            .iter()
            .filter_map(|req| {
                let result = self.model.state(req)?.last_deploy_result;
                (result != DeployResult::Deployed).then(|| format!("{req}: {result}"))
            })
            .collect();
        let msg = if bad.is_empty() {
            format!(
                "Inconsistent internal state for resource {resource}. It was still considered \
                 blocked pending a successful deploy of one of its requires, but all of them \
                 are deployed. Trigger a repair if resources stay stuck in the skipped state."
            )
        } else {
            format!(
                "Resource {resource} was expected to skip for dependencies but it deployed \
                 successfully. Some requires ({}) are still not deployed. A handler should only \
                 skip for dependencies when it can not progress until all requires are \
                 deployed, otherwise resources get stuck in the skipped state.",
                bad.join(", ")
            )
        };
        Some(LogLine::new(LogLevel::Warning, msg, at))
    }

    /// Unblock temporarily blocked dependents a success of `resource` frees
    fn recover_dependents(&mut self, resource: &ResourceId, priority: TaskPriority) {
        for dependent in self.model.recovery_candidates(resource) {
            if let Err(e) = self.model.set_blocked(&dependent, Blocked::NotBlocked) {
                tracing::warn!(resource = %dependent, error = %e, "could not unblock dependent");
                continue;
            }
            if let Some(state) = self.model.state(&dependent).cloned() {
                self.timers.update_timer(&dependent, &state);
            }
            let reason =
                format!("Deploying because a recovery event was received from {resource}");
            self.enqueue(Task::new(TaskKey::deploy(dependent), priority, reason), false);
        }
    }

    /// Start event deploys for dependents whose requirements have all
    /// reported for the current wave
    pub(super) fn flush_events(&mut self) {
        let ready: Vec<ResourceId> = self
            .pending_events
            .keys()
            .filter(|rid| {
                !self.model.graph().requires_of(rid).iter().any(|req| self.queue.is_scheduled(req))
            })
            .cloned()
            .collect();
        for rid in ready {
            let Some(event) = self.pending_events.remove(&rid) else {
                continue;
            };
            if !self.model.wants_event_deploy(&rid) {
                tracing::debug!(resource = %rid, sender = %event.sender, "event needs no deploy");
                continue;
            }
            let reason = format!("Deploying because an event was received from {}", event.sender);
            self.enqueue(Task::new(TaskKey::deploy(rid), event.priority, reason), false);
        }
    }

    /// Act on a hard-block recomputation: blocked resources lose their
    /// timers and queued deploys, unblocked ones get timers and, when
    /// dirty, a deploy. The new flags are persisted best-effort.
    pub(super) async fn apply_block_changes(
        &mut self,
        changes: BlockChanges,
        priority: TaskPriority,
    ) {
        if changes.is_empty() {
            return;
        }
        for rid in &changes.newly_blocked {
            self.timers.cancel_timer(rid);
            self.queue.drop_deploys(rid);
        }
        for rid in &changes.unblocked {
            if let Some(state) = self.model.state(rid).cloned() {
                self.timers.update_timer(rid, &state);
            }
            if self.model.is_dirty(rid) {
                let reason = format!("Deploying because {rid} was unblocked");
                self.enqueue(Task::new(TaskKey::deploy(rid.clone()), priority, reason), true);
            }
        }

        let updates: IntentUpdates = changes
            .newly_blocked
            .iter()
            .chain(changes.unblocked.iter())
            .filter_map(|rid| {
                let state = self.model.state(rid)?.clone();
                let intent = self.model.intent(rid)?.clone();
                Some((rid.clone(), (state, intent)))
            })
            .collect();
        if let Err(e) = self.persist_updates(updates).await {
            tracing::warn!(error = %e, "failed to persist blocked states");
        }
    }

    async fn persist_updates(&self, updates: IntentUpdates) -> Result<(), PersistenceError> {
        let version = self.model.version().unwrap_or_default();
        let mut txn = self.persistence.get_connection().await?;
        txn.update_resource_intent(&self.env, version, updates, true).await?;
        txn.commit().await
    }

    async fn on_dry_run_done(
        &mut self,
        key: &TaskKey,
        dryrun_id: DryRunId,
        rvid: ResourceVersionId,
        started: DateTime<Utc>,
        result: Result<DryrunReport, ExecutorError>,
    ) {
        let report = result.unwrap_or_else(|e| {
            let finished = self.clock.utc_now();
            let mut report = DryrunReport::undeployable(dryrun_id, rvid, started);
            report.finished = finished;
            report.messages.push(LogLine::new(
                LogLevel::Error,
                format!("dry run failed: {e}"),
                finished,
            ));
            report
        });
        tracing::debug!(rvid = %report.rvid, status = %report.status, "dry run finished");
        if let Err(e) = self.persistence.dryrun_update(&self.env, report).await {
            tracing::error!(task = %key, error = %e, "failed to record dry run");
        }
        self.queue.finish(key);
    }

    async fn on_facts_done(&mut self, key: &TaskKey, result: Result<FactReport, ExecutorError>) {
        match result {
            Ok(report) if report.success => {
                if let Err(e) = self.persistence.set_parameters(&self.env, &report).await {
                    tracing::error!(task = %key, error = %e, "failed to store facts");
                }
            }
            Ok(report) => {
                tracing::warn!(resource = %report.resource_id, "fact refresh reported failure")
            }
            Err(e) => tracing::warn!(task = %key, error = %e, "fact refresh failed"),
        }
        self.queue.finish(key);
    }

    /// Queue `task` unless the scheduler is stopping. With
    /// `dedup_in_flight`, a deploy is also skipped when one for the same
    /// intent is already running.
    pub(super) fn enqueue(&mut self, task: Task, dedup_in_flight: bool) -> Enqueued {
        if self.shutting_down {
            return Enqueued::Duplicate;
        }
        if dedup_in_flight && task.key.kind == TaskKind::Deploy {
            let current = self.model.intent(task.resource()).map(|i| i.attribute_hash.as_str());
            if current.is_some() && self.queue.running_hash(task.resource()) == current {
                tracing::debug!(task = %task.key, "same intent already deploying");
                return Enqueued::Duplicate;
            }
        }
        let result = self.queue.enqueue(task);
        if result == Enqueued::Queued {
            tracing::debug!(
                pending = self.queue.pending_len(),
                in_flight = self.queue.in_flight_len(),
                "task queued"
            );
        }
        result
    }
}

/// The state to persist with a result. Stale results only record the
/// attempt, which storage derives itself.
fn fresh_state(transition: &Result<DeployTransition, SchedulerError>) -> Option<ResourceState> {
    match transition {
        Ok(t) if !t.stale => Some(t.next.clone()),
        _ => None,
    }
}

/// Normalize an executor result into a report with a final status
fn deploy_report(
    job: &DeployJob,
    finished: DateTime<Utc>,
    result: Result<DeployReport, ExecutorError>,
) -> DeployReport {
    let failed = |status: HandlerResult, level: LogLevel, msg: String| {
        DeployReport::new(job.action_id.clone(), job.rvid.clone(), status)
            .with_message(LogLine::new(level, msg, finished))
    };
    match result {
        Ok(report) if report.status.deploy_result().is_some() => report,
        Ok(report) => failed(
            HandlerResult::Failed,
            LogLevel::Error,
            format!("executor reported non-final status {}", report.status),
        ),
        Err(ExecutorError::Cancelled) => {
            failed(HandlerResult::Cancelled, LogLevel::Warning, "deploy cancelled".to_string())
        }
        Err(e) => failed(HandlerResult::Failed, LogLevel::Error, e.to_string()),
    }
}
