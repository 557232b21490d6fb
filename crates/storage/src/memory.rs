// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory reference store.
//!
//! Transactions stage their operations and apply them to a copy of the
//! data at commit time, so a failed commit leaves nothing behind.

use crate::persistence::{
    DependencyStatuses, DeployDone, IntentUpdates, PersistenceError, RunState, StatePersistence,
    StateTransaction,
};
use crate::records::{EnvironmentData, ResourceAction, ResourceRecord, StoreData};
use crate::snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cv_core::{
    ActionId, Compliance, DryRunId, DryrunReport, EnvironmentId, FactReport, HandlerResult,
    ModelVersion, ResourceId, ResourceStatus, ResourceVersionId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Operations that can be made to fail on demand in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Commit,
    InProgress,
    DeployDone,
    DryrunUpdate,
    SetParameters,
    RunState,
}

#[derive(Default)]
struct Inner {
    data: StoreData,
    failures: HashMap<FailPoint, usize>,
}

impl Inner {
    fn check(&mut self, point: FailPoint) -> Result<(), PersistenceError> {
        match self.failures.get_mut(&point) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(PersistenceError::TransactionFailed(format!("injected {point:?} failure")))
            }
            _ => Ok(()),
        }
    }

    fn env(&self, env: &EnvironmentId) -> Result<&EnvironmentData, PersistenceError> {
        self.data
            .environments
            .get(env)
            .ok_or_else(|| PersistenceError::NotFound(format!("environment {env}")))
    }

    fn env_mut(&mut self, env: &EnvironmentId) -> Result<&mut EnvironmentData, PersistenceError> {
        self.data
            .environments
            .get_mut(env)
            .ok_or_else(|| PersistenceError::NotFound(format!("environment {env}")))
    }
}

/// Shared, cloneable in-memory implementation of [`StatePersistence`]
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(data: StoreData) -> Self {
        Self { inner: Arc::new(Mutex::new(Inner { data, failures: HashMap::new() })) }
    }

    /// Load a store from a checkpoint written by [`MemoryStore::checkpoint`]
    pub fn from_checkpoint(path: &Path) -> Result<Self, PersistenceError> {
        Ok(Self::from_data(snapshot::read_checkpoint(path)?))
    }

    pub fn checkpoint(&self, path: &Path) -> Result<(), PersistenceError> {
        let data = self.inner.lock().data.clone();
        snapshot::write_checkpoint(path, &data)
    }

    /// Release a new model version and orphan every resource that neither
    /// it nor a later released version references.
    pub fn release_version(
        &self,
        env: &EnvironmentId,
        model: ModelVersion,
    ) -> Result<Vec<ResourceId>, PersistenceError> {
        let version = model.version;
        let mut inner = self.inner.lock();
        let data = inner.data.environments.entry(env.clone()).or_default();
        data.versions.insert(version, model);
        let orphaned = mark_all_orphans(data, version);
        tracing::info!(%env, version, orphaned = orphaned.len(), "released model version");
        Ok(orphaned)
    }

    pub fn data(&self) -> StoreData {
        self.inner.lock().data.clone()
    }

    pub fn record(&self, env: &EnvironmentId, resource: &str) -> Option<ResourceRecord> {
        self.inner.lock().data.environments.get(env)?.resources.get(resource).cloned()
    }

    pub fn action(&self, env: &EnvironmentId, action_id: &str) -> Option<ResourceAction> {
        self.inner.lock().data.environments.get(env)?.actions.get(action_id).cloned()
    }

    /// Every action recorded for `resource`, in start order
    pub fn actions_for(&self, env: &EnvironmentId, resource: &ResourceId) -> Vec<ResourceAction> {
        let inner = self.inner.lock();
        let mut actions: Vec<ResourceAction> = inner
            .data
            .environments
            .get(env)
            .map(|d| {
                d.actions.values().filter(|a| a.rvid.resource_id() == *resource).cloned().collect()
            })
            .unwrap_or_default();
        actions.sort_by_key(|a| a.started);
        actions
    }

    pub fn dryrun_reports(&self, env: &EnvironmentId, dryrun_id: &DryRunId) -> Vec<DryrunReport> {
        let inner = self.inner.lock();
        inner
            .data
            .environments
            .get(env)
            .and_then(|d| d.dryruns.get(dryrun_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next `times` calls through `point` fail
    #[cfg(any(test, feature = "test-support"))]
    pub fn fail_next(&self, point: FailPoint, times: usize) {
        *self.inner.lock().failures.entry(point).or_default() += times;
    }
}

fn mark_all_orphans(data: &mut EnvironmentData, current_version: u64) -> Vec<ResourceId> {
    let orphaned: Vec<ResourceId> = data
        .resources
        .keys()
        .filter(|rid| !data.referenced_since(rid, current_version))
        .cloned()
        .collect();
    let mut newly = Vec::new();
    for rid in orphaned {
        if let Some(record) = data.resources.get_mut(&rid) {
            if !record.state.is_orphan {
                record.state.is_orphan = true;
                newly.push(rid);
            }
        }
    }
    newly
}

enum TxnOp {
    UpdateIntent { env: EnvironmentId, version: u64, updates: IntentUpdates, update_blocked: bool },
    MarkAllOrphans { env: EnvironmentId, version: u64 },
    MarkOrphans { env: EnvironmentId, resources: Vec<ResourceId> },
    SetProcessed { env: EnvironmentId, version: u64 },
}

/// Staged operations against a [`MemoryStore`]
pub struct MemoryTransaction {
    store: MemoryStore,
    ops: Vec<TxnOp>,
}

impl MemoryTransaction {
    fn apply(data: &mut StoreData, op: TxnOp) -> Result<(), PersistenceError> {
        match op {
            TxnOp::UpdateIntent { env, version, updates, update_blocked } => {
                let data = data.environments.entry(env).or_default();
                for (rid, (state, intent)) in updates {
                    let mut state = state;
                    match data.resources.get_mut(&rid) {
                        Some(record) => {
                            state.blocked = if update_blocked {
                                state.blocked.db_value()
                            } else {
                                record.state.blocked
                            };
                            record.intent = intent;
                            record.state = state;
                            record.model_version = version;
                        }
                        None => {
                            state.blocked = state.blocked.db_value();
                            data.resources.insert(
                                rid.clone(),
                                ResourceRecord {
                                    resource_id: rid,
                                    intent,
                                    state,
                                    model_version: version,
                                    parameters: Default::default(),
                                },
                            );
                        }
                    }
                }
            }
            TxnOp::MarkAllOrphans { env, version } => {
                mark_all_orphans(data.environments.entry(env).or_default(), version);
            }
            TxnOp::MarkOrphans { env, resources } => {
                let data = data.environments.entry(env).or_default();
                for rid in resources {
                    if let Some(record) = data.resources.get_mut(&rid) {
                        record.state.is_orphan = true;
                    }
                }
            }
            TxnOp::SetProcessed { env, version } => {
                let data = data.environments.entry(env).or_default();
                if let Some(last) = data.last_processed_version {
                    if version < last {
                        return Err(PersistenceError::InvalidTransition(format!(
                            "model version {version} is older than last processed {last}"
                        )));
                    }
                }
                data.last_processed_version = Some(version);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StateTransaction for MemoryTransaction {
    async fn update_resource_intent(
        &mut self,
        env: &EnvironmentId,
        version: u64,
        updates: IntentUpdates,
        update_blocked_state: bool,
    ) -> Result<(), PersistenceError> {
        self.ops.push(TxnOp::UpdateIntent {
            env: env.clone(),
            version,
            updates,
            update_blocked: update_blocked_state,
        });
        Ok(())
    }

    async fn mark_all_orphans(
        &mut self,
        env: &EnvironmentId,
        current_version: u64,
    ) -> Result<(), PersistenceError> {
        self.ops.push(TxnOp::MarkAllOrphans { env: env.clone(), version: current_version });
        Ok(())
    }

    async fn mark_as_orphan(
        &mut self,
        env: &EnvironmentId,
        resources: &[ResourceId],
    ) -> Result<(), PersistenceError> {
        self.ops.push(TxnOp::MarkOrphans { env: env.clone(), resources: resources.to_vec() });
        Ok(())
    }

    async fn set_last_processed_model_version(
        &mut self,
        env: &EnvironmentId,
        version: u64,
    ) -> Result<(), PersistenceError> {
        self.ops.push(TxnOp::SetProcessed { env: env.clone(), version });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), PersistenceError> {
        let ops = std::mem::take(&mut self.ops);
        let mut inner = self.store.inner.lock();
        inner.check(FailPoint::Commit)?;
        let mut staged = inner.data.clone();
        for op in ops {
            Self::apply(&mut staged, op)?;
        }
        inner.data = staged;
        Ok(())
    }
}

#[async_trait]
impl StatePersistence for MemoryStore {
    type Transaction = MemoryTransaction;

    async fn get_connection(&self) -> Result<MemoryTransaction, PersistenceError> {
        Ok(MemoryTransaction { store: self.clone(), ops: Vec::new() })
    }

    async fn send_in_progress(
        &self,
        env: &EnvironmentId,
        action_id: &ActionId,
        rvid: &ResourceVersionId,
        started: DateTime<Utc>,
    ) -> Result<DependencyStatuses, PersistenceError> {
        let mut inner = self.inner.lock();
        inner.check(FailPoint::InProgress)?;
        let data = inner.env_mut(env)?;
        if data.actions.contains_key(action_id) {
            return Err(PersistenceError::InvalidTransition(format!(
                "action {action_id} already started"
            )));
        }
        let rid = rvid.resource_id();
        let record =
            data.resources.get(&rid).ok_or_else(|| PersistenceError::NotFound(rid.to_string()))?;
        let statuses = record
            .intent
            .requires
            .iter()
            .map(|req| {
                let status = data
                    .resources
                    .get(req)
                    .map(|r| r.state.status())
                    .unwrap_or(ResourceStatus::Available);
                (req.clone(), status)
            })
            .collect();
        data.actions.insert(
            action_id.clone(),
            ResourceAction {
                action_id: action_id.clone(),
                rvid: rvid.clone(),
                status: HandlerResult::Deploying,
                change: Default::default(),
                messages: Vec::new(),
                started,
                finished: None,
            },
        );
        Ok(statuses)
    }

    async fn send_deploy_done(
        &self,
        env: &EnvironmentId,
        done: DeployDone,
    ) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        inner.check(FailPoint::DeployDone)?;
        let status = done.report.status;
        if status.is_transient() || status == HandlerResult::Dry {
            return Err(PersistenceError::InvalidTransition(format!(
                "{status} is not a final deploy status"
            )));
        }
        let data = inner.env_mut(env)?;
        let action_id = &done.report.action_id;
        let action = data
            .actions
            .get(action_id)
            .ok_or_else(|| PersistenceError::NotFound(format!("action {action_id}")))?;
        if action.is_finished() {
            tracing::error!(%action_id, "deploy done reported twice");
            return Err(PersistenceError::DoubleCompletion(action_id.clone()));
        }
        let rid = done.report.resource_id();
        let record =
            data.resources.get(&rid).ok_or_else(|| PersistenceError::NotFound(rid.to_string()))?;
        if let Some(state) = &done.state {
            if record.state.compliance == Compliance::Undefined
                && record.intent.attribute_hash == done.attribute_hash
                && state.compliance != Compliance::Undefined
            {
                return Err(PersistenceError::InvalidTransition(format!(
                    "resource {rid} is undefined"
                )));
            }
        }

        if let Some(record) = data.resources.get_mut(&rid) {
            match done.state {
                Some(mut state) => {
                    state.blocked = state.blocked.db_value();
                    record.state = state;
                }
                None => record.state.record_attempt(
                    status,
                    done.report.change,
                    done.started,
                    done.finished,
                ),
            }
        }
        if let Some(action) = data.actions.get_mut(action_id) {
            action.status = status;
            action.change = done.report.change;
            action.messages = done.report.messages;
            action.finished = Some(done.finished);
        }
        Ok(())
    }

    async fn dryrun_update(
        &self,
        env: &EnvironmentId,
        report: DryrunReport,
    ) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        inner.check(FailPoint::DryrunUpdate)?;
        let data = inner.data.environments.entry(env.clone()).or_default();
        let reports = data.dryruns.entry(report.dryrun_id.clone()).or_default();
        reports.retain(|r| r.rvid != report.rvid);
        reports.push(report);
        Ok(())
    }

    async fn set_parameters(
        &self,
        env: &EnvironmentId,
        report: &FactReport,
    ) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        inner.check(FailPoint::SetParameters)?;
        let record = inner
            .env_mut(env)?
            .resources
            .get_mut(&report.resource_id)
            .ok_or_else(|| PersistenceError::NotFound(report.resource_id.to_string()))?;
        record.parameters.extend(report.parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn released_versions_since(
        &self,
        env: &EnvironmentId,
        after: u64,
    ) -> Result<Vec<ModelVersion>, PersistenceError> {
        let inner = self.inner.lock();
        Ok(inner
            .data
            .environments
            .get(env)
            .map(|d| {
                d.versions
                    .range(after.saturating_add(1)..)
                    .map(|(_, model)| model.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_version(
        &self,
        env: &EnvironmentId,
        version: u64,
    ) -> Result<Option<ModelVersion>, PersistenceError> {
        let inner = self.inner.lock();
        Ok(inner.data.environments.get(env).and_then(|d| d.versions.get(&version)).cloned())
    }

    async fn load_resources(
        &self,
        env: &EnvironmentId,
    ) -> Result<Vec<ResourceRecord>, PersistenceError> {
        let inner = self.inner.lock();
        Ok(inner
            .data
            .environments
            .get(env)
            .map(|d| d.resources.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn last_processed_version(
        &self,
        env: &EnvironmentId,
    ) -> Result<Option<u64>, PersistenceError> {
        let inner = self.inner.lock();
        Ok(inner.env(env).ok().and_then(|d| d.last_processed_version))
    }

    async fn run_state(&self, env: &EnvironmentId) -> Result<RunState, PersistenceError> {
        let inner = self.inner.lock();
        Ok(inner
            .env(env)
            .map(|d| RunState { halted: d.halted, paused_agents: d.paused_agents.clone() })
            .unwrap_or_default())
    }

    async fn set_agent_paused(
        &self,
        env: &EnvironmentId,
        agent: &str,
        paused: bool,
    ) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        inner.check(FailPoint::RunState)?;
        let data = inner.data.environments.entry(env.clone()).or_default();
        if paused {
            data.paused_agents.insert(agent.to_string());
        } else {
            data.paused_agents.remove(agent);
        }
        Ok(())
    }

    async fn set_halted(&self, env: &EnvironmentId, halted: bool) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        inner.check(FailPoint::RunState)?;
        inner.data.environments.entry(env.clone()).or_default().halted = halted;
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
