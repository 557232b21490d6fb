// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable executor for tests

use crate::executor::{
    DeployRequest, DryRunRequest, Executor, ExecutorError, FactRequest, RequirementStatuses,
};
use async_trait::async_trait;
use chrono::Utc;
use cv_core::{
    ActionId, Change, DeployReport, DryrunReport, FactReport, HandlerResult, ResourceId,
    ResourceStatus,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Scripted result of one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOutcome {
    Report { status: HandlerResult, change: Change },
    Error(ExecutorError),
}

impl FakeOutcome {
    pub fn deployed(change: Change) -> Self {
        FakeOutcome::Report { status: HandlerResult::Deployed, change }
    }

    pub fn status(status: HandlerResult) -> Self {
        FakeOutcome::Report { status, change: Change::NoChange }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Deploy,
    DryRun,
    Facts,
}

/// Recorded executor call
#[derive(Debug, Clone)]
pub struct ExecutorCall {
    pub kind: CallKind,
    pub resource: ResourceId,
    pub action_id: Option<ActionId>,
    pub attribute_hash: String,
    pub requires: RequirementStatuses,
    pub repair: bool,
    pub reason: String,
}

struct FakeState {
    scripted: HashMap<ResourceId, VecDeque<FakeOutcome>>,
    default: FakeOutcome,
    facts: HashMap<ResourceId, BTreeMap<String, Value>>,
    check_dependencies: bool,
    calls: Vec<ExecutorCall>,
    in_flight: usize,
    max_in_flight: usize,
    slots: HashMap<ResourceId, usize>,
    overlap: bool,
    gate: Option<Arc<Semaphore>>,
}

/// Fake executor.
///
/// Deploys succeed with `nochange` unless scripted otherwise. A deploy whose
/// requirements are not all `deployed` reports `skipped_for_dependency`,
/// like a real handler would. `hold()` parks every call until released.
#[derive(Clone)]
pub struct FakeExecutor {
    inner: Arc<Mutex<FakeState>>,
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                scripted: HashMap::new(),
                default: FakeOutcome::deployed(Change::NoChange),
                facts: HashMap::new(),
                check_dependencies: true,
                calls: Vec::new(),
                in_flight: 0,
                max_in_flight: 0,
                slots: HashMap::new(),
                overlap: false,
                gate: None,
            })),
        }
    }
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next calls on `resource`
    pub fn script(&self, resource: &ResourceId, outcomes: impl IntoIterator<Item = FakeOutcome>) {
        self.inner.lock().scripted.entry(resource.clone()).or_default().extend(outcomes);
    }

    /// Outcome for calls with nothing scripted
    pub fn set_default(&self, outcome: FakeOutcome) {
        self.inner.lock().default = outcome;
    }

    pub fn set_facts(&self, resource: &ResourceId, facts: BTreeMap<String, Value>) {
        self.inner.lock().facts.insert(resource.clone(), facts);
    }

    /// Disable the automatic `skipped_for_dependency` outcome
    pub fn ignore_dependencies(&self) {
        self.inner.lock().check_dependencies = false;
    }

    /// Park all subsequent calls until `release` or `open`
    pub fn hold(&self) {
        self.inner.lock().gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` parked calls proceed
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.inner.lock().gate {
            gate.add_permits(n);
        }
    }

    /// Let every parked and future call proceed
    pub fn open(&self) {
        if let Some(gate) = self.inner.lock().gate.take() {
            gate.close();
        }
    }

    pub fn calls(&self) -> Vec<ExecutorCall> {
        self.inner.lock().calls.clone()
    }

    pub fn deploys_of(&self, resource: &ResourceId) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.kind == CallKind::Deploy && c.resource == *resource)
            .count()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().max_in_flight
    }

    /// Whether two deploy-class calls ever ran for one resource at once
    pub fn overlap_detected(&self) -> bool {
        self.inner.lock().overlap
    }

    fn enter(&self, call: ExecutorCall) -> (Option<Arc<Semaphore>>, FakeOutcome) {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        if call.kind != CallKind::Facts {
            let slot = state.slots.entry(call.resource.clone()).or_default();
            *slot += 1;
            if *slot > 1 {
                state.overlap = true;
            }
        }
        let scripted = state.scripted.get_mut(&call.resource).and_then(VecDeque::pop_front);
        let outcome = match scripted {
            Some(outcome) => outcome,
            None if call.kind == CallKind::Deploy
                && state.check_dependencies
                && call.requires.values().any(|s| *s != ResourceStatus::Deployed) =>
            {
                FakeOutcome::status(HandlerResult::SkippedForDependency)
            }
            None => state.default.clone(),
        };
        let gate = state.gate.clone();
        state.calls.push(call);
        (gate, outcome)
    }

    fn exit(&self, kind: CallKind, resource: &ResourceId) {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        state.in_flight = state.in_flight.saturating_sub(1);
        if kind != CallKind::Facts {
            if let Some(slot) = state.slots.get_mut(resource) {
                *slot = slot.saturating_sub(1);
            }
        }
    }

    async fn run(
        &self,
        call: ExecutorCall,
        cancel: &CancellationToken,
    ) -> Result<(HandlerResult, Change), ExecutorError> {
        let kind = call.kind;
        let resource = call.resource.clone();
        let (gate, outcome) = self.enter(call);
        if let Some(gate) = gate {
            tokio::select! {
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                _ = cancel.cancelled() => {
                    self.exit(kind, &resource);
                    return Err(ExecutorError::Cancelled);
                }
            }
        }
        self.exit(kind, &resource);
        match outcome {
            FakeOutcome::Report { status, change } => Ok((status, change)),
            FakeOutcome::Error(e) => Err(e),
        }
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn deploy(
        &self,
        request: DeployRequest,
        cancel: CancellationToken,
    ) -> Result<DeployReport, ExecutorError> {
        let call = ExecutorCall {
            kind: CallKind::Deploy,
            resource: request.intent.id.clone(),
            action_id: Some(request.action_id.clone()),
            attribute_hash: request.intent.attribute_hash.clone(),
            requires: request.requires,
            repair: request.repair,
            reason: request.reason,
        };
        let (status, change) = self.run(call, &cancel).await?;
        Ok(DeployReport::new(request.action_id, request.rvid, status).with_change(change))
    }

    async fn dry_run(
        &self,
        request: DryRunRequest,
        cancel: CancellationToken,
    ) -> Result<DryrunReport, ExecutorError> {
        let started = Utc::now();
        let call = ExecutorCall {
            kind: CallKind::DryRun,
            resource: request.intent.id.clone(),
            action_id: None,
            attribute_hash: request.intent.attribute_hash.clone(),
            requires: RequirementStatuses::new(),
            repair: false,
            reason: String::new(),
        };
        self.run(call, &cancel).await?;
        Ok(DryrunReport {
            dryrun_id: request.dryrun_id,
            rvid: request.rvid,
            status: HandlerResult::Dry,
            changes: Default::default(),
            messages: Vec::new(),
            started,
            finished: Utc::now(),
        })
    }

    async fn get_facts(
        &self,
        request: FactRequest,
        cancel: CancellationToken,
    ) -> Result<FactReport, ExecutorError> {
        let call = ExecutorCall {
            kind: CallKind::Facts,
            resource: request.resource_id.clone(),
            action_id: None,
            attribute_hash: request.intent.attribute_hash.clone(),
            requires: RequirementStatuses::new(),
            repair: false,
            reason: String::new(),
        };
        let (status, _) = self.run(call, &cancel).await?;
        let parameters =
            self.inner.lock().facts.get(&request.resource_id).cloned().unwrap_or_default();
        Ok(FactReport {
            resource_id: request.resource_id,
            parameters,
            success: status != HandlerResult::Failed,
            messages: Vec::new(),
        })
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
