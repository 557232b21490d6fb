// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource State Model: authoritative in-memory state per tracked resource.
//!
//! Transitions are computed on `&self` and committed separately, so the
//! scheduler can persist a change before it becomes visible here.

mod propagate;

pub use propagate::BlockChanges;

use crate::error::SchedulerError;
use crate::graph::DependencyGraph;
use chrono::{DateTime, Utc};
use cv_core::{
    Blocked, Change, Compliance, DeployResult, HandlerResult, ModelVersion, ResourceId,
    ResourceIntent, ResourceState,
};
use cv_storage::ResourceRecord;
use std::collections::{BTreeMap, HashSet};

/// A resource that left the model, kept for resurrection and audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub intent: ResourceIntent,
    pub state: ResourceState,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceModel {
    version: Option<u64>,
    intents: BTreeMap<ResourceId, ResourceIntent>,
    states: BTreeMap<ResourceId, ResourceState>,
    undefined: HashSet<ResourceId>,
    graph: DependencyGraph,
    orphans: BTreeMap<ResourceId, Orphan>,
}

/// Finished deploy attempt, as reported back to the model
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    /// Hash of the intent the attempt applied
    pub attribute_hash: String,
    pub status: HandlerResult,
    pub change: Change,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

/// A computed, not yet committed, deploy result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTransition {
    pub resource: ResourceId,
    /// Applied a superseded intent: bookkeeping only
    pub stale: bool,
    /// Result is for a resource that has since been orphaned
    pub orphan: bool,
    pub previous: ResourceState,
    pub next: ResourceState,
}

impl DeployTransition {
    pub fn compliance_changed(&self) -> bool {
        self.previous.compliance != self.next.compliance
    }

    /// A successful deploy after a failed or skipped one
    pub fn recovered(&self) -> bool {
        self.next.last_deploy_result == DeployResult::Deployed
            && matches!(
                self.previous.last_deploy_result,
                DeployResult::Failed | DeployResult::Skipped
            )
    }
}

impl ResourceModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the model from persisted records
    pub fn from_records(version: Option<u64>, records: Vec<ResourceRecord>) -> Self {
        let mut model = Self { version, ..Self::default() };
        for record in records {
            let ResourceRecord { resource_id, intent, state, .. } = record;
            if state.is_orphan {
                model.orphans.insert(resource_id, Orphan { intent, state });
                continue;
            }
            if state.compliance == Compliance::Undefined {
                model.undefined.insert(resource_id.clone());
            }
            model.graph.set_requires(&resource_id, intent.requires.clone());
            model.intents.insert(resource_id.clone(), intent);
            model.states.insert(resource_id, state);
        }
        model.recompute_hard_blocks();
        model
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = Some(version);
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn intent(&self, resource: &ResourceId) -> Option<&ResourceIntent> {
        self.intents.get(resource)
    }

    pub fn state(&self, resource: &ResourceId) -> Option<&ResourceState> {
        self.states.get(resource)
    }

    pub fn contains(&self, resource: &ResourceId) -> bool {
        self.states.contains_key(resource)
    }

    /// Tracked resources in id order
    pub fn resources(&self) -> impl Iterator<Item = (&ResourceId, &ResourceState)> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Defined as undefined by its model version
    pub fn is_undefined(&self, resource: &ResourceId) -> bool {
        self.undefined.contains(resource)
    }

    /// Tracked or orphaned state
    pub fn snapshot(&self, resource: &ResourceId) -> Option<ResourceState> {
        self.states
            .get(resource)
            .or_else(|| self.orphans.get(resource).map(|o| &o.state))
            .cloned()
    }

    pub fn orphan(&self, resource: &ResourceId) -> Option<&Orphan> {
        self.orphans.get(resource)
    }

    pub fn orphans(&self) -> impl Iterator<Item = (&ResourceId, &Orphan)> {
        self.orphans.iter()
    }

    /// Install a new intent.
    ///
    /// An untracked resource resumes from its orphaned state if it has one.
    /// Compliance becomes `HasUpdate` when the hash differs from the last
    /// deployed one and is otherwise left alone. An undefined intent forces
    /// `Undefined` and `Blocked`; a defined one lifts the resource's own
    /// hard block (blocks inherited from requirements are recomputed by
    /// [`ResourceModel::recompute_hard_blocks`]).
    pub fn mark_new_intent(&mut self, intent: ResourceIntent, undefined: bool) {
        let rid = intent.id.clone();
        let mut state = match self.states.remove(&rid) {
            Some(state) => state,
            None => match self.orphans.remove(&rid) {
                Some(orphan) => {
                    tracing::info!(resource = %rid, "resurrecting orphaned resource");
                    ResourceState { is_orphan: false, ..orphan.state }
                }
                None => ResourceState::new(undefined),
            },
        };

        if undefined {
            state.compliance = Compliance::Undefined;
            state.blocked = Blocked::Blocked;
            self.undefined.insert(rid.clone());
        } else {
            if state.compliance == Compliance::Undefined
                || state.last_deployed_hash.as_deref() != Some(intent.attribute_hash.as_str())
            {
                state.compliance = Compliance::HasUpdate;
            }
            if state.blocked == Blocked::Blocked {
                state.blocked = Blocked::NotBlocked;
            }
            self.undefined.remove(&rid);
        }

        self.graph.set_requires(&rid, intent.requires.clone());
        self.intents.insert(rid.clone(), intent);
        self.states.insert(rid, state);
    }

    /// Track `intent` with a fresh state, discarding any tracked or orphaned
    /// history for it
    pub fn reset_intent(&mut self, intent: ResourceIntent, undefined: bool) {
        self.states.remove(&intent.id);
        self.orphans.remove(&intent.id);
        self.mark_new_intent(intent, undefined);
    }

    /// Compute the state after a finished deploy attempt.
    ///
    /// A result for an intent that is no longer current (or for an
    /// undefined or orphaned resource) is stale: only the attempt's result
    /// and timestamps are recorded.
    pub fn transition_for_result(
        &self,
        resource: &ResourceId,
        outcome: &DeployOutcome,
    ) -> Result<DeployTransition, SchedulerError> {
        let tracked = (self.intents.get(resource), self.states.get(resource));
        let (intent, previous, orphan) = match tracked {
            (Some(intent), Some(state)) => (intent, state, false),
            _ => match self.orphans.get(resource) {
                Some(o) => (&o.intent, &o.state, true),
                None => return Err(SchedulerError::UnknownResource(resource.clone())),
            },
        };
        if outcome.status.deploy_result().is_none() {
            return Err(SchedulerError::InvalidTransition {
                resource: resource.clone(),
                reason: format!("{} is not a final deploy status", outcome.status),
            });
        }

        let stale = orphan
            || intent.attribute_hash != outcome.attribute_hash
            || previous.compliance == Compliance::Undefined;
        let mut next = previous.clone();
        next.record_attempt(outcome.status, outcome.change, outcome.started, outcome.finished);

        if !stale {
            next.last_deployed_hash = Some(outcome.attribute_hash.clone());
            next.last_handler_run_compliant = Some(
                outcome.status == HandlerResult::Deployed && outcome.change == Change::NoChange,
            );
            match outcome.status {
                HandlerResult::Deployed => {
                    next.compliance = Compliance::Compliant;
                    if next.blocked == Blocked::TemporarilyBlocked {
                        next.blocked = Blocked::NotBlocked;
                    }
                }
                HandlerResult::Undefined => {
                    next.compliance = Compliance::Undefined;
                    next.blocked = Blocked::Blocked;
                }
                HandlerResult::SkippedForDependency => {
                    next.compliance = Compliance::NonCompliant;
                    if next.blocked == Blocked::NotBlocked
                        && self.should_skip_for_dependencies(resource)
                    {
                        next.blocked = Blocked::TemporarilyBlocked;
                    }
                }
                _ => next.compliance = Compliance::NonCompliant,
            }
        }

        Ok(DeployTransition {
            resource: resource.clone(),
            stale,
            orphan,
            previous: previous.clone(),
            next,
        })
    }

    /// Install a transition computed by [`ResourceModel::transition_for_result`]
    pub fn commit_transition(&mut self, transition: &DeployTransition) {
        let rid = &transition.resource;
        if transition.orphan {
            if let Some(o) = self.orphans.get_mut(rid) {
                o.state = transition.next.clone();
            }
            return;
        }
        if transition.next.compliance == Compliance::Undefined {
            self.undefined.insert(rid.clone());
        }
        if let Some(state) = self.states.get_mut(rid) {
            *state = transition.next.clone();
        }
    }

    /// Compute and commit in one step
    pub fn apply_deploy_result(
        &mut self,
        resource: &ResourceId,
        outcome: &DeployOutcome,
    ) -> Result<DeployTransition, SchedulerError> {
        let transition = self.transition_for_result(resource, outcome)?;
        self.commit_transition(&transition);
        Ok(transition)
    }

    /// Guarded blocking transition. A hard block is only lifted by a new,
    /// defined intent, so leaving `Blocked` here is rejected.
    pub fn set_blocked(
        &mut self,
        resource: &ResourceId,
        blocked: Blocked,
    ) -> Result<bool, SchedulerError> {
        let state = self
            .states
            .get_mut(resource)
            .ok_or_else(|| SchedulerError::UnknownResource(resource.clone()))?;
        if state.blocked == blocked {
            return Ok(false);
        }
        if state.blocked == Blocked::Blocked {
            return Err(SchedulerError::InvalidTransition {
                resource: resource.clone(),
                reason: format!("{} can not move from blocked to {blocked}", resource),
            });
        }
        tracing::debug!(%resource, from = %state.blocked, to = %blocked, "blocked state changed");
        state.blocked = blocked;
        Ok(true)
    }

    /// Move `resource` into the orphan map
    pub fn mark_orphan(&mut self, resource: &ResourceId) -> bool {
        if !self.states.contains_key(resource) {
            return false;
        }
        let (Some(intent), Some(mut state)) =
            (self.intents.remove(resource), self.states.remove(resource))
        else {
            return false;
        };
        state.is_orphan = true;
        self.undefined.remove(resource);
        self.graph.remove(resource);
        self.orphans.insert(resource.clone(), Orphan { intent, state });
        true
    }

    /// Orphan every tracked resource `current` does not define
    pub fn mark_orphans_bulk(&mut self, current: &ModelVersion) -> Vec<ResourceId> {
        let gone: Vec<ResourceId> =
            self.states.keys().filter(|rid| !current.contains(rid)).cloned().collect();
        gone.into_iter().filter(|rid| self.mark_orphan(rid)).collect()
    }

    /// Drop every orphan, returning how many were dropped
    pub fn purge_orphans(&mut self) -> usize {
        let purged = self.orphans.len();
        self.orphans.clear();
        purged
    }

    /// Needs a deploy: dirty compliance, or events from a requirement it
    /// has not yet deployed after
    pub fn is_dirty(&self, resource: &ResourceId) -> bool {
        self.states.get(resource).is_some_and(|s| s.is_dirty())
            || self.has_outstanding_events(resource)
    }
}

#[cfg(test)]
impl ResourceModel {
    /// Model tracking every resource of `version` with fresh state
    pub(crate) fn for_version(version: &ModelVersion) -> Self {
        let mut model = Self::new();
        for intent in version.resources.values() {
            model.mark_new_intent(intent.clone(), version.is_undefined(&intent.id));
        }
        model.recompute_hard_blocks();
        model.set_version(version.version);
        model
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
