// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dependency Graph Tracker: block, recovery and event propagation over
//! the model's requires-edges.

use super::ResourceModel;
use cv_core::{Blocked, Compliance, DeployResult, ResourceId};
use std::collections::{BTreeSet, VecDeque};

/// Resources whose hard block changed in one recomputation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockChanges {
    pub newly_blocked: Vec<ResourceId>,
    pub unblocked: Vec<ResourceId>,
}

impl BlockChanges {
    pub fn is_empty(&self) -> bool {
        self.newly_blocked.is_empty() && self.unblocked.is_empty()
    }
}

impl ResourceModel {
    /// Undefined resources plus everything depending on one
    pub fn hard_blocked(&self) -> BTreeSet<ResourceId> {
        let roots = self
            .states
            .iter()
            .filter(|(_, s)| s.compliance == Compliance::Undefined)
            .map(|(rid, _)| rid);
        self.graph.closure(roots)
    }

    /// Bring every `blocked` flag in line with the undefined resources.
    ///
    /// Hard blocks override temporary ones. A resource that is no longer
    /// hard-blocked becomes `NotBlocked`.
    pub fn recompute_hard_blocks(&mut self) -> BlockChanges {
        let blocked = self.hard_blocked();
        let mut changes = BlockChanges::default();
        for (rid, state) in self.states.iter_mut() {
            let want = blocked.contains(rid);
            if want && state.blocked != Blocked::Blocked {
                state.blocked = Blocked::Blocked;
                changes.newly_blocked.push(rid.clone());
            } else if !want && state.blocked == Blocked::Blocked {
                state.blocked = Blocked::NotBlocked;
                changes.unblocked.push(rid.clone());
            }
        }
        if !changes.is_empty() {
            tracing::info!(
                blocked = ?changes.newly_blocked,
                unblocked = ?changes.unblocked,
                "hard blocks recomputed"
            );
        }
        changes
    }

    /// Whether a `skipped_for_dependency` outcome for `resource` is explained
    /// by a requirement that has not (yet) deployed successfully
    pub fn should_skip_for_dependencies(&self, resource: &ResourceId) -> bool {
        self.graph.requires_of(resource).iter().any(|req| {
            self.states.get(req).is_some_and(|s| {
                !matches!(s.last_deploy_result, DeployResult::Deployed | DeployResult::New)
                    || s.blocked == Blocked::TemporarilyBlocked
            })
        })
    }

    /// Temporarily block every transitive dependent of `resource` that is
    /// currently unblocked. Propagation stops at resources that are already
    /// blocked, temporarily or for good.
    pub fn propagate_temporary_block(&mut self, resource: &ResourceId) -> Vec<ResourceId> {
        let mut blocked = Vec::new();
        let mut queue: VecDeque<ResourceId> = VecDeque::from([resource.clone()]);
        while let Some(next) = queue.pop_front() {
            let dependents: Vec<ResourceId> =
                self.graph.dependents_of(&next).iter().cloned().collect();
            for dep in dependents {
                let Some(state) = self.states.get_mut(&dep) else {
                    continue;
                };
                if state.blocked != Blocked::NotBlocked {
                    continue;
                }
                state.blocked = Blocked::TemporarilyBlocked;
                blocked.push(dep.clone());
                queue.push_back(dep);
            }
        }
        if !blocked.is_empty() {
            tracing::info!(%resource, dependents = ?blocked, "temporarily blocked dependents");
        }
        blocked
    }

    /// Direct dependents of `resource` that a successful deploy of it can
    /// unblock
    pub fn recovery_candidates(&self, resource: &ResourceId) -> Vec<ResourceId> {
        self.graph
            .dependents_of(resource)
            .iter()
            .filter(|dep| {
                self.states.get(*dep).is_some_and(|s| s.blocked == Blocked::TemporarilyBlocked)
                    && !self.should_skip_for_dependencies(dep)
            })
            .cloned()
            .collect()
    }

    /// Dependents listening to events from `sender`
    pub fn event_listeners(&self, sender: &ResourceId) -> Vec<ResourceId> {
        if !self.intents.get(sender).is_some_and(|i| i.send_event) {
            return Vec::new();
        }
        self.graph
            .dependents_of(sender)
            .iter()
            .filter(|dep| {
                self.intents.get(*dep).is_some_and(|i| i.receive_events)
                    && self.states.get(*dep).is_some_and(|s| s.blocked == Blocked::NotBlocked)
            })
            .cloned()
            .collect()
    }

    /// Some event-sending requirement changed something after the last
    /// successful deploy of `resource` started
    pub fn has_outstanding_events(&self, resource: &ResourceId) -> bool {
        let (Some(intent), Some(state)) = (self.intents.get(resource), self.states.get(resource))
        else {
            return false;
        };
        if !intent.receive_events || state.blocked != Blocked::NotBlocked {
            return false;
        }
        self.graph.requires_of(resource).iter().any(|req| {
            let sends = self.intents.get(req).is_some_and(|i| i.send_event);
            let produced = self.states.get(req).and_then(|s| s.last_produced_events);
            match (sends, produced, state.last_success) {
                (true, Some(produced), Some(success)) => produced > success,
                (true, Some(_), None) => true,
                _ => false,
            }
        })
    }

    /// Whether an event wave should redeploy `resource`: it never deployed
    /// successfully, or it has outstanding events
    pub fn wants_event_deploy(&self, resource: &ResourceId) -> bool {
        match self.states.get(resource) {
            Some(state) if state.blocked == Blocked::NotBlocked => {
                state.last_success.is_none() || self.has_outstanding_events(resource)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "propagate_tests.rs"]
mod tests;
