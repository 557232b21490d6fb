// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Requires-edges between tracked resources.
//!
//! Forward edges (resource -> requirement) are authoritative and replaced
//! wholesale per resource. The dependents index is derived from them.

use cv_core::{ModelVersion, ResourceId};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    requires: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

static NO_EDGES: BTreeSet<ResourceId> = BTreeSet::new();

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph of every resource in `version`
    pub fn from_version(version: &ModelVersion) -> Self {
        let mut graph = Self::new();
        for intent in version.resources.values() {
            graph.set_requires(&intent.id, intent.requires.clone());
        }
        graph
    }

    /// Replace the requirements of `resource`
    pub fn set_requires(&mut self, resource: &ResourceId, requires: BTreeSet<ResourceId>) {
        self.unlink(resource);
        for req in &requires {
            self.dependents.entry(req.clone()).or_default().insert(resource.clone());
        }
        self.requires.insert(resource.clone(), requires);
    }

    /// Drop the forward edges of `resource`. Edges other resources hold
    /// towards it stay until those resources are updated.
    pub fn remove(&mut self, resource: &ResourceId) {
        self.unlink(resource);
        self.requires.remove(resource);
    }

    fn unlink(&mut self, resource: &ResourceId) {
        let Some(old) = self.requires.get(resource) else {
            return;
        };
        for req in old {
            if let Some(deps) = self.dependents.get_mut(req) {
                deps.remove(resource);
                if deps.is_empty() {
                    self.dependents.remove(req);
                }
            }
        }
    }

    pub fn requires_of(&self, resource: &ResourceId) -> &BTreeSet<ResourceId> {
        self.requires.get(resource).unwrap_or(&NO_EDGES)
    }

    pub fn dependents_of(&self, resource: &ResourceId) -> &BTreeSet<ResourceId> {
        self.dependents.get(resource).unwrap_or(&NO_EDGES)
    }

    /// `roots` plus everything that transitively depends on them
    pub fn closure<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a ResourceId>,
    ) -> BTreeSet<ResourceId> {
        let mut seen: BTreeSet<ResourceId> = BTreeSet::new();
        let mut queue: VecDeque<ResourceId> = VecDeque::new();
        for root in roots {
            if seen.insert(root.clone()) {
                queue.push_back(root.clone());
            }
        }
        while let Some(next) = queue.pop_front() {
            for dep in self.dependents_of(&next) {
                if seen.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
        }
        seen
    }

    /// Some resource on a requires cycle, if there is one
    pub fn find_cycle(&self) -> Option<ResourceId> {
        let mut done: HashSet<&ResourceId> = HashSet::new();
        for start in self.requires.keys() {
            if done.contains(start) {
                continue;
            }
            // Iterative DFS; `path` holds the resources on the current stack
            let mut path: HashSet<&ResourceId> = HashSet::new();
            let mut stack: Vec<(&ResourceId, Vec<&ResourceId>)> =
                vec![(start, self.requires_of(start).iter().collect())];
            path.insert(start);
            while let Some((node, children)) = stack.last_mut() {
                match children.pop() {
                    Some(child) if path.contains(child) => return Some(child.clone()),
                    Some(child) if done.contains(child) => {}
                    Some(child) => {
                        path.insert(child);
                        stack.push((child, self.requires_of(child).iter().collect()));
                    }
                    None => {
                        let node = *node;
                        path.remove(node);
                        done.insert(node);
                        stack.pop();
                    }
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.requires.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requires.is_empty()
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
