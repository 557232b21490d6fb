// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work Queue: pending tasks in priority order plus in-flight bookkeeping.
//!
//! At most one pending task per (resource, kind). A pending deploy and a
//! pending repair of one resource are merged into the repair. Deploy-class
//! tasks hold the resource's exclusive slot while in flight.

use cv_core::{ResourceId, SchedulerConfig, Task, TaskKey, TaskKind, TaskPriority};
use std::collections::{BTreeMap, HashMap, HashSet};

/// What `enqueue` did with a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// An equivalent pending task was made more urgent
    Promoted,
    /// An equivalent task was already pending at the same or higher urgency
    Duplicate,
}

#[derive(Debug, Clone)]
struct Pending {
    task: Task,
    seq: u64,
}

#[derive(Debug, Clone)]
struct Running {
    agent: String,
    /// Intent hash applied by a deploy or repair
    attribute_hash: Option<String>,
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    pending: HashMap<TaskKey, Pending>,
    order: BTreeMap<(TaskPriority, u64), TaskKey>,
    in_flight: HashMap<TaskKey, Running>,
    slots: HashSet<ResourceId>,
    per_agent: HashMap<String, usize>,
    seq: u64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `task`, deduplicating against pending work.
    ///
    /// Re-enqueueing never lowers urgency: an equivalent pending task keeps
    /// its place in line and takes the more urgent priority (and reason).
    pub fn enqueue(&mut self, task: Task) -> Enqueued {
        let sibling = match task.key.kind {
            TaskKind::Deploy => Some(TaskKey::new(task.key.resource.clone(), TaskKind::Repair)),
            TaskKind::Repair => Some(TaskKey::deploy(task.key.resource.clone())),
            _ => None,
        };

        // A repair covers a deploy: fold the two together
        if let Some(sibling) = sibling.filter(|k| self.pending.contains_key(k)) {
            if task.key.kind == TaskKind::Deploy {
                return self.promote(&sibling, task.priority, task.reason);
            }
            if let Some(old) = self.remove_pending(&sibling) {
                let priority = task.priority.min(old.task.priority);
                let reason =
                    if task.priority <= old.task.priority { task.reason } else { old.task.reason };
                self.insert(Task::new(task.key, priority, reason), old.seq);
                return Enqueued::Promoted;
            }
        }

        if self.pending.contains_key(&task.key) {
            let key = task.key.clone();
            return self.promote(&key, task.priority, task.reason);
        }

        self.seq += 1;
        let seq = self.seq;
        tracing::debug!(
            task = %task.key,
            priority = %task.priority,
            reason = %task.reason,
            "queued task"
        );
        self.insert(task, seq);
        Enqueued::Queued
    }

    fn insert(&mut self, task: Task, seq: u64) {
        self.order.insert((task.priority, seq), task.key.clone());
        self.pending.insert(task.key.clone(), Pending { task, seq });
    }

    fn remove_pending(&mut self, key: &TaskKey) -> Option<Pending> {
        let pending = self.pending.remove(key)?;
        self.order.remove(&(pending.task.priority, pending.seq));
        Some(pending)
    }

    fn promote(&mut self, key: &TaskKey, priority: TaskPriority, reason: String) -> Enqueued {
        let Some(pending) = self.pending.get_mut(key) else {
            return Enqueued::Duplicate;
        };
        if !priority.is_more_urgent_than(pending.task.priority) {
            return Enqueued::Duplicate;
        }
        self.order.remove(&(pending.task.priority, pending.seq));
        tracing::debug!(
            task = %key,
            from = %pending.task.priority,
            to = %priority,
            "promoted task"
        );
        pending.task.priority = priority;
        pending.task.reason = reason;
        self.order.insert((priority, pending.seq), key.clone());
        Enqueued::Promoted
    }

    /// Pending tasks, most urgent first, FIFO within a priority
    pub fn ordered(&self) -> Vec<Task> {
        self.order
            .values()
            .filter_map(|k| self.pending.get(k))
            .map(|p| p.task.clone())
            .collect()
    }

    pub fn task(&self, key: &TaskKey) -> Option<&Task> {
        self.pending.get(key).map(|p| &p.task)
    }

    pub fn is_pending(&self, key: &TaskKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn is_running(&self, key: &TaskKey) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Hash applied by the in-flight deploy or repair of `resource`
    pub fn running_hash(&self, resource: &ResourceId) -> Option<&str> {
        [TaskKey::deploy(resource.clone()), TaskKey::new(resource.clone(), TaskKind::Repair)]
            .iter()
            .find_map(|k| self.in_flight.get(k))
            .and_then(|r| r.attribute_hash.as_deref())
    }

    /// A deploy or repair of `resource` is pending or in flight
    pub fn is_scheduled(&self, resource: &ResourceId) -> bool {
        [TaskKey::deploy(resource.clone()), TaskKey::new(resource.clone(), TaskKind::Repair)]
            .iter()
            .any(|k| self.pending.contains_key(k) || self.in_flight.contains_key(k))
    }

    /// The resource's exclusive deploy slot is taken
    pub fn slot_busy(&self, resource: &ResourceId) -> bool {
        self.slots.contains(resource)
    }

    /// Whether `task` may start now under the slot and concurrency limits
    pub fn can_start(&self, task: &Task, config: &SchedulerConfig) -> bool {
        if task.key.kind.is_deploy_class() && self.slot_busy(task.resource()) {
            return false;
        }
        if config.max_concurrency.is_some_and(|max| self.in_flight.len() >= max) {
            return false;
        }
        let running = self.per_agent.get(task.agent()).copied().unwrap_or(0);
        running < config.agent_concurrency(task.agent()).max(1)
    }

    /// Move a pending task in flight, taking its slot. This is the deploy
    /// pipeline's QUEUED -> IN_PROGRESS step.
    pub fn mark_started(&mut self, key: &TaskKey, attribute_hash: Option<String>) -> Option<Task> {
        let pending = self.remove_pending(key)?;
        let agent = pending.task.agent().to_string();
        if key.kind.is_deploy_class() {
            self.slots.insert(key.resource.clone());
        }
        *self.per_agent.entry(agent.clone()).or_default() += 1;
        self.in_flight.insert(key.clone(), Running { agent, attribute_hash });
        Some(pending.task)
    }

    /// Release the slot and counters of a finished task
    pub fn finish(&mut self, key: &TaskKey) -> bool {
        let Some(running) = self.in_flight.remove(key) else {
            return false;
        };
        if key.kind.is_deploy_class() {
            self.slots.remove(&key.resource);
        }
        if let Some(n) = self.per_agent.get_mut(&running.agent) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.per_agent.remove(&running.agent);
            }
        }
        true
    }

    /// Drop a pending task
    pub fn remove(&mut self, key: &TaskKey) -> Option<Task> {
        self.remove_pending(key).map(|p| p.task)
    }

    /// Drop the pending deploy, repair and fact tasks of `resource`.
    /// Dry runs are kept.
    pub fn drop_deploys(&mut self, resource: &ResourceId) -> usize {
        let keys: Vec<TaskKey> = [TaskKind::Deploy, TaskKind::Repair, TaskKind::GetFact]
            .into_iter()
            .map(|kind| TaskKey::new(resource.clone(), kind))
            .filter(|k| self.pending.contains_key(k))
            .collect();
        for key in &keys {
            self.remove_pending(key);
        }
        if !keys.is_empty() {
            tracing::debug!(%resource, dropped = keys.len(), "dropped pending tasks");
        }
        keys.len()
    }

    /// Drop every pending task
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.order.clear();
        dropped
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn in_flight_keys(&self) -> Vec<TaskKey> {
        self.in_flight.keys().cloned().collect()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }
}

#[cfg(test)]
#[path = "work_tests.rs"]
mod tests;
