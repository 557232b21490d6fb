// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Units of scheduled work.

use crate::id::DryRunId;
use crate::resource::ResourceId;
use serde::{Deserialize, Serialize};

/// Queue priority, declared from most to least urgent.
///
/// The derived `Ord` makes a smaller value more urgent, so `min()` of two
/// priorities is the one to keep on promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    UserDeploy,
    UserRepair,
    DryRun,
    IntervalDeploy,
    FactRefresh,
    IntervalRepair,
    NewVersionDeploy,
}

impl TaskPriority {
    pub fn is_more_urgent_than(self, other: TaskPriority) -> bool {
        self < other
    }
}

crate::simple_display! {
    TaskPriority {
        UserDeploy => "user_deploy",
        UserRepair => "user_repair",
        DryRun => "dryrun",
        IntervalDeploy => "interval_deploy",
        FactRefresh => "fact_refresh",
        IntervalRepair => "interval_repair",
        NewVersionDeploy => "new_version_deploy",
    }
}

/// What a task does for its resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Deploy,
    Repair,
    DryRun(DryRunId),
    GetFact,
}

impl TaskKind {
    /// Occupies the resource's exclusive deploy slot while running
    pub fn is_deploy_class(&self) -> bool {
        !matches!(self, TaskKind::GetFact)
    }

    /// Applies the current intent (deploy or repair)
    pub fn applies_intent(&self) -> bool {
        matches!(self, TaskKind::Deploy | TaskKind::Repair)
    }
}

crate::simple_display! {
    TaskKind {
        Deploy => "deploy",
        Repair => "repair",
        DryRun(..) => "dryrun",
        GetFact => "get_fact",
    }
}

/// Deduplication key: at most one pending task per (resource, kind)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub resource: ResourceId,
    pub kind: TaskKind,
}

impl TaskKey {
    pub fn new(resource: impl Into<ResourceId>, kind: TaskKind) -> Self {
        Self { resource: resource.into(), kind }
    }

    pub fn deploy(resource: impl Into<ResourceId>) -> Self {
        Self::new(resource, TaskKind::Deploy)
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.resource)
    }
}

/// A task together with why and how urgently it was requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub key: TaskKey,
    pub priority: TaskPriority,
    pub reason: String,
}

impl Task {
    pub fn new(key: TaskKey, priority: TaskPriority, reason: impl Into<String>) -> Self {
        Self { key, priority, reason: reason.into() }
    }

    pub fn resource(&self) -> &ResourceId {
        &self.key.resource
    }

    pub fn agent(&self) -> &str {
        self.key.resource.agent_name()
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
