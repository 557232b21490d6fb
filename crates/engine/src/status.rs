// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler status: in-memory state checked against persisted records

use crate::model::ResourceModel;
use cv_core::{Blocked, Compliance, DeployResult, ResourceId, ResourceState};
use cv_storage::ResourceRecord;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One way the scheduler's view of a resource differs from the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// Tracked in memory, never persisted
    MissingRecord { resource: ResourceId },
    Compliance { resource: ResourceId, memory: Compliance, persisted: Compliance },
    Blocked { resource: ResourceId, memory: Blocked, persisted: Blocked },
    LastResult { resource: ResourceId, memory: DeployResult, persisted: DeployResult },
    /// A persisted resource memory does not know counts as orphaned there
    Orphan { resource: ResourceId, memory: bool, persisted: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub model_version: Option<u64>,
    pub persisted_version: Option<u64>,
    pub discrepancies: Vec<Discrepancy>,
    pub queued: usize,
    pub in_flight: usize,
    pub timers: usize,
}

impl StatusReport {
    pub fn is_consistent(&self) -> bool {
        self.model_version == self.persisted_version && self.discrepancies.is_empty()
    }
}

/// Every discrepancy between `model` and `records`, in resource order
pub fn compare(model: &ResourceModel, records: &[ResourceRecord]) -> Vec<Discrepancy> {
    let persisted: BTreeMap<&ResourceId, &ResourceState> =
        records.iter().map(|r| (&r.resource_id, &r.state)).collect();
    let in_memory: BTreeMap<&ResourceId, &ResourceState> = model
        .resources()
        .chain(model.orphans().map(|(rid, orphan)| (rid, &orphan.state)))
        .collect();

    let ids: BTreeSet<&ResourceId> = persisted.keys().chain(in_memory.keys()).copied().collect();
    let mut found = Vec::new();
    for rid in ids {
        match (in_memory.get(rid), persisted.get(rid)) {
            (Some(memory), Some(stored)) => diff_state(rid, memory, stored, &mut found),
            (Some(_), None) => found.push(Discrepancy::MissingRecord { resource: rid.clone() }),
            (None, Some(stored)) if !stored.is_orphan => found.push(Discrepancy::Orphan {
                resource: rid.clone(),
                memory: true,
                persisted: false,
            }),
            _ => {}
        }
    }
    found
}

fn diff_state(
    rid: &ResourceId,
    memory: &ResourceState,
    stored: &ResourceState,
    found: &mut Vec<Discrepancy>,
) {
    let resource = || rid.clone();
    if memory.compliance != stored.compliance {
        found.push(Discrepancy::Compliance {
            resource: resource(),
            memory: memory.compliance,
            persisted: stored.compliance,
        });
    }
    // Temporary blocks are never persisted
    if memory.blocked.db_value() != stored.blocked {
        found.push(Discrepancy::Blocked {
            resource: resource(),
            memory: memory.blocked,
            persisted: stored.blocked,
        });
    }
    if memory.last_deploy_result != stored.last_deploy_result {
        found.push(Discrepancy::LastResult {
            resource: resource(),
            memory: memory.last_deploy_result,
            persisted: stored.last_deploy_result,
        });
    }
    if memory.is_orphan != stored.is_orphan {
        found.push(Discrepancy::Orphan {
            resource: resource(),
            memory: memory.is_orphan,
            persisted: stored.is_orphan,
        });
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
