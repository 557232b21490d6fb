// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Version Intake: diff a released version against the tracked model.
//!
//! Planning is pure. The scheduler persists the plan's updates first and
//! only then swaps in the planned model.

use crate::error::IntakeError;
use crate::graph::DependencyGraph;
use crate::model::{BlockChanges, ResourceModel};
use cv_core::{ModelVersion, ResourceId};
use cv_storage::IntentUpdates;
use std::collections::BTreeSet;

/// The outcome of reconciling the model to one released version
#[derive(Debug, Clone)]
pub struct IntakePlan {
    pub version: u64,
    /// Model after the version is taken in
    pub model: ResourceModel,
    /// Intent and state rows to upsert
    pub updates: IntentUpdates,
    /// Tracked resources the version no longer defines
    pub deleted: Vec<ResourceId>,
    /// Resources that got a new intent, in version order
    pub changed: Vec<ResourceId>,
    pub blocks: BlockChanges,
}

/// Reject versions whose requires-edges point outside the version or loop
pub fn validate(version: &ModelVersion) -> Result<(), IntakeError> {
    for intent in version.resources.values() {
        if let Some(missing) = intent.requires.iter().find(|req| !version.contains(req)) {
            return Err(IntakeError::UnknownRequirement {
                version: version.version,
                resource: intent.id.clone(),
                requirement: missing.clone(),
            });
        }
    }
    match DependencyGraph::from_version(version).find_cycle() {
        Some(resource) => Err(IntakeError::Cycle(resource)),
        None => Ok(()),
    }
}

/// Plan the move from `current` to `newest`.
///
/// `intermediates` are the released versions between the last processed
/// one and `newest`. A resource one of them dropped is treated as new even
/// when `newest` brings it back unchanged.
pub fn plan_intake(
    current: &ResourceModel,
    newest: &ModelVersion,
    intermediates: &[ModelVersion],
) -> Result<IntakePlan, IntakeError> {
    validate(newest)?;

    let mut model = current.clone();
    let deleted = model.mark_orphans_bulk(newest);

    let mut changed = Vec::new();
    for (rid, intent) in &newest.resources {
        let undefined = newest.is_undefined(rid);
        let dropped_between = intermediates.iter().any(|v| !v.contains(rid));
        if dropped_between {
            tracing::debug!(resource = %rid, "resource re-added after deletion");
            model.reset_intent(intent.clone(), undefined);
        } else if model.intent(rid) != Some(intent) || model.is_undefined(rid) != undefined {
            model.mark_new_intent(intent.clone(), undefined);
        } else {
            continue;
        }
        changed.push(rid.clone());
    }

    let blocks = model.recompute_hard_blocks();
    model.set_version(newest.version);

    let touched: BTreeSet<&ResourceId> = changed
        .iter()
        .chain(blocks.newly_blocked.iter())
        .chain(blocks.unblocked.iter())
        .collect();
    let updates: IntentUpdates = touched
        .into_iter()
        .filter_map(|rid| {
            let state = model.state(rid)?.clone();
            let intent = model.intent(rid)?.clone();
            Some((rid.clone(), (state, intent)))
        })
        .collect();

    tracing::info!(
        version = newest.version,
        changed = changed.len(),
        deleted = deleted.len(),
        blocked = blocks.newly_blocked.len(),
        unblocked = blocks.unblocked.len(),
        "planned version intake"
    );
    Ok(IntakePlan { version: newest.version, model, updates, deleted, changed, blocks })
}

#[cfg(test)]
#[path = "intake_tests.rs"]
mod tests;
