// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted record shapes

use chrono::{DateTime, Utc};
use cv_core::{
    ActionId, Change, DryRunId, DryrunReport, HandlerResult, LogLine, ModelVersion, ResourceId,
    ResourceIntent, ResourceState, ResourceVersionId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One row per tracked resource: latest intent plus durable state.
///
/// `state.blocked` is stored through [`cv_core::Blocked::db_value`], so a
/// temporary block never survives a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_id: ResourceId,
    pub intent: ResourceIntent,
    pub state: ResourceState,
    /// Model version the intent was taken from
    pub model_version: u64,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

/// Lifecycle of one deploy action, from `send_in_progress` to `send_deploy_done`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAction {
    pub action_id: ActionId,
    pub rvid: ResourceVersionId,
    pub status: HandlerResult,
    #[serde(default)]
    pub change: Change,
    #[serde(default)]
    pub messages: Vec<LogLine>,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
}

impl ResourceAction {
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }
}

/// Everything persisted for one environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentData {
    /// Released model versions, by version number
    #[serde(default)]
    pub versions: BTreeMap<u64, ModelVersion>,
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, ResourceRecord>,
    pub last_processed_version: Option<u64>,
    #[serde(default)]
    pub actions: BTreeMap<ActionId, ResourceAction>,
    #[serde(default)]
    pub dryruns: BTreeMap<DryRunId, Vec<DryrunReport>>,
    #[serde(default)]
    pub halted: bool,
    #[serde(default)]
    pub paused_agents: BTreeSet<String>,
}

impl EnvironmentData {
    /// Whether any released version at or after `version` still defines `resource`
    pub fn referenced_since(&self, resource: &ResourceId, version: u64) -> bool {
        self.versions.range(version..).any(|(_, model)| model.contains(resource))
    }
}

/// The full persisted layout, keyed by environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub environments: BTreeMap<cv_core::EnvironmentId, EnvironmentData>,
}
