// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The state persistence seam consumed by the scheduler

use crate::records::ResourceRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cv_core::{
    ActionId, DeployReport, DryrunReport, EnvironmentId, FactReport, ModelVersion, ResourceId,
    ResourceIntent, ResourceState, ResourceStatus, ResourceVersionId,
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Transient status reported as final, or an escape from a terminal state
    #[error("invalid status transition: {0}")]
    InvalidTransition(String),
    #[error("action {0} already finished")]
    DoubleCompletion(ActionId),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transaction failed: {0}")]
    TransactionFailed(String),
    #[error("unsupported checkpoint version {0}")]
    UnsupportedCheckpoint(u32),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PersistenceError {
    /// Caller mistakes surfaced as client errors, never retried
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PersistenceError::InvalidTransition(_)
                | PersistenceError::DoubleCompletion(_)
                | PersistenceError::NotFound(_)
        )
    }
}

/// Finished deploy as recorded by `send_deploy_done`.
///
/// `state` is `None` for a stale deploy: only the attempt's result and
/// timestamps are recorded, compliance is left alone.
#[derive(Debug, Clone)]
pub struct DeployDone {
    pub attribute_hash: String,
    pub report: DeployReport,
    pub state: Option<ResourceState>,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

/// Operator switches that stop dispatching without touching resource state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    /// The whole environment is halted
    pub halted: bool,
    /// Agents whose work is held back
    pub paused_agents: BTreeSet<String>,
}

/// Intent upserts keyed by resource
pub type IntentUpdates = BTreeMap<ResourceId, (ResourceState, ResourceIntent)>;

/// Last known status of each requirement, handed to the executor
pub type DependencyStatuses = BTreeMap<ResourceId, ResourceStatus>;

/// A rollback-capable unit of work. Nothing is visible to readers until
/// `commit` succeeds; dropping without committing discards every staged
/// change.
#[async_trait]
pub trait StateTransaction: Send {
    async fn update_resource_intent(
        &mut self,
        env: &EnvironmentId,
        version: u64,
        updates: IntentUpdates,
        update_blocked_state: bool,
    ) -> Result<(), PersistenceError>;

    /// Orphan every resource no released version at or after
    /// `current_version` still references. Evaluated at commit time.
    async fn mark_all_orphans(
        &mut self,
        env: &EnvironmentId,
        current_version: u64,
    ) -> Result<(), PersistenceError>;

    async fn mark_as_orphan(
        &mut self,
        env: &EnvironmentId,
        resources: &[ResourceId],
    ) -> Result<(), PersistenceError>;

    async fn set_last_processed_model_version(
        &mut self,
        env: &EnvironmentId,
        version: u64,
    ) -> Result<(), PersistenceError>;

    async fn commit(&mut self) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait StatePersistence: Send + Sync + 'static {
    type Transaction: StateTransaction + 'static;

    async fn get_connection(&self) -> Result<Self::Transaction, PersistenceError>;

    /// Durably mark a deploy as started. Atomic: an error means nothing was
    /// recorded. Returns the statuses of the resource's requirements.
    async fn send_in_progress(
        &self,
        env: &EnvironmentId,
        action_id: &ActionId,
        rvid: &ResourceVersionId,
        started: DateTime<Utc>,
    ) -> Result<DependencyStatuses, PersistenceError>;

    async fn send_deploy_done(
        &self,
        env: &EnvironmentId,
        done: DeployDone,
    ) -> Result<(), PersistenceError>;

    async fn dryrun_update(
        &self,
        env: &EnvironmentId,
        report: DryrunReport,
    ) -> Result<(), PersistenceError>;

    async fn set_parameters(
        &self,
        env: &EnvironmentId,
        report: &FactReport,
    ) -> Result<(), PersistenceError>;

    /// Released versions newer than `after`, oldest first
    async fn released_versions_since(
        &self,
        env: &EnvironmentId,
        after: u64,
    ) -> Result<Vec<ModelVersion>, PersistenceError>;

    async fn get_version(
        &self,
        env: &EnvironmentId,
        version: u64,
    ) -> Result<Option<ModelVersion>, PersistenceError>;

    async fn load_resources(
        &self,
        env: &EnvironmentId,
    ) -> Result<Vec<ResourceRecord>, PersistenceError>;

    async fn last_processed_version(
        &self,
        env: &EnvironmentId,
    ) -> Result<Option<u64>, PersistenceError>;

    /// Halt and pause flags. Storage is authoritative for them.
    async fn run_state(&self, env: &EnvironmentId) -> Result<RunState, PersistenceError>;

    async fn set_agent_paused(
        &self,
        env: &EnvironmentId,
        agent: &str,
        paused: bool,
    ) -> Result<(), PersistenceError>;

    async fn set_halted(&self, env: &EnvironmentId, halted: bool) -> Result<(), PersistenceError>;
}
