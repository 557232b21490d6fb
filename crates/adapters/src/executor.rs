// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The executor seam: whatever actually runs a resource handler.

use async_trait::async_trait;
use cv_core::{
    ActionId, DeployReport, DryRunId, DryrunReport, FactReport, ResourceId, ResourceIntent,
    ResourceStatus, ResourceVersionId,
};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from executor calls. The scheduler records every one of these as
/// a failed deploy; none of them stop the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("agent {0} is unreachable")]
    Unreachable(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("no executor registered for entity type {0}")]
    NoHandler(String),
    #[error("cancelled")]
    Cancelled,
    #[error("executor failed: {0}")]
    Failed(String),
}

/// Last known status of each requirement
pub type RequirementStatuses = BTreeMap<ResourceId, ResourceStatus>;

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub action_id: ActionId,
    pub rvid: ResourceVersionId,
    pub intent: ResourceIntent,
    pub requires: RequirementStatuses,
    /// Forced re-deploy of a resource believed compliant
    pub repair: bool,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct DryRunRequest {
    pub dryrun_id: DryRunId,
    pub rvid: ResourceVersionId,
    pub intent: ResourceIntent,
}

#[derive(Debug, Clone)]
pub struct FactRequest {
    pub resource_id: ResourceId,
    pub intent: ResourceIntent,
}

/// Runs handlers for resources.
///
/// Every call carries a cancellation token; implementations should return
/// [`ExecutorError::Cancelled`] promptly once it fires.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn deploy(
        &self,
        request: DeployRequest,
        cancel: CancellationToken,
    ) -> Result<DeployReport, ExecutorError>;

    async fn dry_run(
        &self,
        request: DryRunRequest,
        cancel: CancellationToken,
    ) -> Result<DryrunReport, ExecutorError>;

    async fn get_facts(
        &self,
        request: FactRequest,
        cancel: CancellationToken,
    ) -> Result<FactReport, ExecutorError>;
}
