// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-resource live state as tracked by the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the current intent has been successfully applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compliance {
    Compliant,
    /// Intent changed since the last deploy attempt
    HasUpdate,
    /// The last deploy attempt for the current intent did not succeed
    NonCompliant,
    /// The intent itself can not be deployed
    Undefined,
}

impl Compliance {
    /// Needs a deploy to become compliant
    pub fn is_dirty(self) -> bool {
        matches!(self, Compliance::HasUpdate | Compliance::NonCompliant)
    }
}

crate::simple_display! {
    Compliance {
        Compliant => "compliant",
        HasUpdate => "has_update",
        NonCompliant => "non_compliant",
        Undefined => "undefined",
    }
}

/// Blocking status of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blocked {
    NotBlocked,
    /// Waiting on a dependency's normal deploy to succeed
    TemporarilyBlocked,
    /// Undefined, or depends (transitively) on an undefined resource
    Blocked,
}

impl Blocked {
    /// Value as persisted. Temporary blocks are not durable and come back
    /// as `NotBlocked` after a restart.
    pub fn db_value(self) -> Blocked {
        match self {
            Blocked::TemporarilyBlocked => Blocked::NotBlocked,
            other => other,
        }
    }
}

crate::simple_display! {
    Blocked {
        NotBlocked => "not_blocked",
        TemporarilyBlocked => "temporarily_blocked",
        Blocked => "blocked",
    }
}

/// Outcome of the most recent completed deploy attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployResult {
    New,
    Deployed,
    Failed,
    Skipped,
}

crate::simple_display! {
    DeployResult {
        New => "new",
        Deployed => "deployed",
        Failed => "failed",
        Skipped => "skipped",
    }
}

/// Status reported by a handler for a single resource action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerResult {
    Deployed,
    Skipped,
    SkippedForDependency,
    Failed,
    Unavailable,
    Cancelled,
    Undefined,
    /// In progress; never valid as a final status
    Deploying,
    /// Dry-run finished
    Dry,
}

impl HandlerResult {
    pub fn is_transient(self) -> bool {
        matches!(self, HandlerResult::Deploying)
    }

    /// Deploy result recorded for this handler outcome, `None` for statuses
    /// that do not finish a deploy.
    pub fn deploy_result(self) -> Option<DeployResult> {
        match self {
            HandlerResult::Deployed => Some(DeployResult::Deployed),
            HandlerResult::Skipped
            | HandlerResult::SkippedForDependency
            | HandlerResult::Undefined => Some(DeployResult::Skipped),
            HandlerResult::Failed | HandlerResult::Unavailable | HandlerResult::Cancelled => {
                Some(DeployResult::Failed)
            }
            HandlerResult::Deploying | HandlerResult::Dry => None,
        }
    }
}

crate::simple_display! {
    HandlerResult {
        Deployed => "deployed",
        Skipped => "skipped",
        SkippedForDependency => "skipped_for_dependency",
        Failed => "failed",
        Unavailable => "unavailable",
        Cancelled => "cancelled",
        Undefined => "undefined",
        Deploying => "deploying",
        Dry => "dry",
    }
}

/// What a deploy changed on the managed side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    #[default]
    #[serde(rename = "nochange")]
    NoChange,
    Created,
    Purged,
    Updated,
}

crate::simple_display! {
    Change {
        NoChange => "nochange",
        Created => "created",
        Purged => "purged",
        Updated => "updated",
    }
}

/// Status of a resource as presented to handlers and status readers:
/// the compact view over compliance, blocking and last result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Undefined,
    /// Blocked because an (indirect) requirement is undefined
    SkippedForUndefined,
    /// Never deployed for the current intent
    Available,
    Deployed,
    Failed,
    Skipped,
}

crate::simple_display! {
    ResourceStatus {
        Undefined => "undefined",
        SkippedForUndefined => "skipped_for_undefined",
        Available => "available",
        Deployed => "deployed",
        Failed => "failed",
        Skipped => "skipped",
    }
}

/// The scheduler's live view of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    pub compliance: Compliance,
    pub blocked: Blocked,
    pub last_deploy_result: DeployResult,
    /// End of the last completed deploy attempt
    pub last_deployed: Option<DateTime<Utc>>,
    /// Start of the last successful deploy
    pub last_success: Option<DateTime<Utc>>,
    /// End of the last deploy that changed something on the managed side
    pub last_produced_events: Option<DateTime<Utc>>,
    /// Attribute hash of the intent the last non-stale deploy applied
    pub last_deployed_hash: Option<String>,
    pub last_handler_run_compliant: Option<bool>,
    #[serde(default)]
    pub is_orphan: bool,
}

impl ResourceState {
    /// State of a resource seen for the first time
    pub fn new(undefined: bool) -> Self {
        let (compliance, blocked) = if undefined {
            (Compliance::Undefined, Blocked::Blocked)
        } else {
            (Compliance::HasUpdate, Blocked::NotBlocked)
        };
        Self {
            compliance,
            blocked,
            last_deploy_result: DeployResult::New,
            last_deployed: None,
            last_success: None,
            last_produced_events: None,
            last_deployed_hash: None,
            last_handler_run_compliant: None,
            is_orphan: false,
        }
    }

    /// Record the result and timestamps of a finished attempt. Compliance
    /// and blocking are left alone; stale results stop here.
    pub fn record_attempt(
        &mut self,
        status: HandlerResult,
        change: Change,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    ) {
        if let Some(result) = status.deploy_result() {
            self.last_deploy_result = result;
        }
        self.last_deployed = Some(finished);
        if status == HandlerResult::Deployed {
            self.last_success = Some(started);
        }
        if change != Change::NoChange {
            self.last_produced_events = Some(finished);
        }
    }

    /// Should be picked up by an environment-wide deploy
    pub fn is_dirty(&self) -> bool {
        self.blocked == Blocked::NotBlocked && self.compliance.is_dirty()
    }

    pub fn status(&self) -> ResourceStatus {
        if self.compliance == Compliance::Undefined {
            return ResourceStatus::Undefined;
        }
        if self.blocked == Blocked::Blocked {
            return ResourceStatus::SkippedForUndefined;
        }
        if self.compliance == Compliance::HasUpdate {
            return ResourceStatus::Available;
        }
        match self.last_deploy_result {
            DeployResult::New => ResourceStatus::Available,
            DeployResult::Deployed => ResourceStatus::Deployed,
            DeployResult::Failed => ResourceStatus::Failed,
            DeployResult::Skipped => ResourceStatus::Skipped,
        }
    }
}

crate::builder! {
    pub struct ResourceStateBuilder => ResourceState {
        set {
            compliance: Compliance = Compliance::HasUpdate,
            blocked: Blocked = Blocked::NotBlocked,
            last_deploy_result: DeployResult = DeployResult::New,
            last_deployed: Option<DateTime<Utc>> = None,
            last_success: Option<DateTime<Utc>> = None,
            last_produced_events: Option<DateTime<Utc>> = None,
            last_deployed_hash: Option<String> = None,
            last_handler_run_compliant: Option<bool> = None,
            is_orphan: bool = false,
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
