// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reports returned by executors for deploy, dry-run and fact actions.

use crate::id::{ActionId, DryRunId};
use crate::resource::{ResourceId, ResourceVersionId};
use crate::state::{Change, HandlerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

crate::simple_display! {
    LogLevel {
        Debug => "debug",
        Info => "info",
        Warning => "warning",
        Error => "error",
    }
}

/// One line of a resource action log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub msg: String,
    pub timestamp: DateTime<Utc>,
}

impl LogLine {
    pub fn new(level: LogLevel, msg: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { level, msg: msg.into(), timestamp }
    }
}

/// Per-attribute change: `{"current": .., "desired": ..}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub current: Value,
    pub desired: Value,
}

pub type Changes = BTreeMap<String, AttributeChange>;

/// Outcome of one deploy action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
    pub action_id: ActionId,
    pub rvid: ResourceVersionId,
    pub status: HandlerResult,
    #[serde(default)]
    pub change: Change,
    #[serde(default)]
    pub changes: Changes,
    #[serde(default)]
    pub messages: Vec<LogLine>,
}

impl DeployReport {
    pub fn new(action_id: ActionId, rvid: ResourceVersionId, status: HandlerResult) -> Self {
        Self {
            action_id,
            rvid,
            status,
            change: Change::NoChange,
            changes: Changes::new(),
            messages: Vec::new(),
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.rvid.resource_id()
    }

    pub fn with_change(mut self, change: Change) -> Self {
        self.change = change;
        self
    }

    pub fn with_message(mut self, line: LogLine) -> Self {
        self.messages.push(line);
        self
    }
}

/// Outcome of a dry-run for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryrunReport {
    pub dryrun_id: DryRunId,
    pub rvid: ResourceVersionId,
    pub status: HandlerResult,
    #[serde(default)]
    pub changes: Changes,
    #[serde(default)]
    pub messages: Vec<LogLine>,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

impl DryrunReport {
    /// Report recorded for resources that can not be dry-run at all
    pub fn undeployable(dryrun_id: DryRunId, rvid: ResourceVersionId, at: DateTime<Utc>) -> Self {
        let mut changes = Changes::new();
        changes.insert(
            "handler".to_string(),
            AttributeChange {
                current: Value::String("FAILED".to_string()),
                desired: Value::String("Resource is in an undeployable state".to_string()),
            },
        );
        Self {
            dryrun_id,
            rvid,
            status: HandlerResult::Failed,
            changes,
            messages: Vec::new(),
            started: at,
            finished: at,
        }
    }
}

/// Facts (parameters) discovered for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactReport {
    pub resource_id: ResourceId,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<LogLine>,
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
