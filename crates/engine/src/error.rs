// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error types

use cv_core::ResourceId;
use cv_storage::PersistenceError;
use thiserror::Error;

/// Why a released version can not be taken in
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("version {version}: {resource} requires unknown resource {requirement}")]
    UnknownRequirement { version: u64, resource: ResourceId, requirement: ResourceId },
    #[error("requires cycle through {0}")]
    Cycle(ResourceId),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Intake(#[from] IntakeError),
    #[error("unknown resource: {0}")]
    UnknownResource(ResourceId),
    #[error("unknown version: {0}")]
    UnknownVersion(u64),
    #[error("invalid transition for {resource}: {reason}")]
    InvalidTransition { resource: ResourceId, reason: String },
    #[error("scheduler is shut down")]
    ShutDown,
}
