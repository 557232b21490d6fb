// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cv-engine: Resource scheduling for the converge deployment scheduler.
//!
//! One [`ResourceScheduler`] per environment takes in released model
//! versions, tracks per-resource state, and drives deploys, repairs, dry
//! runs and fact refreshes through an [`cv_adapters::Executor`].

mod error;
mod graph;
mod intake;
mod model;
mod scheduler;
mod status;
mod timers;
mod work;

pub use error::{IntakeError, SchedulerError};
pub use graph::DependencyGraph;
pub use intake::{plan_intake, validate, IntakePlan};
pub use model::{BlockChanges, DeployOutcome, DeployTransition, Orphan, ResourceModel};
pub use scheduler::{Command, ResourceScheduler, SchedulerDeps, SchedulerHandle};
pub use status::{Discrepancy, StatusReport};
pub use timers::{ResourceTimer, TimerFire, TimerKind, TimerManager};
pub use work::{Enqueued, WorkQueue};
