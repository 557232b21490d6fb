// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cv-core: Core types for the converge resource deployment scheduler

pub mod macros;

pub mod clock;
pub mod config;
pub mod cron;
pub mod id;
pub mod intent;
pub mod report;
pub mod resource;
pub mod state;
pub mod task;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{AgentConfig, ConfigError, SchedulerConfig, TimerSetting};
pub use cron::{CronError, CronSchedule};
pub use id::{ActionId, DryRunId, EnvironmentId, IdGen, SequentialIdGen, UuidIdGen};
#[cfg(any(test, feature = "test-support"))]
pub use intent::ResourceIntentBuilder;
pub use intent::{attribute_hash, IntentError, ModelVersion, ResourceIntent};
pub use report::{
    AttributeChange, Changes, DeployReport, DryrunReport, FactReport, LogLevel, LogLine,
};
pub use resource::{IdError, ResourceId, ResourceVersionId};
#[cfg(any(test, feature = "test-support"))]
pub use state::ResourceStateBuilder;
pub use state::{
    Blocked, Change, Compliance, DeployResult, HandlerResult, ResourceState, ResourceStatus,
};
pub use task::{Task, TaskKey, TaskKind, TaskPriority};
