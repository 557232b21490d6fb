// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cv-adapters: Executor dispatch for the converge scheduler

mod executor;
mod router;

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod fake;

pub use executor::{
    DeployRequest, DryRunRequest, Executor, ExecutorError, FactRequest, RequirementStatuses,
};
pub use router::ExecutorRegistry;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{CallKind, ExecutorCall, FakeExecutor, FakeOutcome};
