// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::intent::{ModelVersion, ResourceIntent};
use crate::resource::ResourceId;

// ── Proptest strategies ──────────────────────────────────────────────

/// Proptest strategies for core state types.
pub mod strategies {
    use crate::state::{Blocked, Compliance, HandlerResult};
    use crate::task::TaskPriority;
    use proptest::prelude::*;

    pub fn arb_compliance() -> impl Strategy<Value = Compliance> {
        prop_oneof![
            Just(Compliance::Compliant),
            Just(Compliance::HasUpdate),
            Just(Compliance::NonCompliant),
            Just(Compliance::Undefined),
        ]
    }

    pub fn arb_blocked() -> impl Strategy<Value = Blocked> {
        prop_oneof![
            Just(Blocked::NotBlocked),
            Just(Blocked::TemporarilyBlocked),
            Just(Blocked::Blocked),
        ]
    }

    /// Final handler outcomes of a deploy (never `Deploying` or `Dry`)
    pub fn arb_deploy_outcome() -> impl Strategy<Value = HandlerResult> {
        prop_oneof![
            Just(HandlerResult::Deployed),
            Just(HandlerResult::Skipped),
            Just(HandlerResult::SkippedForDependency),
            Just(HandlerResult::Failed),
            Just(HandlerResult::Unavailable),
            Just(HandlerResult::Cancelled),
        ]
    }

    pub fn arb_priority() -> impl Strategy<Value = TaskPriority> {
        prop_oneof![
            Just(TaskPriority::UserDeploy),
            Just(TaskPriority::UserRepair),
            Just(TaskPriority::DryRun),
            Just(TaskPriority::IntervalDeploy),
            Just(TaskPriority::FactRefresh),
            Just(TaskPriority::IntervalRepair),
            Just(TaskPriority::NewVersionDeploy),
        ]
    }
}

// ── Model factories ──────────────────────────────────────────────────

/// `test::Res[<agent>,name=<name>]`
pub fn rid(agent: &str, name: &str) -> ResourceId {
    ResourceId::from_parts("test::Res", agent, "name", name)
}

/// Intent for `rid(agent1, name)` with the given hash and requirements
pub fn intent(name: &str, hash: &str, requires: &[&str]) -> ResourceIntent {
    requires.iter().fold(
        ResourceIntent::builder().id(rid("agent1", name)).attribute_hash(hash),
        |b, req| b.require(rid("agent1", req)),
    )
    .build()
}

/// A linear chain `names[0] <- names[1] <- ...`: every resource requires
/// the one before it.
pub fn chain(version: u64, names: &[&str]) -> ModelVersion {
    let mut model = ModelVersion::new(version);
    for (i, name) in names.iter().enumerate() {
        let requires: Vec<&str> = if i == 0 { Vec::new() } else { vec![names[i - 1]] };
        model = model.with_resource(intent(name, &format!("{name}-v{version}"), &requires));
    }
    model
}
