// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    compliant     = { Compliance::Compliant,    false },
    has_update    = { Compliance::HasUpdate,    true },
    non_compliant = { Compliance::NonCompliant, true },
    undefined     = { Compliance::Undefined,    false },
)]
fn compliance_dirty(compliance: Compliance, expected: bool) {
    assert_eq!(compliance.is_dirty(), expected);
}

#[yare::parameterized(
    deployed       = { HandlerResult::Deployed,             Some(DeployResult::Deployed) },
    skipped        = { HandlerResult::Skipped,              Some(DeployResult::Skipped) },
    skipped_for_dep = { HandlerResult::SkippedForDependency, Some(DeployResult::Skipped) },
    undefined      = { HandlerResult::Undefined,            Some(DeployResult::Skipped) },
    failed         = { HandlerResult::Failed,               Some(DeployResult::Failed) },
    unavailable    = { HandlerResult::Unavailable,          Some(DeployResult::Failed) },
    cancelled      = { HandlerResult::Cancelled,            Some(DeployResult::Failed) },
    deploying      = { HandlerResult::Deploying,            None },
    dry            = { HandlerResult::Dry,                  None },
)]
fn handler_result_maps_to_deploy_result(result: HandlerResult, expected: Option<DeployResult>) {
    assert_eq!(result.deploy_result(), expected);
}

#[test]
fn only_deploying_is_transient() {
    assert!(HandlerResult::Deploying.is_transient());
    assert!(!HandlerResult::Deployed.is_transient());
    assert!(!HandlerResult::Dry.is_transient());
}

#[test]
fn temporary_block_is_not_durable() {
    assert_eq!(Blocked::TemporarilyBlocked.db_value(), Blocked::NotBlocked);
    assert_eq!(Blocked::Blocked.db_value(), Blocked::Blocked);
}

#[test]
fn new_state_for_defined_and_undefined() {
    let defined = ResourceState::new(false);
    assert_eq!(defined.compliance, Compliance::HasUpdate);
    assert_eq!(defined.blocked, Blocked::NotBlocked);
    assert!(defined.is_dirty());

    let undefined = ResourceState::new(true);
    assert_eq!(undefined.compliance, Compliance::Undefined);
    assert_eq!(undefined.blocked, Blocked::Blocked);
    assert!(!undefined.is_dirty());
    assert_eq!(undefined.status(), ResourceStatus::Undefined);
}

#[test]
fn blocked_dependent_reports_skipped_for_undefined() {
    let state = ResourceState::builder().blocked(Blocked::Blocked).build();
    assert_eq!(state.status(), ResourceStatus::SkippedForUndefined);
    assert_eq!(state.status().to_string(), "skipped_for_undefined");
}

#[yare::parameterized(
    deployed = { Compliance::Compliant,    DeployResult::Deployed, ResourceStatus::Deployed },
    failed   = { Compliance::NonCompliant, DeployResult::Failed,   ResourceStatus::Failed },
    skipped  = { Compliance::NonCompliant, DeployResult::Skipped,  ResourceStatus::Skipped },
    updated  = { Compliance::HasUpdate,    DeployResult::Deployed, ResourceStatus::Available },
)]
fn status_follows_last_result(
    compliance: Compliance,
    last: DeployResult,
    expected: ResourceStatus,
) {
    let state = ResourceState::builder().compliance(compliance).last_deploy_result(last).build();
    assert_eq!(state.status(), expected);
}

#[test]
fn temporarily_blocked_is_not_dirty() {
    let state = ResourceState::builder()
        .compliance(Compliance::NonCompliant)
        .blocked(Blocked::TemporarilyBlocked)
        .build();
    assert!(!state.is_dirty());
}

#[test]
fn change_serializes_nochange() {
    assert_eq!(serde_json::to_string(&Change::NoChange).unwrap(), "\"nochange\"");
    assert_eq!(serde_json::to_string(&Change::Created).unwrap(), "\"created\"");
    assert_eq!(Change::default(), Change::NoChange);
}

#[test]
fn record_attempt_keeps_compliance() {
    let started = DateTime::from_timestamp(1_000, 0).unwrap();
    let finished = DateTime::from_timestamp(1_010, 0).unwrap();
    let mut state = ResourceState::builder().compliance(Compliance::HasUpdate).build();

    state.record_attempt(HandlerResult::Deployed, Change::Created, started, finished);

    assert_eq!(state.compliance, Compliance::HasUpdate);
    assert_eq!(state.last_deploy_result, DeployResult::Deployed);
    assert_eq!(state.last_deployed, Some(finished));
    assert_eq!(state.last_success, Some(started));
    assert_eq!(state.last_produced_events, Some(finished));
}

#[test]
fn record_attempt_failure_leaves_success_times() {
    let earlier = DateTime::from_timestamp(500, 0).unwrap();
    let finished = DateTime::from_timestamp(1_010, 0).unwrap();
    let mut state = ResourceState::builder().last_success(Some(earlier)).build();

    state.record_attempt(HandlerResult::Unavailable, Change::NoChange, finished, finished);

    assert_eq!(state.last_deploy_result, DeployResult::Failed);
    assert_eq!(state.last_success, Some(earlier));
    assert_eq!(state.last_produced_events, None);
}
