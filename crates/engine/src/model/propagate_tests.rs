// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::DeployOutcome;
use chrono::{DateTime, TimeDelta, Utc};
use cv_core::test_support::{chain, intent, rid};
use cv_core::{
    Change, Clock, FakeClock, HandlerResult, ModelVersion, ResourceIntent, ResourceStatus,
};

fn r(name: &str) -> ResourceId {
    rid("agent1", name)
}

fn at(offset_secs: i64) -> DateTime<Utc> {
    FakeClock::new().utc_now() + TimeDelta::seconds(offset_secs)
}

fn run(
    model: &mut ResourceModel,
    name: &str,
    status: HandlerResult,
    change: Change,
    started: i64,
) {
    let hash = model.intent(&r(name)).map(|i| i.attribute_hash.clone()).unwrap();
    let outcome = DeployOutcome {
        attribute_hash: hash,
        status,
        change,
        started: at(started),
        finished: at(started + 1),
    };
    model.apply_deploy_result(&r(name), &outcome).unwrap();
}

fn sender(name: &str, requires: &[&str]) -> ResourceIntent {
    ResourceIntent { send_event: true, ..intent(name, &format!("{name}-h"), requires) }
}

// =============================================================================
// Hard blocks
// =============================================================================

#[test]
fn undefined_requirement_blocks_dependents_transitively() {
    let version = ModelVersion::new(1)
        .with_undefined(intent("a", "ha", &[]))
        .with_resource(intent("b", "hb", &["a"]))
        .with_resource(intent("c", "hc", &["b"]))
        .with_resource(intent("free", "hf", &[]));
    let model = ResourceModel::for_version(&version);

    let b = model.state(&r("b")).unwrap();
    assert_eq!(b.blocked, Blocked::Blocked);
    assert_eq!(b.status(), ResourceStatus::SkippedForUndefined);
    assert_eq!(model.state(&r("c")).unwrap().blocked, Blocked::Blocked);
    assert_eq!(model.state(&r("free")).unwrap().blocked, Blocked::NotBlocked);
}

#[test]
fn recompute_reports_changes_both_ways() {
    let mut model = ResourceModel::for_version(&chain(1, &["a", "b", "c"]));
    model.mark_new_intent(intent("a", "a-v2", &[]), true);

    let changes = model.recompute_hard_blocks();
    assert_eq!(changes.newly_blocked, vec![r("b"), r("c")]);
    assert!(changes.unblocked.is_empty());

    model.mark_new_intent(intent("a", "a-v3", &[]), false);
    let changes = model.recompute_hard_blocks();
    assert!(changes.newly_blocked.is_empty());
    assert_eq!(changes.unblocked, vec![r("b"), r("c")]);
    assert_eq!(model.state(&r("c")).unwrap().blocked, Blocked::NotBlocked);
}

#[test]
fn hard_block_overrides_temporary() {
    let mut model = ResourceModel::for_version(&chain(1, &["a", "b"]));
    model.set_blocked(&r("b"), Blocked::TemporarilyBlocked).unwrap();
    model.mark_new_intent(intent("a", "a-v2", &[]), true);

    let changes = model.recompute_hard_blocks();

    assert_eq!(changes.newly_blocked, vec![r("b")]);
}

#[test]
fn recompute_is_idempotent() {
    let version = ModelVersion::new(1)
        .with_undefined(intent("a", "ha", &[]))
        .with_resource(intent("b", "hb", &["a"]));
    let mut model = ResourceModel::for_version(&version);
    assert!(model.recompute_hard_blocks().is_empty());
}

// =============================================================================
// Temporary blocks and recovery
// =============================================================================

#[test]
fn skip_for_failed_requirement_blocks_temporarily() {
    let mut model = ResourceModel::for_version(&chain(1, &["a", "b"]));
    run(&mut model, "a", HandlerResult::Failed, Change::NoChange, 0);
    assert!(model.should_skip_for_dependencies(&r("b")));

    run(&mut model, "b", HandlerResult::SkippedForDependency, Change::NoChange, 5);

    assert_eq!(model.state(&r("b")).unwrap().blocked, Blocked::TemporarilyBlocked);
}

#[test]
fn skip_with_healthy_requirements_is_plain_non_compliance() {
    let mut model = ResourceModel::for_version(&chain(1, &["a", "b"]));
    assert!(!model.should_skip_for_dependencies(&r("b")));

    run(&mut model, "b", HandlerResult::SkippedForDependency, Change::NoChange, 0);

    let b = model.state(&r("b")).unwrap();
    assert_eq!(b.blocked, Blocked::NotBlocked);
    assert_eq!(b.compliance, Compliance::NonCompliant);
}

#[test]
fn temporarily_blocked_requirement_explains_skip() {
    let mut model = ResourceModel::for_version(&chain(1, &["a", "b"]));
    model.set_blocked(&r("a"), Blocked::TemporarilyBlocked).unwrap();
    assert!(model.should_skip_for_dependencies(&r("b")));
}

#[test]
fn temporary_block_propagates_until_blocked() {
    let version = chain(1, &["a", "b", "c", "d"]).with_resource(intent("side", "hs", &["b"]));
    let mut model = ResourceModel::for_version(&version);
    model.set_blocked(&r("c"), Blocked::TemporarilyBlocked).unwrap();

    let blocked = model.propagate_temporary_block(&r("a"));

    assert_eq!(blocked, vec![r("b"), r("side")]);
    assert_eq!(model.state(&r("d")).unwrap().blocked, Blocked::NotBlocked);
}

#[test]
fn recovery_candidates_need_healthy_requirements() {
    let version = chain(1, &["a", "b"]).with_resource(intent("c", "hc", &["a", "x"])).with_resource(
        intent("x", "hx", &[]),
    );
    let mut model = ResourceModel::for_version(&version);
    run(&mut model, "x", HandlerResult::Failed, Change::NoChange, 0);
    model.set_blocked(&r("b"), Blocked::TemporarilyBlocked).unwrap();
    model.set_blocked(&r("c"), Blocked::TemporarilyBlocked).unwrap();

    run(&mut model, "a", HandlerResult::Deployed, Change::NoChange, 10);

    assert_eq!(model.recovery_candidates(&r("a")), vec![r("b")]);
}

// =============================================================================
// Events
// =============================================================================

#[test]
fn listeners_need_send_and_receive() {
    let quiet = intent("quiet", "hq", &["d"]);
    let deaf = ResourceIntent { receive_events: false, ..intent("deaf", "hdeaf", &["d"]) };
    let version = ModelVersion::new(1)
        .with_resource(sender("d", &[]))
        .with_resource(intent("c", "hc", &["d"]))
        .with_resource(deaf)
        .with_resource(quiet.clone());
    let model = ResourceModel::for_version(&version);

    assert_eq!(model.event_listeners(&r("d")), vec![r("c"), r("quiet")]);

    let silent = ModelVersion::new(1).with_resource(intent("d", "hd", &[])).with_resource(quiet);
    assert!(ResourceModel::for_version(&silent).event_listeners(&r("d")).is_empty());
}

#[test]
fn created_change_after_dependent_success_wants_deploy() {
    let version = ModelVersion::new(1)
        .with_resource(sender("d", &[]))
        .with_resource(intent("c", "hc", &["d"]));
    let mut model = ResourceModel::for_version(&version);
    run(&mut model, "c", HandlerResult::Deployed, Change::NoChange, 0);
    assert!(!model.wants_event_deploy(&r("c")));

    run(&mut model, "d", HandlerResult::Deployed, Change::Created, 10);

    assert!(model.has_outstanding_events(&r("c")));
    assert!(model.wants_event_deploy(&r("c")));
    assert!(model.is_dirty(&r("c")));
}

#[test]
fn nochange_deploy_does_not_want_deploy() {
    let version = ModelVersion::new(1)
        .with_resource(sender("d", &[]))
        .with_resource(intent("c", "hc", &["d"]));
    let mut model = ResourceModel::for_version(&version);
    run(&mut model, "c", HandlerResult::Deployed, Change::NoChange, 0);

    run(&mut model, "d", HandlerResult::Deployed, Change::NoChange, 10);

    assert!(!model.wants_event_deploy(&r("c")));
}

#[test]
fn events_older_than_last_success_are_consumed() {
    let version = ModelVersion::new(1)
        .with_resource(sender("d", &[]))
        .with_resource(intent("c", "hc", &["d"]));
    let mut model = ResourceModel::for_version(&version);
    run(&mut model, "d", HandlerResult::Deployed, Change::Created, 0);
    run(&mut model, "c", HandlerResult::Deployed, Change::NoChange, 10);

    assert!(!model.wants_event_deploy(&r("c")));
}

#[test]
fn never_deployed_dependent_wants_deploy() {
    let version = ModelVersion::new(1)
        .with_resource(sender("d", &[]))
        .with_resource(intent("c", "hc", &["d"]));
    let model = ResourceModel::for_version(&version);
    assert!(model.wants_event_deploy(&r("c")));
}

#[test]
fn blocked_dependent_never_wants_event_deploy() {
    let version = ModelVersion::new(1)
        .with_resource(sender("d", &[]))
        .with_resource(intent("c", "hc", &["d"]));
    let mut model = ResourceModel::for_version(&version);
    model.set_blocked(&r("c"), Blocked::TemporarilyBlocked).unwrap();
    assert!(!model.wants_event_deploy(&r("c")));
    assert!(model.event_listeners(&r("d")).is_empty());
}
