// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cv_core::test_support::{chain, rid};
use serde_json::json;

fn r(name: &str) -> ResourceId {
    rid("agent1", name)
}

/// Records matching `model` exactly
fn records_of(model: &ResourceModel) -> Vec<ResourceRecord> {
    model
        .resources()
        .map(|(id, state)| ResourceRecord {
            resource_id: id.clone(),
            intent: model.intent(id).cloned().unwrap(),
            state: state.clone(),
            model_version: 1,
            parameters: Default::default(),
        })
        .collect()
}

fn record_mut<'a>(records: &'a mut [ResourceRecord], name: &str) -> &'a mut ResourceRecord {
    records.iter_mut().find(|rec| rec.resource_id == r(name)).unwrap()
}

fn two() -> ResourceModel {
    ResourceModel::for_version(&chain(1, &["a", "b"]))
}

#[test]
fn matching_records_are_consistent() {
    let model = two();
    assert!(compare(&model, &records_of(&model)).is_empty());
}

#[test]
fn missing_record_is_reported() {
    let model = two();
    let mut records = records_of(&model);
    records.retain(|rec| rec.resource_id == r("a"));

    assert_eq!(compare(&model, &records), vec![Discrepancy::MissingRecord { resource: r("b") }]);
}

#[test]
fn temporary_blocks_are_not_compared() {
    let mut model = two();
    let records = records_of(&model);
    model.set_blocked(&r("b"), Blocked::TemporarilyBlocked).unwrap();

    assert!(compare(&model, &records).is_empty());
}

#[test]
fn every_differing_field_is_reported() {
    let model = two();
    let mut records = records_of(&model);
    let a = record_mut(&mut records, "a");
    a.state.compliance = Compliance::Compliant;
    a.state.last_deploy_result = DeployResult::Deployed;

    assert_eq!(
        compare(&model, &records),
        vec![
            Discrepancy::Compliance {
                resource: r("a"),
                memory: Compliance::HasUpdate,
                persisted: Compliance::Compliant,
            },
            Discrepancy::LastResult {
                resource: r("a"),
                memory: DeployResult::New,
                persisted: DeployResult::Deployed,
            },
        ]
    );
}

#[test]
fn record_unknown_to_memory_should_be_an_orphan() {
    let model = ResourceModel::for_version(&chain(1, &["a"]));
    let mut records = records_of(&two());

    assert_eq!(
        compare(&model, &records),
        vec![Discrepancy::Orphan { resource: r("b"), memory: true, persisted: false }]
    );

    record_mut(&mut records, "b").state.is_orphan = true;
    assert!(compare(&model, &records).is_empty());
}

#[test]
fn orphan_in_memory_only_is_reported() {
    let mut model = two();
    let records = records_of(&model);
    model.mark_orphan(&r("a"));

    assert_eq!(
        compare(&model, &records),
        vec![Discrepancy::Orphan { resource: r("a"), memory: true, persisted: false }]
    );
}

#[test]
fn report_needs_matching_versions() {
    let report = StatusReport {
        model_version: Some(2),
        persisted_version: Some(1),
        discrepancies: Vec::new(),
        queued: 0,
        in_flight: 0,
        timers: 0,
    };
    assert!(!report.is_consistent());
    assert!(StatusReport { persisted_version: Some(2), ..report }.is_consistent());
}

#[test]
fn discrepancies_serialize_with_a_kind_tag() {
    let value = serde_json::to_value(Discrepancy::MissingRecord { resource: r("a") }).unwrap();
    assert_eq!(value, json!({ "kind": "missing_record", "resource": r("a").to_string() }));
}
