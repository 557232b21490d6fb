// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cv_core::test_support::{intent, rid};
use cv_core::{Blocked, Change, DeployReport, DeployResult, ResourceIntent, ResourceState};

fn env() -> EnvironmentId {
    EnvironmentId::new("env-1")
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200 + secs, 0).unwrap()
}

fn updates(items: &[(ResourceIntent, ResourceState)]) -> IntentUpdates {
    items.iter().map(|(i, s)| (i.id.clone(), (s.clone(), i.clone()))).collect()
}

/// Store with `a` and `b` (b requires a) committed at version 1
async fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    let mut txn = store.get_connection().await.unwrap();
    txn.update_resource_intent(
        &env(),
        1,
        updates(&[
            (intent("a", "ha", &[]), ResourceState::new(false)),
            (intent("b", "hb", &["a"]), ResourceState::new(false)),
        ]),
        true,
    )
    .await
    .unwrap();
    txn.set_last_processed_model_version(&env(), 1).await.unwrap();
    txn.commit().await.unwrap();
    store
}

fn done(
    action: &str,
    name: &str,
    status: HandlerResult,
    state: Option<ResourceState>,
) -> DeployDone {
    DeployDone {
        attribute_hash: format!("h{name}"),
        report: DeployReport::new(
            ActionId::new(action),
            rid("agent1", name).with_version(1),
            status,
        ),
        state,
        started: at(0),
        finished: at(10),
    }
}

// =============================================================================
// Transactions
// =============================================================================

#[tokio::test]
async fn commit_makes_updates_visible() {
    let store = seeded().await;
    let record = store.record(&env(), rid("agent1", "b").as_str()).unwrap();
    assert_eq!(record.model_version, 1);
    assert!(record.intent.requires.contains(&rid("agent1", "a")));
    assert_eq!(store.last_processed_version(&env()).await.unwrap(), Some(1));
}

#[tokio::test]
async fn dropped_transaction_discards_changes() {
    let store = seeded().await;
    {
        let mut txn = store.get_connection().await.unwrap();
        txn.mark_as_orphan(&env(), &[rid("agent1", "a")]).await.unwrap();
    }
    assert!(!store.record(&env(), rid("agent1", "a").as_str()).unwrap().state.is_orphan);
}

#[tokio::test]
async fn failed_commit_applies_nothing() {
    let store = seeded().await;
    store.fail_next(FailPoint::Commit, 1);

    let mut txn = store.get_connection().await.unwrap();
    txn.mark_as_orphan(&env(), &[rid("agent1", "a")]).await.unwrap();
    txn.set_last_processed_model_version(&env(), 2).await.unwrap();
    assert!(matches!(txn.commit().await, Err(PersistenceError::TransactionFailed(_))));

    assert!(!store.record(&env(), rid("agent1", "a").as_str()).unwrap().state.is_orphan);
    assert_eq!(store.last_processed_version(&env()).await.unwrap(), Some(1));
}

#[tokio::test]
async fn temporary_block_is_stored_as_not_blocked() {
    let store = MemoryStore::new();
    let state = ResourceState::builder().blocked(Blocked::TemporarilyBlocked).build();
    let mut txn = store.get_connection().await.unwrap();
    txn.update_resource_intent(&env(), 1, updates(&[(intent("a", "ha", &[]), state)]), true)
        .await
        .unwrap();
    txn.commit().await.unwrap();

    let record = store.record(&env(), rid("agent1", "a").as_str()).unwrap();
    assert_eq!(record.state.blocked, Blocked::NotBlocked);
}

#[tokio::test]
async fn blocked_state_kept_unless_requested() {
    let store = seeded().await;
    let blocked = ResourceState::builder().blocked(Blocked::Blocked).build();
    let mut txn = store.get_connection().await.unwrap();
    txn.update_resource_intent(&env(), 2, updates(&[(intent("a", "ha2", &[]), blocked)]), false)
        .await
        .unwrap();
    txn.commit().await.unwrap();

    let record = store.record(&env(), rid("agent1", "a").as_str()).unwrap();
    assert_eq!(record.state.blocked, Blocked::NotBlocked);
    assert_eq!(record.intent.attribute_hash, "ha2");
    assert_eq!(record.model_version, 2);
}

#[tokio::test]
async fn processed_version_never_moves_back() {
    let store = seeded().await;
    let mut txn = store.get_connection().await.unwrap();
    txn.set_last_processed_model_version(&env(), 0).await.unwrap();
    assert!(matches!(txn.commit().await, Err(PersistenceError::InvalidTransition(_))));
}

// =============================================================================
// Orphans
// =============================================================================

#[tokio::test]
async fn release_orphans_resources_missing_from_new_version() {
    let store = seeded().await;
    store
        .release_version(
            &env(),
            ModelVersion::new(1)
                .with_resource(intent("a", "ha", &[]))
                .with_resource(intent("b", "hb", &["a"])),
        )
        .unwrap();

    let orphaned = store
        .release_version(&env(), ModelVersion::new(2).with_resource(intent("a", "ha", &[])))
        .unwrap();

    assert_eq!(orphaned, vec![rid("agent1", "b")]);
    assert!(store.record(&env(), rid("agent1", "b").as_str()).unwrap().state.is_orphan);
    assert!(!store.record(&env(), rid("agent1", "a").as_str()).unwrap().state.is_orphan);
}

#[tokio::test]
async fn orphan_check_honors_later_versions() {
    let store = seeded().await;
    // version 3 arrives before version 2 is processed and still references b
    store
        .release_version(
            &env(),
            ModelVersion::new(3)
                .with_resource(intent("a", "ha", &[]))
                .with_resource(intent("b", "hb", &["a"])),
        )
        .unwrap();
    let v2 = ModelVersion::new(2).with_resource(intent("a", "ha", &[]));
    store.release_version(&env(), v2).unwrap();

    let mut txn = store.get_connection().await.unwrap();
    txn.mark_all_orphans(&env(), 2).await.unwrap();
    txn.commit().await.unwrap();

    assert!(!store.record(&env(), rid("agent1", "b").as_str()).unwrap().state.is_orphan);
}

// =============================================================================
// Deploy actions
// =============================================================================

#[tokio::test]
async fn in_progress_returns_requirement_statuses() {
    let store = seeded().await;
    let rvid = rid("agent1", "b").with_version(1);
    let statuses =
        store.send_in_progress(&env(), &ActionId::new("act-1"), &rvid, at(0)).await.unwrap();

    assert_eq!(statuses.get(&rid("agent1", "a")), Some(&ResourceStatus::Available));
    let action = store.action(&env(), "act-1").unwrap();
    assert_eq!(action.status, HandlerResult::Deploying);
    assert!(!action.is_finished());
}

#[tokio::test]
async fn failed_in_progress_records_nothing() {
    let store = seeded().await;
    store.fail_next(FailPoint::InProgress, 1);
    let rvid = rid("agent1", "a").with_version(1);
    let result = store.send_in_progress(&env(), &ActionId::new("act-1"), &rvid, at(0)).await;
    assert!(result.is_err());
    assert!(store.action(&env(), "act-1").is_none());
}

#[tokio::test]
async fn in_progress_rejects_reused_action() {
    let store = seeded().await;
    let rvid = rid("agent1", "a").with_version(1);
    store.send_in_progress(&env(), &ActionId::new("act-1"), &rvid, at(0)).await.unwrap();
    let again = store.send_in_progress(&env(), &ActionId::new("act-1"), &rvid, at(1)).await;
    assert!(matches!(again, Err(PersistenceError::InvalidTransition(_))));
}

#[tokio::test]
async fn deploy_done_stores_state_and_finishes_action() {
    let store = seeded().await;
    let rvid = rid("agent1", "a").with_version(1);
    store.send_in_progress(&env(), &ActionId::new("act-1"), &rvid, at(0)).await.unwrap();

    let state = ResourceState::builder()
        .compliance(Compliance::Compliant)
        .last_deploy_result(DeployResult::Deployed)
        .last_deployed_hash(Some("ha".into()))
        .build();
    store
        .send_deploy_done(&env(), done("act-1", "a", HandlerResult::Deployed, Some(state.clone())))
        .await
        .unwrap();

    assert_eq!(store.record(&env(), rid("agent1", "a").as_str()).unwrap().state, state);
    let action = store.action(&env(), "act-1").unwrap();
    assert_eq!(action.status, HandlerResult::Deployed);
    assert_eq!(action.finished, Some(at(10)));
}

#[tokio::test]
async fn stale_deploy_done_only_records_attempt() {
    let store = seeded().await;
    let rvid = rid("agent1", "a").with_version(1);
    store.send_in_progress(&env(), &ActionId::new("act-1"), &rvid, at(0)).await.unwrap();

    let mut stale = done("act-1", "a", HandlerResult::Deployed, None);
    stale.report = stale.report.with_change(Change::Updated);
    store.send_deploy_done(&env(), stale).await.unwrap();

    let state = store.record(&env(), rid("agent1", "a").as_str()).unwrap().state;
    assert_eq!(state.compliance, Compliance::HasUpdate);
    assert_eq!(state.last_deploy_result, DeployResult::Deployed);
    assert_eq!(state.last_success, Some(at(0)));
    assert_eq!(state.last_produced_events, Some(at(10)));
}

#[yare::parameterized(
    deploying = { HandlerResult::Deploying },
    dry       = { HandlerResult::Dry },
)]
fn deploy_done_rejects_non_final_status(status: HandlerResult) {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    rt.block_on(async {
        let store = seeded().await;
        let rvid = rid("agent1", "a").with_version(1);
        store.send_in_progress(&env(), &ActionId::new("act-1"), &rvid, at(0)).await.unwrap();
        let result = store.send_deploy_done(&env(), done("act-1", "a", status, None)).await;
        assert!(matches!(result, Err(PersistenceError::InvalidTransition(_))));
        assert!(!store.action(&env(), "act-1").unwrap().is_finished());
    });
}

#[tokio::test]
async fn deploy_done_twice_is_double_completion() {
    let store = seeded().await;
    let rvid = rid("agent1", "a").with_version(1);
    store.send_in_progress(&env(), &ActionId::new("act-1"), &rvid, at(0)).await.unwrap();
    store.send_deploy_done(&env(), done("act-1", "a", HandlerResult::Failed, None)).await.unwrap();

    let again =
        store.send_deploy_done(&env(), done("act-1", "a", HandlerResult::Failed, None)).await;
    assert!(matches!(again, Err(PersistenceError::DoubleCompletion(id)) if id == "act-1"));
}

#[tokio::test]
async fn deploy_done_for_unknown_action_is_not_found() {
    let store = seeded().await;
    let result =
        store.send_deploy_done(&env(), done("nope", "a", HandlerResult::Failed, None)).await;
    assert!(matches!(&result, Err(e) if e.is_client_error()));
}

#[tokio::test]
async fn undefined_resource_can_not_become_compliant() {
    let store = MemoryStore::new();
    let mut txn = store.get_connection().await.unwrap();
    txn.update_resource_intent(
        &env(),
        1,
        updates(&[(intent("a", "ha", &[]), ResourceState::new(true))]),
        true,
    )
    .await
    .unwrap();
    txn.commit().await.unwrap();
    let rvid = rid("agent1", "a").with_version(1);
    store.send_in_progress(&env(), &ActionId::new("act-1"), &rvid, at(0)).await.unwrap();

    let compliant = ResourceState::builder().compliance(Compliance::Compliant).build();
    let result = store
        .send_deploy_done(&env(), done("act-1", "a", HandlerResult::Deployed, Some(compliant)))
        .await;
    assert!(matches!(result, Err(PersistenceError::InvalidTransition(_))));
}

// =============================================================================
// Run state
// =============================================================================

#[tokio::test]
async fn run_state_defaults_to_running() {
    let store = MemoryStore::new();
    assert_eq!(store.run_state(&env()).await.unwrap(), RunState::default());
}

#[tokio::test]
async fn pause_and_halt_flags_round_trip_through_a_checkpoint() {
    let store = seeded().await;
    store.set_agent_paused(&env(), "agent1", true).await.unwrap();
    store.set_agent_paused(&env(), "agent2", true).await.unwrap();
    store.set_agent_paused(&env(), "agent2", false).await.unwrap();
    store.set_halted(&env(), true).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    store.checkpoint(&path).unwrap();
    let restored = MemoryStore::from_checkpoint(&path).unwrap();

    let state = restored.run_state(&env()).await.unwrap();
    assert!(state.halted);
    assert_eq!(state.paused_agents.into_iter().collect::<Vec<_>>(), vec!["agent1"]);
}

#[tokio::test]
async fn failed_pause_changes_nothing() {
    let store = seeded().await;
    store.fail_next(FailPoint::RunState, 1);
    assert!(store.set_agent_paused(&env(), "agent1", true).await.is_err());
    assert!(store.run_state(&env()).await.unwrap().paused_agents.is_empty());
}

// =============================================================================
// Dry runs, facts, versions
// =============================================================================

#[tokio::test]
async fn dryrun_update_replaces_report_for_same_resource() {
    let store = seeded().await;
    let id = DryRunId::new("dry-1");
    let rvid = rid("agent1", "a").with_version(1);
    let first = DryrunReport::undeployable(id.clone(), rvid.clone(), at(0));
    let mut second = first.clone();
    second.status = HandlerResult::Dry;

    store.dryrun_update(&env(), first).await.unwrap();
    store.dryrun_update(&env(), second).await.unwrap();

    let reports = store.dryrun_reports(&env(), &id);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, HandlerResult::Dry);
}

#[tokio::test]
async fn set_parameters_merges_into_record() {
    let store = seeded().await;
    let report = FactReport {
        resource_id: rid("agent1", "a"),
        parameters: [("size".to_string(), serde_json::json!(3))].into_iter().collect(),
        success: true,
        messages: Vec::new(),
    };
    store.set_parameters(&env(), &report).await.unwrap();
    let record = store.record(&env(), rid("agent1", "a").as_str()).unwrap();
    assert_eq!(record.parameters["size"], serde_json::json!(3));

    let missing = FactReport { resource_id: rid("agent1", "zz"), ..report };
    assert!(matches!(
        store.set_parameters(&env(), &missing).await,
        Err(PersistenceError::NotFound(_))
    ));
}

#[tokio::test]
async fn released_versions_are_returned_oldest_first() {
    let store = MemoryStore::new();
    for v in [3, 1, 2] {
        store.release_version(&env(), ModelVersion::new(v)).unwrap();
    }
    let versions: Vec<u64> = store
        .released_versions_since(&env(), 1)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.version)
        .collect();
    assert_eq!(versions, vec![2, 3]);
    assert!(store.get_version(&env(), 9).await.unwrap().is_none());
}
