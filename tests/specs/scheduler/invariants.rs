// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Properties that hold for any resource graph and any handler outcomes

use crate::prelude::*;
use crate::prelude::assert_eq;
use cv_core::test_support::strategies::arb_deploy_outcome;
use cv_core::DryRunId;
use cv_engine::{DeployOutcome, ResourceModel};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::future::Future;

/// A random DAG: resource `i` may only require resources before it
#[derive(Debug, Clone)]
struct Graph {
    requires: Vec<Vec<usize>>,
    undefined: Vec<bool>,
    outcomes: Vec<HandlerResult>,
}

fn arb_graph() -> impl Strategy<Value = Graph> {
    (1usize..8)
        .prop_flat_map(|n| {
            (
                proptest::collection::vec(any::<u8>(), n),
                proptest::collection::vec(proptest::bool::weighted(0.2), n),
                proptest::collection::vec(arb_deploy_outcome(), n),
            )
        })
        .prop_map(|(masks, undefined, outcomes)| Graph {
            requires: masks
                .iter()
                .enumerate()
                .map(|(i, mask)| (0..i).filter(|j| mask & (1u8 << j) != 0).collect())
                .collect(),
            undefined,
            outcomes,
        })
}

fn name(i: usize) -> String {
    format!("r{i}")
}

impl Graph {
    fn version(&self, version: u64) -> ModelVersion {
        let mut model = ModelVersion::new(version);
        for (i, reqs) in self.requires.iter().enumerate() {
            let reqs: Vec<String> = reqs.iter().map(|j| name(*j)).collect();
            let reqs: Vec<&str> = reqs.iter().map(String::as_str).collect();
            let resource = intent(&name(i), &format!("h{i}"), &reqs);
            model = if self.undefined[i] {
                model.with_undefined(resource)
            } else {
                model.with_resource(resource)
            };
        }
        model
    }

    fn script(&self, world: &World) {
        for (i, outcome) in self.outcomes.iter().enumerate() {
            world.executor.script(&res(&name(i)), [FakeOutcome::status(*outcome)]);
        }
    }

    /// Undefined resources and everything depending on them
    fn hard_blocked(&self) -> BTreeSet<ResourceId> {
        let mut blocked = BTreeSet::new();
        for (i, reqs) in self.requires.iter().enumerate() {
            if self.undefined[i] || reqs.iter().any(|j| blocked.contains(&res(&name(*j)))) {
                blocked.insert(res(&name(i)));
            }
        }
        blocked
    }
}

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn blocked_resources_are_never_dispatched(graph in arb_graph()) {
        block_on(async {
            let mut world = World::new();
            graph.script(&world);
            world.take_in(graph.version(1)).await;
            world.settle().await;
            world.sched.repair("repair all", TaskPriority::UserRepair, None);
            world.sched.dry_run(DryRunId::new("dr"), 1).await.unwrap();
            world.settle().await;

            let blocked = graph.hard_blocked();
            for call in world.executor.calls() {
                assert!(!blocked.contains(&call.resource), "{} was dispatched", call.resource);
            }
            for rid in &blocked {
                let state = world.sched.get_resource_state(rid).unwrap();
                assert_eq!(state.blocked, Blocked::Blocked);
            }
        });
    }

    #[test]
    fn at_most_one_deploy_class_task_per_resource(graph in arb_graph()) {
        block_on(async {
            let mut world = World::new();
            graph.script(&world);
            world.take_in(graph.version(1)).await;
            world.sched.dry_run(DryRunId::new("dr"), 1).await.unwrap();
            world.sched.repair("repair all", TaskPriority::UserRepair, None);
            world.settle().await;
            world.sched.deploy("deploy all", TaskPriority::UserDeploy, None);
            world.sched.repair("repair all", TaskPriority::IntervalRepair, None);
            world.settle().await;

            assert!(!world.executor.overlap_detected());
            assert!(world.sched.is_idle());
        });
    }

    #[test]
    fn taking_in_a_version_twice_equals_once(graph in arb_graph()) {
        block_on(async {
            let mut world = World::new();
            world.take_in(graph.version(1)).await;
            let before: Vec<(ResourceId, ResourceState)> = world
                .sched
                .model()
                .resources()
                .map(|(rid, state)| (rid.clone(), state.clone()))
                .collect();
            let queued = world.sched.queue().pending_len();

            assert!(!world.sched.new_version(1).await.unwrap());
            assert!(!world.sched.read_version().await.unwrap());

            let after: Vec<(ResourceId, ResourceState)> = world
                .sched
                .model()
                .resources()
                .map(|(rid, state)| (rid.clone(), state.clone()))
                .collect();
            assert_eq!(before, after);
            assert_eq!(world.sched.queue().pending_len(), queued);
        });
    }

    #[test]
    fn stale_results_never_change_compliance(
        first in arb_deploy_outcome(),
        stale in arb_deploy_outcome(),
    ) {
        let clock = FakeClock::new();
        let mut model = ResourceModel::new();
        model.mark_new_intent(intent("a", "current", &[]), false);
        model.set_version(1);
        let at = clock.utc_now();
        let outcome = |hash: &str, status| DeployOutcome {
            attribute_hash: hash.to_string(),
            status,
            change: Change::NoChange,
            started: at,
            finished: at,
        };
        model.apply_deploy_result(&res("a"), &outcome("current", first)).unwrap();
        let compliance = model.state(&res("a")).unwrap().compliance;

        let transition =
            model.apply_deploy_result(&res("a"), &outcome("superseded", stale)).unwrap();
        prop_assert!(transition.stale);
        prop_assert_eq!(model.state(&res("a")).unwrap().compliance, compliance);
    }
}
