// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restarting a scheduler over persisted state

use crate::prelude::*;
use crate::prelude::assert_eq;

#[tokio::test]
async fn restart_resumes_where_it_left_off() {
    let mut world = World::new();
    world.take_in(chain(1, &["a", "b"])).await;
    world.settle().await;
    world.release(chain(2, &["a", "b", "c"]));

    world.restart();
    world.sched.start().await.unwrap();
    assert_eq!(world.sched.version(), Some(2));
    world.settle().await;

    for name in ["a", "b", "c"] {
        assert_eq!(world.state(name).compliance, Compliance::Compliant, "{name}");
    }
    assert!(world.sched.status_report().await.unwrap().is_consistent());
}

#[tokio::test]
async fn restart_from_a_checkpoint_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.ckpt");

    let mut world = World::new();
    world.take_in(chain(1, &["a", "b"])).await;
    world.settle().await;
    world.store.checkpoint(&path).unwrap();

    let mut restored = World::over(MemoryStore::from_checkpoint(&path).unwrap(), quiet_config());
    restored.sched.start().await.unwrap();

    assert_eq!(restored.sched.version(), Some(1));
    assert_eq!(restored.state("b"), world.state("b"));
    assert!(restored.sched.is_idle(), "nothing left to deploy");
}

#[tokio::test]
async fn restart_forgets_temporary_blocks_and_retries() {
    let mut world = World::new();
    world.executor.script(&res("a"), [FakeOutcome::status(HandlerResult::Failed)]);
    world.take_in(chain(1, &["a", "b"])).await;
    world.settle().await;
    assert_eq!(world.state("b").blocked, Blocked::TemporarilyBlocked);

    world.restart();
    world.sched.start().await.unwrap();
    assert_eq!(world.state("b").blocked, Blocked::NotBlocked);
    world.settle().await;

    assert_eq!(world.state("a").compliance, Compliance::Compliant);
    assert_eq!(world.state("b").compliance, Compliance::Compliant);
}
