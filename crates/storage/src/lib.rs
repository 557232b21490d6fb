// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! cv-storage: State persistence for the converge scheduler

mod memory;
mod persistence;
mod records;
mod snapshot;

pub use memory::{FailPoint, MemoryStore, MemoryTransaction};
pub use persistence::{
    DependencyStatuses, DeployDone, IntentUpdates, PersistenceError, RunState, StatePersistence,
    StateTransaction,
};
pub use records::{EnvironmentData, ResourceAction, ResourceRecord, StoreData};
pub use snapshot::{read_checkpoint, write_checkpoint, CHECKPOINT_VERSION};
