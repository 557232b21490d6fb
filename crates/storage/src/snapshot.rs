// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! zstd-compressed JSON checkpoints of the persisted layout.
//!
//! Written to a sibling temp file and renamed into place, so a crash mid-write
//! leaves the previous checkpoint intact.

use crate::persistence::PersistenceError;
use crate::records::StoreData;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;

#[derive(Serialize, Deserialize)]
struct Checkpoint {
    v: u32,
    data: StoreData,
}

pub fn write_checkpoint(path: &Path, data: &StoreData) -> Result<(), PersistenceError> {
    #[derive(Serialize)]
    struct CheckpointRef<'a> {
        v: u32,
        data: &'a StoreData,
    }

    let json = serde_json::to_vec(&CheckpointRef { v: CHECKPOINT_VERSION, data })?;
    let compressed = zstd::encode_all(json.as_slice(), ZSTD_LEVEL)?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, compressed)?;
    std::fs::rename(&tmp, path)?;
    tracing::debug!(path = %path.display(), "wrote checkpoint");
    Ok(())
}

pub fn read_checkpoint(path: &Path) -> Result<StoreData, PersistenceError> {
    let compressed = std::fs::read(path)?;
    let json = zstd::decode_all(compressed.as_slice())?;
    let checkpoint: Checkpoint = serde_json::from_slice(&json)?;
    if checkpoint.v > CHECKPOINT_VERSION {
        return Err(PersistenceError::UnsupportedCheckpoint(checkpoint.v));
    }
    Ok(checkpoint.data)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
