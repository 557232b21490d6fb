// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::memory::MemoryStore;
use cv_core::test_support::chain;
use cv_core::EnvironmentId;
use tempfile::tempdir;

#[test]
fn checkpoint_restores_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.ckpt");
    let env = EnvironmentId::new("env-1");

    let store = MemoryStore::new();
    store.release_version(&env, chain(1, &["a", "b"])).unwrap();
    store.checkpoint(&path).unwrap();

    let restored = MemoryStore::from_checkpoint(&path).unwrap();
    assert_eq!(restored.data(), store.data());
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn checkpoint_is_compressed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.ckpt");
    write_checkpoint(&path, &StoreData::default()).unwrap();

    let raw = std::fs::read(&path).unwrap();
    // zstd frame magic
    assert_eq!(&raw[..4], &[0x28, 0xb5, 0x2f, 0xfd]);
}

#[test]
fn newer_checkpoint_version_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.ckpt");
    let json = serde_json::json!({"v": CHECKPOINT_VERSION + 1, "data": {}});
    let compressed = zstd::encode_all(json.to_string().as_bytes(), 3).unwrap();
    std::fs::write(&path, compressed).unwrap();

    assert!(matches!(
        read_checkpoint(&path),
        Err(PersistenceError::UnsupportedCheckpoint(v)) if v == CHECKPOINT_VERSION + 1
    ));
}

#[test]
fn missing_checkpoint_is_io_error() {
    let dir = tempdir().unwrap();
    assert!(matches!(read_checkpoint(&dir.path().join("nope")), Err(PersistenceError::Io(_))));
}

#[test]
fn corrupt_checkpoint_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.ckpt");
    std::fs::write(&path, b"not zstd").unwrap();
    assert!(read_checkpoint(&path).is_err());
}
