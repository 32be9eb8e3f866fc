//! Commit coordinator and snapshot store tests

mod common;

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use common::*;
use strata::snapshot::{LocalSnapshotStore, Snapshot};
use strata::storage::{DataFileMeta, FileKind};
use strata::table::KeyValue;
use strata::writer::{CompactIncrement, DataIncrement, IndexIncrement};
use strata::{
    BucketKey, CommitCoordinator, CommitMessage, CommitResult, Datum, RowKind, SnapshotStore,
    StrataError, Table,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn open_table(dir: &TempDir) -> Table {
    Table::open(config_in(dir).total_buckets(2).build(), pk_schema()).unwrap()
}

fn bucket(pt: i64, bucket: u32) -> BucketKey {
    BucketKey::new(partition(&[pt]), bucket)
}

fn kv(pt: i64, k: i64, sequence: u64, v: i64) -> KeyValue {
    KeyValue {
        key: vec![Datum::Int(pt), Datum::Int(k)],
        sequence,
        kind: RowKind::Insert,
        values: vec![Datum::Int(pt), Datum::Int(k), Datum::Int(v)],
    }
}

fn data_file(table: &Table, key: &BucketKey, level: u8, records: &[KeyValue]) -> DataFileMeta {
    table
        .file_store()
        .write_file(key, level, FileKind::Data, records)
        .unwrap()
}

fn new_files_message(key: &BucketKey, files: Vec<DataFileMeta>) -> CommitMessage {
    CommitMessage::new(
        key.partition.clone(),
        key.bucket,
        2,
        DataIncrement {
            new_files: files,
            ..DataIncrement::default()
        },
        CompactIncrement::default(),
        IndexIncrement::default(),
    )
}

fn file_names(snapshot: &Snapshot, key: &BucketKey) -> Vec<String> {
    snapshot
        .files_of(key)
        .into_iter()
        .map(|f| f.file_name)
        .collect()
}

/// Store that reports every publication as lost
struct AlwaysRacingStore(LocalSnapshotStore);

impl SnapshotStore for AlwaysRacingStore {
    fn latest_id(&self) -> strata::Result<Option<u64>> {
        self.0.latest_id()
    }

    fn read(&self, id: u64) -> strata::Result<Snapshot> {
        self.0.read(id)
    }

    fn try_publish(&self, _snapshot: &Snapshot) -> strata::Result<bool> {
        Ok(false)
    }
}

// =============================================================================
// Basic Commits
// =============================================================================

#[test]
fn test_commit_publishes_snapshot() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 0);

    let file = data_file(&table, &key, 0, &[kv(1, 1, 0, 10), kv(1, 2, 1, 20)]);
    let result = commit
        .commit(1, vec![new_files_message(&key, vec![file.clone()])])
        .unwrap();

    match result {
        CommitResult::Committed {
            commit_identifier,
            snapshot_id,
            stats,
        } => {
            assert_eq!(commit_identifier, 1);
            assert_eq!(snapshot_id, 1);
            assert_eq!(stats.added_files, 1);
            assert_eq!(stats.added_rows, 2);
        }
        other => panic!("expected a snapshot, got {:?}", other),
    }

    let snapshot = table.snapshot_store().latest().unwrap().unwrap();
    assert_eq!(snapshot.id, 1);
    assert_eq!(snapshot.parent, None);
    assert_eq!(snapshot.commit_user, "test-user");
    assert_eq!(snapshot.commit_identifier, 1);
    assert_eq!(snapshot.files_of(&key), vec![file]);
    assert_eq!(snapshot.buckets[&key].total_buckets, 2);
    assert_eq!(commit.last_committed().unwrap(), Some(1));
}

#[test]
fn test_snapshots_chain_to_their_parent() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 0);

    for id in 1..=3u64 {
        let file = data_file(&table, &key, 0, &[kv(1, id as i64, id, 0)]);
        commit.commit(id, vec![new_files_message(&key, vec![file])]).unwrap();
    }

    let store = table.snapshot_store();
    let latest = store.latest().unwrap().unwrap();
    assert_eq!(latest.id, 3);
    assert_eq!(latest.parent, Some(2));
    assert_eq!(latest.total_data_files(), 3);
    assert_eq!(store.read(2).unwrap().parent, Some(1));
}

#[test]
fn test_empty_commit_creates_no_snapshot() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();

    let result = commit.commit(1, Vec::new()).unwrap();
    assert_eq!(result, CommitResult::Empty { commit_identifier: 1 });
    assert_eq!(result.snapshot_id(), None);

    // Messages without any file are filtered out as well
    let empty = new_files_message(&bucket(1, 0), Vec::new());
    assert!(commit.commit(2, vec![empty]).unwrap().snapshot_id().is_none());
    assert!(table.snapshot_store().latest_id().unwrap().is_none());
}

#[test]
fn test_messages_of_one_bucket_are_merged() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 1);
    let other = bucket(2, 0);

    let first = data_file(&table, &key, 0, &[kv(1, 1, 0, 10)]);
    let second = data_file(&table, &key, 0, &[kv(1, 1, 1, 11)]);
    let third = data_file(&table, &other, 0, &[kv(2, 1, 0, 20)]);

    commit
        .commit(
            1,
            vec![
                new_files_message(&key, vec![first.clone()]),
                new_files_message(&other, vec![third]),
                new_files_message(&key, vec![second.clone()]),
            ],
        )
        .unwrap();

    let snapshot = table.snapshot_store().latest().unwrap().unwrap();
    assert_eq!(snapshot.delta.len(), 2);
    assert_eq!(
        file_names(&snapshot, &key),
        vec![first.file_name, second.file_name]
    );
    assert_eq!(snapshot.touched_buckets().len(), 2);
}

// =============================================================================
// Idempotency
// =============================================================================

#[test]
fn test_replay_returns_first_result() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 0);

    let file = data_file(&table, &key, 0, &[kv(1, 1, 0, 10)]);
    let message = new_files_message(&key, vec![file]);
    let first = commit.commit(1, vec![message.clone()]).unwrap();
    let replay = commit.commit(1, vec![message]).unwrap();

    assert_eq!(first, replay);
    assert_eq!(table.snapshot_store().latest_id().unwrap(), Some(1));
}

#[test]
fn test_replay_after_restart_is_answered_from_snapshots() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let key = bucket(1, 0);

    let file = data_file(&table, &key, 0, &[kv(1, 1, 0, 10)]);
    let message = new_files_message(&key, vec![file]);
    let first = table.new_commit().commit(5, vec![message.clone()]).unwrap();

    let restarted = table.new_commit();
    assert_eq!(restarted.last_committed().unwrap(), Some(5));
    let replay = restarted.commit(5, vec![message]).unwrap();

    assert_eq!(first, replay);
    assert_eq!(table.snapshot_store().latest_id().unwrap(), Some(1));
}

#[test]
fn test_evicted_result_is_still_idempotent() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 0);

    let file = data_file(&table, &key, 0, &[kv(1, 1, 0, 10)]);
    let message = new_files_message(&key, vec![file]);
    let first = commit.commit(1, vec![message.clone()]).unwrap();
    commit.evict_results_up_to(1);

    assert_eq!(commit.commit(1, vec![message]).unwrap(), first);
    assert_eq!(table.snapshot_store().latest_id().unwrap(), Some(1));
}

#[test]
fn test_result_cache_stays_bounded() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 0);

    let mut messages = Vec::new();
    let mut results = Vec::new();
    for id in 1..=10u64 {
        let file = data_file(&table, &key, 0, &[kv(1, id as i64, id, 10)]);
        let message = new_files_message(&key, vec![file]);
        results.push(commit.commit(id, vec![message.clone()]).unwrap());
        messages.push(message);
        assert_eq!(commit.cached_results(), 1);
    }
    commit.commit(11, Vec::new()).unwrap();
    assert_eq!(commit.cached_results(), 1);

    // Older identifiers are still answered, now from the snapshot chain
    assert_eq!(commit.commit(3, vec![messages[2].clone()]).unwrap(), results[2]);
    assert_eq!(table.snapshot_store().latest_id().unwrap(), Some(10));
}

#[test]
fn test_regressing_identifier_is_rejected() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 0);

    let file = data_file(&table, &key, 0, &[kv(1, 1, 0, 10)]);
    commit.commit(5, vec![new_files_message(&key, vec![file])]).unwrap();

    let late = data_file(&table, &key, 0, &[kv(1, 2, 1, 20)]);
    let result = commit.commit(3, vec![new_files_message(&key, vec![late])]);
    assert!(matches!(result, Err(StrataError::ProtocolViolation(_))));
}

#[test]
fn test_users_have_independent_identifiers() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let key = bucket(1, 0);
    let store = table.snapshot_store();

    let alice = CommitCoordinator::new("alice", Arc::clone(&store), 3);
    let bob = CommitCoordinator::new("bob", Arc::clone(&store), 3);

    let a = data_file(&table, &key, 0, &[kv(1, 1, 0, 10)]);
    let b = data_file(&table, &key, 0, &[kv(1, 2, 1, 20)]);
    alice.commit(7, vec![new_files_message(&key, vec![a])]).unwrap();
    let result = bob.commit(1, vec![new_files_message(&key, vec![b])]).unwrap();

    assert_eq!(result.snapshot_id(), Some(2));
    assert_eq!(store.latest_commit_of_user("alice").unwrap(), Some(7));
    assert_eq!(store.latest_commit_of_user("bob").unwrap(), Some(1));
    assert_eq!(store.find_by_commit("alice", 7).unwrap().map(|s| s.id), Some(1));
    assert!(store.find_by_commit("bob", 7).unwrap().is_none());
}

// =============================================================================
// Compaction Results
// =============================================================================

#[test]
fn test_compaction_swaps_files() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 0);

    let l0 = data_file(&table, &key, 0, &[kv(1, 1, 0, 10)]);
    commit.commit(1, vec![new_files_message(&key, vec![l0.clone()])]).unwrap();

    let compacted = data_file(&table, &key, 2, &[kv(1, 1, 0, 10)]);
    let message = CommitMessage::compaction_only(
        &key,
        2,
        CompactIncrement {
            compact_before: vec![l0],
            compact_after: vec![compacted.clone()],
            changelog_files: Vec::new(),
        },
    );
    let result = commit.commit(2, vec![message]).unwrap();

    let snapshot = table.snapshot_store().latest().unwrap().unwrap();
    assert_eq!(file_names(&snapshot, &key), vec![compacted.file_name]);
    match result {
        CommitResult::Committed { stats, .. } => {
            assert_eq!(stats.added_files, 1);
            assert_eq!(stats.deleted_files, 1);
        }
        other => panic!("expected a snapshot, got {:?}", other),
    }
}

#[test]
fn test_new_files_and_compaction_in_one_message() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 0);

    // A flush and a compaction of that same flush, committed together
    let l0 = data_file(&table, &key, 0, &[kv(1, 1, 0, 10)]);
    let compacted = data_file(&table, &key, 2, &[kv(1, 1, 0, 10)]);
    let changelog = table
        .file_store()
        .write_file(&key, 0, FileKind::Changelog, &[kv(1, 1, 0, 10)])
        .unwrap();

    let message = CommitMessage::new(
        key.partition.clone(),
        key.bucket,
        2,
        DataIncrement {
            new_files: vec![l0.clone()],
            ..DataIncrement::default()
        },
        CompactIncrement {
            compact_before: vec![l0],
            compact_after: vec![compacted.clone()],
            changelog_files: vec![changelog.clone()],
        },
        IndexIncrement::default(),
    );
    commit.commit(1, vec![message]).unwrap();

    let snapshot = table.snapshot_store().latest().unwrap().unwrap();
    assert_eq!(file_names(&snapshot, &key), vec![compacted.file_name]);
    assert_eq!(snapshot.changelog_files, vec![(key, changelog)]);
    assert_eq!(snapshot.stats.changelog_files, 1);
}

#[test]
fn test_missing_compaction_input_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 0);

    let never_committed = data_file(&table, &key, 0, &[kv(1, 1, 0, 10)]);
    let compacted = data_file(&table, &key, 2, &[kv(1, 1, 0, 10)]);
    let message = CommitMessage::compaction_only(
        &key,
        2,
        CompactIncrement {
            compact_before: vec![never_committed],
            compact_after: vec![compacted],
            changelog_files: Vec::new(),
        },
    );

    let err = commit.commit(1, vec![message]).unwrap_err();
    assert!(matches!(err, StrataError::CommitConflict { .. }));
    assert!(err.is_retriable());
    assert!(table.snapshot_store().latest_id().unwrap().is_none());
}

#[test]
fn test_index_files_are_tracked_per_bucket() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 0);

    let index_message = |new: &[&str], deleted: &[&str]| {
        CommitMessage::new(
            key.partition.clone(),
            key.bucket,
            2,
            DataIncrement::default(),
            CompactIncrement::default(),
            IndexIncrement {
                new_index_files: new.iter().map(|s| s.to_string()).collect(),
                deleted_index_files: deleted.iter().map(|s| s.to_string()).collect(),
            },
        )
    };

    commit.commit(1, vec![index_message(&["index-1"], &[])]).unwrap();
    commit
        .commit(2, vec![index_message(&["index-2"], &["index-1"])])
        .unwrap();

    let snapshot = table.snapshot_store().latest().unwrap().unwrap();
    assert_eq!(snapshot.buckets[&key].index_files, vec!["index-2".to_string()]);
}

// =============================================================================
// Publication
// =============================================================================

#[test]
fn test_lost_races_exhaust_retries() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let key = bucket(1, 0);

    let inner = LocalSnapshotStore::open(&dir.path().join("table")).unwrap();
    let commit = CommitCoordinator::new("racer", Arc::new(AlwaysRacingStore(inner)), 2);

    let file = data_file(&table, &key, 0, &[kv(1, 1, 0, 10)]);
    let err = commit
        .commit(1, vec![new_files_message(&key, vec![file])])
        .unwrap_err();
    assert!(matches!(err, StrataError::CommitFailed(_)));
    assert!(!err.is_retriable());
}

#[test]
fn test_concurrent_committers_all_publish() {
    let dir = TempDir::new().unwrap();
    let table = Arc::new(open_table(&dir));

    let handles: Vec<_> = (0..4i64)
        .map(|pt| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let store = table.snapshot_store();
                let commit = CommitCoordinator::new(format!("user-{}", pt), store, 20);
                let key = bucket(pt, 0);
                for id in 1..=3u64 {
                    let file = data_file(&table, &key, 0, &[kv(pt, id as i64, id, 0)]);
                    commit.commit(id, vec![new_files_message(&key, vec![file])]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let latest = table.snapshot_store().latest().unwrap().unwrap();
    assert_eq!(latest.id, 12);
    assert_eq!(latest.total_data_files(), 12);
    for pt in 0..4 {
        assert_eq!(latest.files_of(&bucket(pt, 0)).len(), 3);
    }
}

#[test]
fn test_store_recovers_latest_without_hint() {
    let dir = TempDir::new().unwrap();
    let table = open_table(&dir);
    let commit = table.new_commit();
    let key = bucket(1, 0);

    for id in 1..=2u64 {
        let file = data_file(&table, &key, 0, &[kv(1, id as i64, id, 0)]);
        commit.commit(id, vec![new_files_message(&key, vec![file])]).unwrap();
    }
    std::fs::remove_file(dir.path().join("table").join("snapshot").join("LATEST")).unwrap();

    let reopened = LocalSnapshotStore::open(&dir.path().join("table")).unwrap();
    assert_eq!(reopened.latest_id().unwrap(), Some(2));
    assert!(reopened.snapshot_path(2).exists());
}
