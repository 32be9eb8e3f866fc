//! Shared helpers for integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;

use tempfile::TempDir;

use strata::config::ConfigBuilder;
use strata::sink::Committable;
use strata::snapshot::CommitCoordinator;
use strata::storage::FileStore;
use strata::table::KeyValue;
use strata::{
    CheckpointBarrierProtocol, CommitMessage, CommitResult, Config, Datum, Partition, Row, RowKind,
    SnapshotStore, Table, TableSchema,
};

/// Install a subscriber honoring RUST_LOG; repeated calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config rooted in `dir` with a small compaction pool
pub fn config_in(dir: &TempDir) -> ConfigBuilder {
    init_tracing();
    Config::builder()
        .data_dir(dir.path().join("table"))
        .spill_dir(dir.path().join("spill"))
        .commit_user("test-user")
        .compaction_workers(1)
}

/// (pt, k, v) with partition `pt` and primary key (pt, k)
pub fn pk_schema() -> TableSchema {
    TableSchema::new(&["pt", "k", "v"], &["pt"], &["pt", "k"]).unwrap()
}

/// (a, b) without partitions
pub fn two_column_schema(primary_key: bool) -> TableSchema {
    let pk: &[&str] = if primary_key { &["a"] } else { &[] };
    TableSchema::new(&["a", "b"], &[], pk).unwrap()
}

pub fn row(values: &[i64]) -> Row {
    Row::of(values.iter().map(|v| Datum::Int(*v)).collect())
}

pub fn row_of_kind(kind: RowKind, values: &[i64]) -> Row {
    Row::of_kind(kind, values.iter().map(|v| Datum::Int(*v)).collect())
}

/// Write `row` to bucket 0 of its partition
pub fn write(table: &Table, protocol: &mut CheckpointBarrierProtocol, row: Row) {
    let partition = table.schema().partition_of(&row).unwrap();
    protocol.write(partition, 0, row).unwrap();
}

pub fn partition(values: &[i64]) -> Partition {
    Partition::new(values.iter().map(|v| Datum::Int(*v)).collect())
}

/// prepare → snapshot → notify for one checkpoint; returns emitted committables
pub fn checkpoint(protocol: &mut CheckpointBarrierProtocol, id: u64) -> (Vec<Committable>, bytes::Bytes) {
    let committables = protocol.prepare_barrier(id).unwrap();
    let state = protocol.snapshot_state(id).unwrap();
    protocol.notify_checkpoint_complete(id).unwrap();
    (committables, state)
}

pub fn messages_of(committables: &[Committable]) -> Vec<CommitMessage> {
    committables
        .iter()
        .filter_map(|c| c.commit_message().cloned())
        .collect()
}

/// Commit every emitted message under `id`
pub fn commit_all(commit: &CommitCoordinator, committables: &[Committable], id: u64) -> CommitResult {
    commit.commit(id, messages_of(committables)).unwrap()
}

/// Commit only the flushed files, dropping compaction results
pub fn commit_append(commit: &CommitCoordinator, committables: &[Committable], id: u64) -> CommitResult {
    let messages = messages_of(committables)
        .iter()
        .map(CommitMessage::without_compaction)
        .collect();
    commit.commit(id, messages).unwrap()
}

/// Current table content as "+I[..]" strings, sorted
///
/// Merges every data file of the latest snapshot (highest sequence per key
/// wins, deletes dropped). With `compacted_only`, level-0 files are skipped,
/// which is what readers of lookup-changelog tables see.
pub fn read_table(table: &Table, compacted_only: bool) -> Vec<String> {
    let Some(snapshot) = table.snapshot_store().latest().unwrap() else {
        return Vec::new();
    };
    let fs = table.file_store();
    let keyed = table.schema().has_primary_key();

    let mut rows = Vec::new();
    for (bucket, files) in &snapshot.buckets {
        let mut merged: BTreeMap<Vec<Datum>, KeyValue> = BTreeMap::new();
        let mut appended: Vec<KeyValue> = Vec::new();
        for file in &files.data_files {
            if compacted_only && file.level == 0 {
                continue;
            }
            for record in fs.read_file(bucket, file).unwrap() {
                if !keyed {
                    appended.push(record);
                    continue;
                }
                let newer = merged
                    .get(&record.key)
                    .map_or(true, |existing| record.sequence > existing.sequence);
                if newer {
                    merged.insert(record.key.clone(), record);
                }
            }
        }
        appended.sort_by_key(|r| r.sequence);
        rows.extend(
            merged
                .into_values()
                .chain(appended)
                .filter(|r| r.kind != RowKind::Delete)
                .map(|r| r.to_row().to_string()),
        );
    }
    rows.sort();
    rows
}

/// Changelog rows added by snapshot `id`, in file order
pub fn read_changelog(table: &Table, id: u64) -> Vec<String> {
    let snapshot = table.snapshot_store().read(id).unwrap();
    let fs = table.file_store();
    let mut rows = Vec::new();
    for (bucket, file) in &snapshot.changelog_files {
        for record in fs.read_file(bucket, file).unwrap() {
            rows.push(record.to_row().to_string());
        }
    }
    rows
}

pub fn strings(rows: &[&str]) -> Vec<String> {
    let mut rows: Vec<String> = rows.iter().map(|r| r.to_string()).collect();
    rows.sort();
    rows
}
