//! Data file and local file store tests

use std::fs;

use tempfile::TempDir;

use strata::storage::{DataFileMeta, FileKind, FileStore, LocalFileStore};
use strata::table::KeyValue;
use strata::{BucketKey, Datum, Partition, RowKind, StrataError, TableSchema};

// =============================================================================
// Helper Functions
// =============================================================================

fn schema() -> TableSchema {
    TableSchema::new(&["pt", "k", "v"], &["pt"], &["pt", "k"]).unwrap()
}

fn bucket() -> BucketKey {
    BucketKey::new(Partition::new(vec![Datum::Int(1)]), 0)
}

fn record(k: i64, sequence: u64, kind: RowKind, v: Datum) -> KeyValue {
    KeyValue {
        key: vec![Datum::Int(1), Datum::Int(k)],
        sequence,
        kind,
        values: vec![Datum::Int(1), Datum::Int(k), v],
    }
}

fn store(dir: &TempDir, stats: bool) -> LocalFileStore {
    LocalFileStore::new(dir.path(), schema(), stats)
}

fn sample() -> Vec<KeyValue> {
    vec![
        record(1, 0, RowKind::Insert, Datum::Int(100)),
        record(2, 3, RowKind::Delete, Datum::Null),
        record(5, 1, RowKind::Insert, Datum::Int(500)),
    ]
}

// =============================================================================
// Write / Read
// =============================================================================

#[test]
fn test_write_and_read_file() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, true);

    let meta = store.write_file(&bucket(), 0, FileKind::Data, &sample()).unwrap();
    assert_eq!(meta.kind, FileKind::Data);
    assert_eq!(meta.level, 0);
    assert_eq!(meta.row_count, 3);
    assert_eq!(meta.delete_row_count, 1);
    assert_eq!(meta.min_sequence, 0);
    assert_eq!(meta.max_sequence, 3);
    assert_eq!(meta.min_key, vec![Datum::Int(1), Datum::Int(1)]);
    assert_eq!(meta.max_key, vec![Datum::Int(1), Datum::Int(5)]);
    assert!(meta.file_size > 0);
    assert!(store.file_path(&bucket(), &meta).exists());

    assert_eq!(store.read_file(&bucket(), &meta).unwrap(), sample());
}

#[test]
fn test_files_land_in_partition_bucket_directory() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);

    let meta = store.write_file(&bucket(), 0, FileKind::Data, &sample()).unwrap();
    let expected = dir.path().join("pt=1").join("bucket-0");
    assert_eq!(store.bucket_dir(&bucket()), expected);
    assert!(expected.join(&meta.file_name).exists());
}

#[test]
fn test_file_ids_increase_per_bucket() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);

    let first = store.write_file(&bucket(), 0, FileKind::Data, &sample()).unwrap();
    let second = store
        .write_file(&bucket(), 0, FileKind::Changelog, &sample())
        .unwrap();
    let third = store.write_file(&bucket(), 1, FileKind::Data, &sample()).unwrap();

    assert_eq!(first.file_name, "data-000001.dat");
    assert_eq!(second.file_name, "changelog-000002.dat");
    assert_eq!(third.file_name, "data-000003.dat");
}

#[test]
fn test_new_store_continues_after_existing_files() {
    let dir = TempDir::new().unwrap();
    store(&dir, false)
        .write_file(&bucket(), 0, FileKind::Data, &sample())
        .unwrap();

    let reopened = store(&dir, false);
    let meta = reopened
        .write_file(&bucket(), 0, FileKind::Data, &sample())
        .unwrap();
    assert_eq!(meta.file_name, "data-000002.dat");
}

// =============================================================================
// Statistics
// =============================================================================

#[test]
fn test_value_stats_collected_when_enabled() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, true);

    let meta = store.write_file(&bucket(), 0, FileKind::Data, &sample()).unwrap();
    assert_eq!(meta.value_stats.len(), 3);

    let v = &meta.value_stats[2];
    assert_eq!(v.min, Some(Datum::Int(100)));
    assert_eq!(v.max, Some(Datum::Int(500)));
    assert_eq!(v.null_count, 1);
}

#[test]
fn test_value_stats_empty_when_disabled() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);

    let meta = store.write_file(&bucket(), 0, FileKind::Data, &sample()).unwrap();
    assert!(meta.value_stats.is_empty());
}

// =============================================================================
// Keyed Files
// =============================================================================

#[test]
fn test_keyed_data_file_rejects_unsorted_keys() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);

    let records = vec![
        record(2, 0, RowKind::Insert, Datum::Int(1)),
        record(1, 1, RowKind::Insert, Datum::Int(2)),
    ];
    let result = store.write_file(&bucket(), 0, FileKind::Data, &records);
    assert!(matches!(result, Err(StrataError::Storage(_))));
}

#[test]
fn test_changelog_file_accepts_repeated_keys() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);

    let records = vec![
        record(1, 0, RowKind::UpdateBefore, Datum::Int(1)),
        record(1, 0, RowKind::UpdateAfter, Datum::Int(2)),
    ];
    let meta = store
        .write_file(&bucket(), 0, FileKind::Changelog, &records)
        .unwrap();
    assert_eq!(store.read_file(&bucket(), &meta).unwrap(), records);
}

#[test]
fn test_point_lookup() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);
    let meta = store.write_file(&bucket(), 1, FileKind::Data, &sample()).unwrap();

    let mut reader = store.open_reader(&bucket(), &meta).unwrap();
    assert!(reader.is_keyed());
    assert_eq!(reader.row_count(), 3);

    let found = reader.get(&vec![Datum::Int(1), Datum::Int(5)]).unwrap();
    assert_eq!(found, Some(record(5, 1, RowKind::Insert, Datum::Int(500))));

    // Delete records are returned as stored
    let deleted = reader.get(&vec![Datum::Int(1), Datum::Int(2)]).unwrap();
    assert_eq!(deleted.map(|r| r.kind), Some(RowKind::Delete));

    assert_eq!(reader.get(&vec![Datum::Int(1), Datum::Int(3)]).unwrap(), None);
    assert!(reader.might_contain(&vec![Datum::Int(1), Datum::Int(3)]));
    assert!(!reader.might_contain(&vec![Datum::Int(2), Datum::Int(0)]));
}

#[test]
fn test_meta_key_range_check() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);
    let meta: DataFileMeta = store.write_file(&bucket(), 0, FileKind::Data, &sample()).unwrap();

    assert!(meta.may_contain(&vec![Datum::Int(1), Datum::Int(3)]));
    assert!(!meta.may_contain(&vec![Datum::Int(1), Datum::Int(6)]));
}

#[test]
fn test_iterator_yields_records_in_file_order() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);
    let meta = store.write_file(&bucket(), 0, FileKind::Data, &sample()).unwrap();

    let mut reader = store.open_reader(&bucket(), &meta).unwrap();
    let sequences: Vec<u64> = reader
        .iter()
        .unwrap()
        .map(|r| r.unwrap().sequence)
        .collect();
    assert_eq!(sequences, vec![0, 3, 1]);
}

// =============================================================================
// Corruption
// =============================================================================

#[test]
fn test_flipped_data_byte_is_detected() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);
    let meta = store.write_file(&bucket(), 0, FileKind::Data, &sample()).unwrap();
    let path = store.file_path(&bucket(), &meta);

    let mut bytes = fs::read(&path).unwrap();
    // Last byte of the first record: high byte of its i64 value
    let len = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]) as usize;
    bytes[18 + len - 1] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let result = store.read_file(&bucket(), &meta);
    assert!(matches!(result, Err(StrataError::Corruption(_))));
}

#[test]
fn test_bad_magic_is_detected() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);
    let meta = store.write_file(&bucket(), 0, FileKind::Data, &sample()).unwrap();
    let path = store.file_path(&bucket(), &meta);

    let mut bytes = fs::read(&path).unwrap();
    bytes[0] = b'X';
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        store.open_reader(&bucket(), &meta),
        Err(StrataError::Corruption(_))
    ));
}

#[test]
fn test_oversized_length_prefix_is_detected() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);
    let meta = store.write_file(&bucket(), 0, FileKind::Data, &sample()).unwrap();
    let path = store.file_path(&bucket(), &meta);

    let mut bytes = fs::read(&path).unwrap();
    bytes[14..18].copy_from_slice(&u32::MAX.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        store.read_file(&bucket(), &meta),
        Err(StrataError::Corruption(_))
    ));

    let mut reader = store.open_reader(&bucket(), &meta).unwrap();
    let first = reader.get(&vec![Datum::Int(1), Datum::Int(1)]);
    assert!(matches!(first, Err(StrataError::Corruption(_))));
    let mut records = reader.iter().unwrap();
    assert!(matches!(records.next(), Some(Err(StrataError::Corruption(_)))));
    assert!(records.next().is_none());
}

#[test]
fn test_inflated_row_count_does_not_affect_reads() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir, false);
    let meta = store.write_file(&bucket(), 0, FileKind::Data, &sample()).unwrap();
    let path = store.file_path(&bucket(), &meta);

    let mut bytes = fs::read(&path).unwrap();
    bytes[6..14].copy_from_slice(&u64::MAX.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    assert_eq!(store.read_file(&bucket(), &meta).unwrap(), sample());
}
