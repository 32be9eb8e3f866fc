//! Storage Module
//!
//! Physical file layer consumed by writers, compaction and commit.
//!
//! ## Responsibilities
//! - Durably write a sorted run of records plus per-field statistics
//! - Read whole files back (compaction inputs, spill merges, tests)
//! - Point lookups against keyed files (changelog before-images)
//!
//! Everything above this module talks to [`FileStore`]; [`LocalFileStore`]
//! is the local-filesystem implementation.

pub mod data_file;
mod local;
mod stats;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::table::{BucketKey, Datum, Key, KeyValue};

pub use data_file::{DataFileBuilder, DataFileReader, WrittenFile};
pub use local::LocalFileStore;
pub use stats::StatsCollector;

/// What a file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Merged table data, visible to readers of the snapshot
    Data,
    /// Changelog rows (before/after images or raw input)
    Changelog,
}

/// Min / max / null count of one field within a file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldStats {
    pub min: Option<Datum>,
    pub max: Option<Datum>,
    pub null_count: u64,
}

/// Immutable description of a written file, as recorded in snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFileMeta {
    pub file_name: String,
    pub kind: FileKind,
    pub level: u8,
    pub row_count: u64,
    pub delete_row_count: u64,
    pub file_size: u64,
    pub min_key: Key,
    pub max_key: Key,
    pub min_sequence: u64,
    pub max_sequence: u64,
    pub value_stats: Vec<FieldStats>,
}

impl DataFileMeta {
    /// Key-range overlap check used to skip files during lookups
    pub fn may_contain(&self, key: &Key) -> bool {
        self.row_count > 0 && *key >= self.min_key && *key <= self.max_key
    }
}

/// File-writing and lookup capability
///
/// Implementations must be shareable between the ingest thread and the
/// compaction workers.
pub trait FileStore: Send + Sync {
    /// Durably write `records` as one file of `bucket`
    ///
    /// Data files of primary-key tables must receive strictly increasing keys.
    fn write_file(
        &self,
        bucket: &BucketKey,
        level: u8,
        kind: FileKind,
        records: &[KeyValue],
    ) -> Result<DataFileMeta>;

    /// Read every record of a file in file order
    fn read_file(&self, bucket: &BucketKey, file: &DataFileMeta) -> Result<Vec<KeyValue>>;

    /// Open a reader for point lookups
    fn open_reader(&self, bucket: &BucketKey, file: &DataFileMeta) -> Result<DataFileReader>;
}
