//! Commit messages
//!
//! The immutable unit of change a writer hands to the commit path: the file
//! increments of one bucket produced by one flush (and/or one compaction).

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::storage::DataFileMeta;
use crate::table::{BucketKey, Partition};

/// Files produced by flushing the write buffer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataIncrement {
    pub new_files: Vec<DataFileMeta>,
    pub deleted_files: Vec<DataFileMeta>,
    pub changelog_files: Vec<DataFileMeta>,
}

impl DataIncrement {
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.deleted_files.is_empty() && self.changelog_files.is_empty()
    }

    fn extend(&mut self, other: DataIncrement) {
        self.new_files.extend(other.new_files);
        self.deleted_files.extend(other.deleted_files);
        self.changelog_files.extend(other.changelog_files);
    }
}

/// Files rewritten by compaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactIncrement {
    pub compact_before: Vec<DataFileMeta>,
    pub compact_after: Vec<DataFileMeta>,
    pub changelog_files: Vec<DataFileMeta>,
}

impl CompactIncrement {
    pub fn is_empty(&self) -> bool {
        self.compact_before.is_empty()
            && self.compact_after.is_empty()
            && self.changelog_files.is_empty()
    }

    fn extend(&mut self, other: CompactIncrement) {
        self.compact_before.extend(other.compact_before);
        self.compact_after.extend(other.compact_after);
        self.changelog_files.extend(other.changelog_files);
    }
}

/// Index files (by name) added or removed for a bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexIncrement {
    pub new_index_files: Vec<String>,
    pub deleted_index_files: Vec<String>,
}

impl IndexIncrement {
    pub fn is_empty(&self) -> bool {
        self.new_index_files.is_empty() && self.deleted_index_files.is_empty()
    }

    fn extend(&mut self, other: IndexIncrement) {
        self.new_index_files.extend(other.new_index_files);
        self.deleted_index_files.extend(other.deleted_index_files);
    }
}

/// All changes of one bucket for one commit
///
/// Never mutated after creation; [`merge`](Self::merge) builds a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    partition: Partition,
    bucket: u32,
    total_buckets: u32,
    new_files: DataIncrement,
    compact: CompactIncrement,
    index: IndexIncrement,
}

impl CommitMessage {
    pub fn new(
        partition: Partition,
        bucket: u32,
        total_buckets: u32,
        new_files: DataIncrement,
        compact: CompactIncrement,
        index: IndexIncrement,
    ) -> Self {
        Self {
            partition,
            bucket,
            total_buckets,
            new_files,
            compact,
            index,
        }
    }

    /// A message carrying only a compaction result
    pub fn compaction_only(key: &BucketKey, total_buckets: u32, compact: CompactIncrement) -> Self {
        Self::new(
            key.partition.clone(),
            key.bucket,
            total_buckets,
            DataIncrement::default(),
            compact,
            IndexIncrement::default(),
        )
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    pub fn total_buckets(&self) -> u32 {
        self.total_buckets
    }

    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::new(self.partition.clone(), self.bucket)
    }

    pub fn new_files_increment(&self) -> &DataIncrement {
        &self.new_files
    }

    pub fn compact_increment(&self) -> &CompactIncrement {
        &self.compact
    }

    pub fn index_increment(&self) -> &IndexIncrement {
        &self.index
    }

    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.compact.is_empty() && self.index.is_empty()
    }

    /// Same message with the compaction increment stripped
    pub fn without_compaction(&self) -> Self {
        Self {
            compact: CompactIncrement::default(),
            ..self.clone()
        }
    }

    /// Combine two messages of the same bucket
    pub fn merge(self, other: CommitMessage) -> Result<Self> {
        if self.partition != other.partition || self.bucket != other.bucket {
            return Err(StrataError::Storage(format!(
                "cannot merge commit messages of {} and {}",
                self.bucket_key(),
                other.bucket_key()
            )));
        }
        if self.total_buckets != other.total_buckets {
            return Err(StrataError::Storage(format!(
                "total bucket mismatch for {}: {} vs {}",
                self.bucket_key(),
                self.total_buckets,
                other.total_buckets
            )));
        }

        let mut merged = self;
        merged.new_files.extend(other.new_files);
        merged.compact.extend(other.compact);
        merged.index.extend(other.index);
        Ok(merged)
    }
}
