//! Snapshot Module
//!
//! Versioned, immutable views of the table's file set and the commit path
//! that produces them.
//!
//! ## Responsibilities
//! - Describe one table version: full file map plus the delta that made it
//! - Publish new versions atomically through a [`SnapshotStore`]
//! - Turn batches of [`CommitMessage`]s into snapshots exactly once per
//!   commit identifier ([`CommitCoordinator`])
//!
//! ## Snapshot Chain
//! ```text
//!   snapshot-1 ◄── snapshot-2 ◄── snapshot-3      LATEST → 3
//!   (parent)       (parent)
//! ```

mod commit;
mod local;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::DataFileMeta;
use crate::table::BucketKey;
use crate::writer::CommitMessage;

pub use commit::{CommitCoordinator, CommitResult, CommitStats};
pub use local::LocalSnapshotStore;

/// Files of one bucket as of a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketFiles {
    pub total_buckets: u32,
    pub data_files: Vec<DataFileMeta>,
    pub index_files: Vec<String>,
}

/// An immutable table version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: u64,
    pub parent: Option<u64>,
    pub commit_user: String,
    pub commit_identifier: u64,
    pub time_millis: u64,
    /// Complete file set of the table
    pub buckets: BTreeMap<BucketKey, BucketFiles>,
    /// Changelog files added by this commit only
    pub changelog_files: Vec<(BucketKey, DataFileMeta)>,
    /// Per-bucket messages applied by this commit
    pub delta: Vec<CommitMessage>,
    pub stats: CommitStats,
}

impl Snapshot {
    /// Data files of `bucket`; empty when the bucket has none
    pub fn files_of(&self, bucket: &BucketKey) -> Vec<DataFileMeta> {
        self.buckets
            .get(bucket)
            .map(|b| b.data_files.clone())
            .unwrap_or_default()
    }

    /// Buckets changed by this commit
    pub fn touched_buckets(&self) -> BTreeSet<BucketKey> {
        self.delta.iter().map(CommitMessage::bucket_key).collect()
    }

    pub fn total_data_files(&self) -> usize {
        self.buckets.values().map(|b| b.data_files.len()).sum()
    }
}

/// Snapshot publication and lookup capability
pub trait SnapshotStore: Send + Sync {
    /// Id of the newest published snapshot
    fn latest_id(&self) -> Result<Option<u64>>;

    fn read(&self, id: u64) -> Result<Snapshot>;

    /// Publish `snapshot` under its id
    ///
    /// Returns false, leaving the store untouched, when another committer
    /// already published that id.
    fn try_publish(&self, snapshot: &Snapshot) -> Result<bool>;

    fn latest(&self) -> Result<Option<Snapshot>> {
        match self.latest_id()? {
            Some(id) => Ok(Some(self.read(id)?)),
            None => Ok(None),
        }
    }

    /// Snapshot committed by `user` with `identifier`, newest first scan
    fn find_by_commit(&self, user: &str, identifier: u64) -> Result<Option<Snapshot>> {
        let mut next = self.latest_id()?;
        while let Some(id) = next {
            let snapshot = self.read(id)?;
            if snapshot.commit_user == user {
                if snapshot.commit_identifier == identifier {
                    return Ok(Some(snapshot));
                }
                // Identifiers only grow per user.
                if snapshot.commit_identifier < identifier {
                    return Ok(None);
                }
            }
            next = snapshot.parent;
        }
        Ok(None)
    }

    /// Highest identifier ever committed by `user`
    fn latest_commit_of_user(&self, user: &str) -> Result<Option<u64>> {
        let mut next = self.latest_id()?;
        while let Some(id) = next {
            let snapshot = self.read(id)?;
            if snapshot.commit_user == user {
                return Ok(Some(snapshot.commit_identifier));
            }
            next = snapshot.parent;
        }
        Ok(None)
    }
}
