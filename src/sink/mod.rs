//! Sink Module
//!
//! The write-side capability driven by the checkpoint protocol, in two
//! variants selected from the table configuration:
//!
//! - [`PlainStoreWrite`]: append tables and primary-key tables without a
//!   compaction-based changelog
//! - [`LookupStoreWrite`]: primary-key tables with a lookup or
//!   full-compaction changelog producer; owns the compaction scheduler
//!
//! Also defines [`Committable`], the envelope in which commit messages
//! travel to the committing stage.

mod lookup;
mod plain;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compaction::SchedulerState;
use crate::error::Result;
use crate::metrics::WriteMetrics;
use crate::table::{BucketKey, Partition, Row};
use crate::writer::{CommitMessage, WriterCheckpoint};

pub use lookup::LookupStoreWrite;
pub use plain::PlainStoreWrite;

// =============================================================================
// Committable
// =============================================================================

/// Payload kind of a [`Committable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommittableKind {
    File,
    LogOffset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommittablePayload {
    /// File changes of one bucket
    File(CommitMessage),
    /// Position in an external log system
    LogOffset { bucket: u32, offset: u64 },
}

/// Transport envelope between the write and commit stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committable {
    identifier: u64,
    payload: CommittablePayload,
}

impl Committable {
    pub fn new(identifier: u64, payload: CommittablePayload) -> Self {
        Self {
            identifier,
            payload,
        }
    }

    pub fn file(identifier: u64, message: CommitMessage) -> Self {
        Self::new(identifier, CommittablePayload::File(message))
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn kind(&self) -> CommittableKind {
        match self.payload {
            CommittablePayload::File(_) => CommittableKind::File,
            CommittablePayload::LogOffset { .. } => CommittableKind::LogOffset,
        }
    }

    pub fn payload(&self) -> &CommittablePayload {
        &self.payload
    }

    pub fn commit_message(&self) -> Option<&CommitMessage> {
        match &self.payload {
            CommittablePayload::File(message) => Some(message),
            CommittablePayload::LogOffset { .. } => None,
        }
    }

    pub fn into_commit_message(self) -> Option<CommitMessage> {
        match self.payload {
            CommittablePayload::File(message) => Some(message),
            CommittablePayload::LogOffset { .. } => None,
        }
    }
}

// =============================================================================
// StoreWrite
// =============================================================================

/// Recovery state of a [`StoreWrite`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreWriteState {
    pub writers: Vec<WriterCheckpoint>,
    pub last_completed: Option<u64>,
    pub scheduler: SchedulerState,
}

/// Write-side capability driven by the checkpoint protocol
pub trait StoreWrite: Send {
    /// Route one row to the writer of (partition, bucket)
    fn write(&mut self, partition: Partition, bucket: u32, row: Row) -> Result<()>;

    /// Flush every writer and return this barrier's commit messages
    fn prepare_commit(&mut self, commit_identifier: u64) -> Result<Vec<CommitMessage>>;

    /// `commit_identifier` is durable downstream; expire stale writers
    fn notify_checkpoint_complete(&mut self, commit_identifier: u64) -> Result<()>;

    fn state(&self) -> StoreWriteState;

    /// Rebuild writers from `state`; `uncommitted` are messages emitted
    /// before the restart that no snapshot contains yet
    fn restore(&mut self, state: StoreWriteState, uncommitted: &[CommitMessage]) -> Result<()>;

    fn writer_count(&self) -> usize;

    fn metrics(&self) -> WriteMetrics;

    fn close(&mut self) -> Result<()>;
}

/// Fold `extra` into `messages`, merging messages of the same bucket
pub(crate) fn merge_messages(
    messages: Vec<CommitMessage>,
    extra: Vec<CommitMessage>,
) -> Result<Vec<CommitMessage>> {
    let mut order: Vec<BucketKey> = Vec::new();
    let mut by_bucket: BTreeMap<BucketKey, CommitMessage> = BTreeMap::new();

    for message in messages.into_iter().chain(extra) {
        let key = message.bucket_key();
        let merged = match by_bucket.remove(&key) {
            Some(existing) => existing.merge(message)?,
            None => {
                order.push(key.clone());
                message
            }
        };
        by_bucket.insert(key, merged);
    }

    Ok(order
        .into_iter()
        .filter_map(|key| by_bucket.remove(&key))
        .collect())
}
