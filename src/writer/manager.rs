//! Writer Manager
//!
//! Owning arena of bucket writers keyed by (partition, bucket).
//!
//! ## Responsibilities
//! - Create writers lazily, seeding their file view from the latest snapshot
//! - Reserve pool memory for every row, reclaiming from a victim writer of
//!   this manager when the budget is exhausted
//! - Flush every writer at a barrier
//! - Expire writers one full checkpoint cycle after their last change
//!
//! ## Concurrency
//! Driven by the single ingestion thread. The pool it draws from may be
//! shared with other managers, but victims are only chosen from this
//! manager's own pool group.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::WriteBuffer;
use crate::compaction::Levels;
use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::memory::{PoolGroup, WriteBufferPool, WriterId};
use crate::snapshot::SnapshotStore;
use crate::storage::FileStore;
use crate::table::{BucketKey, Partition, Row, TableSchema};

use super::{CommitMessage, CompactIncrement, Writer, WriterSettings, WriterState};

/// Recovery metadata of one writer
///
/// Buffers are always empty at a snapshot (the barrier flushed them), so
/// only progress counters need to survive a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterCheckpoint {
    pub key: BucketKey,
    pub total_buckets: u32,
    pub next_sequence: u64,
    pub last_modified_commit: Option<u64>,
}

/// Arena of writers for one write task
pub struct WriterManager {
    schema: TableSchema,
    settings: WriterSettings,
    page_size: u64,
    spillable: bool,
    spill_dir: PathBuf,
    pool: Arc<WriteBufferPool>,
    group: PoolGroup,
    fs: Arc<dyn FileStore>,
    snapshots: Arc<dyn SnapshotStore>,
    writers: BTreeMap<BucketKey, Writer>,
    owners: HashMap<WriterId, BucketKey>,
}

impl WriterManager {
    pub fn new(
        config: &Config,
        schema: TableSchema,
        pool: Arc<WriteBufferPool>,
        fs: Arc<dyn FileStore>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        let group = pool.new_group();
        Self {
            settings: WriterSettings {
                total_buckets: config.total_buckets,
                keyed: schema.has_primary_key(),
                changelog_producer: config.changelog_producer,
            },
            schema,
            page_size: pool.page_size(),
            spillable: config.write_buffer_spillable,
            spill_dir: config.spill_dir.clone(),
            pool,
            group,
            fs,
            snapshots,
            writers: BTreeMap::new(),
            owners: HashMap::new(),
        }
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Route a row to its writer, reserving buffer memory first
    pub fn write(&mut self, partition: Partition, bucket: u32, row: Row) -> Result<()> {
        if bucket >= self.settings.total_buckets {
            return Err(StrataError::Storage(format!(
                "bucket {} out of range for {} buckets",
                bucket, self.settings.total_buckets
            )));
        }
        let key = self.schema.key_of(&row)?;
        let size = row.estimated_size();
        let bucket_key = BucketKey::new(partition, bucket);
        self.ensure_writer(&bucket_key)?;

        loop {
            let (owner, needed) = {
                let writer = self.writer_of(&bucket_key)?;
                (writer.id(), writer.reservation_needed(size))
            };
            if needed == 0 {
                self.pool.touch(owner);
                break;
            }

            let writers = &mut self.writers;
            let owners = &self.owners;
            let fs = self.fs.as_ref();
            self.pool.reserve(owner, needed, |victim| {
                let victim_key = owners
                    .get(&victim)
                    .ok_or_else(|| StrataError::Storage(format!("{} has no writer", victim)))?;
                match writers.get_mut(victim_key) {
                    Some(writer) => writer.reclaim(fs),
                    None => Ok(0),
                }
            })?;

            // A self-preemption may have emptied the buffer; the loop re-checks.
            self.writer_mut(&bucket_key)?.grant(needed);
        }

        self.writer_mut(&bucket_key)?.add(key, row, size)
    }

    /// Flush every writer and collect one message per writer that changed
    ///
    /// Any failure aborts the whole barrier; no partial message list leaves
    /// this method.
    pub fn flush_all(&mut self, commit_identifier: u64) -> Result<Vec<CommitMessage>> {
        let mut messages = Vec::new();
        for writer in self.writers.values_mut() {
            if let Some(message) = writer.prepare_commit(self.fs.as_ref(), commit_identifier)? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create the writer of `key` if it does not exist yet
    ///
    /// Returns true when a writer was created.
    pub fn ensure_writer(&mut self, key: &BucketKey) -> Result<bool> {
        if self.writers.contains_key(key) {
            return Ok(false);
        }

        let levels = match self.snapshots.latest()? {
            Some(snapshot) => Levels::from_files(snapshot.files_of(key)),
            None => Levels::default(),
        };
        let id = self.pool.register(self.group);
        let buffer = WriteBuffer::new(
            self.settings.keyed,
            self.page_size,
            self.spillable,
            self.spill_dir.clone(),
        );

        tracing::debug!(bucket = %key, writer = %id, files = levels.files().len(), "created writer");
        let writer = Writer::new(
            id,
            key.clone(),
            self.settings,
            Arc::clone(&self.pool),
            buffer,
            levels,
        );
        self.owners.insert(id, key.clone());
        self.writers.insert(key.clone(), writer);
        Ok(true)
    }

    /// Expire idle writers whose last change predates `previous_completed`
    ///
    /// `previous_completed` is the checkpoint completed before the one being
    /// acknowledged, so a writer survives exactly one extra cycle. Writers for
    /// which `is_busy` holds (compaction in flight) are kept.
    pub fn expire_idle<F>(
        &mut self,
        previous_completed: Option<u64>,
        is_busy: F,
    ) -> Result<Vec<BucketKey>>
    where
        F: Fn(&BucketKey) -> bool,
    {
        let Some(previous) = previous_completed else {
            return Ok(Vec::new());
        };

        let expired: Vec<BucketKey> = self
            .writers
            .iter()
            .filter(|(key, writer)| {
                writer.state() == WriterState::Idle
                    && !writer.has_pending_data()
                    && !is_busy(*key)
                    && writer.last_modified_commit().map_or(true, |m| m < previous)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(mut writer) = self.writers.remove(key) {
                self.owners.remove(&writer.id());
                writer.expire()?;
                tracing::debug!(
                    bucket = %key,
                    last_modified = ?writer.last_modified_commit(),
                    "expired idle writer"
                );
            }
        }
        Ok(expired)
    }

    /// Swap compaction inputs for outputs in a writer's file view
    pub fn apply_compaction(
        &mut self,
        key: &BucketKey,
        compact: &CompactIncrement,
        commit_identifier: u64,
    ) -> Result<()> {
        self.ensure_writer(key)?;
        self.writer_mut(key)?.apply_compaction(compact, commit_identifier);
        Ok(())
    }

    /// Expire every writer and return its memory
    ///
    /// Every writer gives its reservation back even when discarding another
    /// writer's spill files fails; the first such error is returned.
    pub fn close(&mut self) -> Result<()> {
        let mut first_error = None;
        for (key, mut writer) in std::mem::take(&mut self.writers) {
            if let Err(e) = writer.expire() {
                self.pool.unregister(writer.id());
                tracing::warn!(bucket = %key, error = %e, "failed to discard writer buffer");
                first_error.get_or_insert(e);
            }
        }
        self.owners.clear();
        first_error.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Checkpoint / Restore
    // =========================================================================

    pub fn checkpoint(&self) -> Vec<WriterCheckpoint> {
        self.writers
            .values()
            .map(|w| WriterCheckpoint {
                key: w.key().clone(),
                total_buckets: w.total_buckets(),
                next_sequence: w.next_sequence(),
                last_modified_commit: w.last_modified_commit(),
            })
            .collect()
    }

    /// Recreate writers from checkpoint metadata
    ///
    /// `uncommitted` holds messages emitted before the restart that may not
    /// have reached a snapshot yet; their files are folded into the file
    /// view so later compactions see them.
    pub fn restore(
        &mut self,
        checkpoints: &[WriterCheckpoint],
        uncommitted: &[CommitMessage],
    ) -> Result<()> {
        for checkpoint in checkpoints {
            if checkpoint.total_buckets != self.settings.total_buckets {
                return Err(StrataError::Config(format!(
                    "restored writer for {} has {} buckets, table has {}",
                    checkpoint.key, checkpoint.total_buckets, self.settings.total_buckets
                )));
            }
            self.ensure_writer(&checkpoint.key)?;
            self.writer_mut(&checkpoint.key)?
                .restore_progress(checkpoint.next_sequence, checkpoint.last_modified_commit);
        }

        for message in uncommitted {
            let key = message.bucket_key();
            self.ensure_writer(&key)?;
            let writer = self.writer_mut(&key)?;
            writer.restore_files(message.new_files_increment().new_files.iter().cloned());
            writer.restore_compaction(message.compact_increment());
        }

        tracing::info!(writers = self.writers.len(), "restored writers");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn writer(&self, key: &BucketKey) -> Option<&Writer> {
        self.writers.get(key)
    }

    pub fn contains(&self, key: &BucketKey) -> bool {
        self.writers.contains_key(key)
    }

    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &BucketKey> {
        self.writers.keys()
    }

    pub fn pool(&self) -> &Arc<WriteBufferPool> {
        &self.pool
    }

    pub fn file_store(&self) -> &Arc<dyn FileStore> {
        &self.fs
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn writer_of(&self, key: &BucketKey) -> Result<&Writer> {
        self.writers
            .get(key)
            .ok_or_else(|| StrataError::Storage(format!("no writer for {}", key)))
    }

    fn writer_mut(&mut self, key: &BucketKey) -> Result<&mut Writer> {
        self.writers
            .get_mut(key)
            .ok_or_else(|| StrataError::Storage(format!("no writer for {}", key)))
    }
}

impl Drop for WriterManager {
    /// A task dropped without `close()` still returns its memory to the
    /// shared pool
    fn drop(&mut self) {
        if self.writers.is_empty() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "writers released with errors on drop");
        }
    }
}
