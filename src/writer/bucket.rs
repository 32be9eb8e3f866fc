//! Bucket Writer
//!
//! Owns the write buffer and file view of one (partition, bucket).
//!
//! ## Flush Flow
//! ```text
//!   WriteBuffer ──drain_sorted──► merge by key ──► level-0 data file
//!        │                                            │
//!        └──(input changelog)──► changelog file ──────┴──► pending DataIncrement
//! ```
//!
//! Pending increments accumulate across preemption flushes and are handed
//! out as one [`CommitMessage`] at the next barrier.

use std::sync::Arc;

use crate::buffer::WriteBuffer;
use crate::compaction::Levels;
use crate::config::ChangelogProducer;
use crate::error::Result;
use crate::memory::{WriteBufferPool, WriterId};
use crate::storage::{DataFileMeta, FileKind, FileStore};
use crate::table::{BucketKey, Key, KeyValue, Row, RowKind};

use super::{CommitMessage, CompactIncrement, DataIncrement, IndexIncrement, WriterState};

/// Table-level settings shared by every writer of a manager
#[derive(Debug, Clone, Copy)]
pub struct WriterSettings {
    pub total_buckets: u32,
    /// Merge rows by primary key on flush
    pub keyed: bool,
    pub changelog_producer: ChangelogProducer,
}

/// Writer of one bucket
pub struct Writer {
    id: WriterId,
    key: BucketKey,
    total_buckets: u32,
    pool: Arc<WriteBufferPool>,
    buffer: WriteBuffer,
    /// Whether rows are merged by primary key on flush
    keyed: bool,
    changelog_producer: ChangelogProducer,
    state: WriterState,
    levels: Levels,
    /// Flushed files not yet emitted in a commit message
    pending: DataIncrement,
    next_sequence: u64,
    last_modified_commit: Option<u64>,
}

impl Writer {
    pub fn new(
        id: WriterId,
        key: BucketKey,
        settings: WriterSettings,
        pool: Arc<WriteBufferPool>,
        buffer: WriteBuffer,
        levels: Levels,
    ) -> Self {
        let next_sequence = levels.max_sequence().map_or(0, |s| s + 1);
        Self {
            id,
            key,
            total_buckets: settings.total_buckets,
            pool,
            buffer,
            keyed: settings.keyed,
            changelog_producer: settings.changelog_producer,
            state: WriterState::Idle,
            levels,
            pending: DataIncrement::default(),
            next_sequence,
            last_modified_commit: None,
        }
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Pool bytes to reserve before a row of `size` bytes fits
    pub fn reservation_needed(&self, size: u64) -> u64 {
        self.buffer.reservation_needed(size)
    }

    /// Record pages granted by the pool
    pub fn grant(&mut self, bytes: u64) {
        self.buffer.grant(bytes);
    }

    /// Buffer a row whose memory has been reserved
    pub fn add(&mut self, key: Key, row: Row, size: u64) -> Result<()> {
        let record = KeyValue {
            key,
            sequence: self.next_sequence,
            kind: row.kind,
            values: row.values,
        };
        self.buffer.add(record, size)?;
        self.next_sequence += 1;
        self.state = WriterState::Active;
        Ok(())
    }

    /// Free this writer's buffer memory: spill when allowed, flush otherwise
    ///
    /// Returns the bytes given back to the pool.
    pub fn reclaim(&mut self, fs: &dyn FileStore) -> Result<u64> {
        if self.buffer.can_spill() {
            let freed = self.buffer.spill()?;
            self.pool.release(self.id, freed);
            return Ok(freed);
        }
        self.flush_buffer(fs)
    }

    /// Write buffered rows to level 0 and stage the files for the next commit
    ///
    /// Returns the bytes given back to the pool.
    pub fn flush_buffer(&mut self, fs: &dyn FileStore) -> Result<u64> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let (records, freed) = self.buffer.drain_sorted()?;
        self.pool.release(self.id, freed);

        if self.changelog_producer == ChangelogProducer::Input {
            let mut input = records.clone();
            input.sort_by_key(|r| r.sequence);
            let changelog = fs.write_file(&self.key, 0, FileKind::Changelog, &input)?;
            self.pending.changelog_files.push(changelog);
        }

        let merged = if self.keyed {
            merge_by_key(records)
        } else {
            records
        };

        let file = fs.write_file(&self.key, 0, FileKind::Data, &merged)?;
        tracing::debug!(
            bucket = %self.key,
            file = %file.file_name,
            rows = file.row_count,
            bytes = freed,
            "flushed write buffer"
        );
        self.levels.add(file.clone());
        self.pending.new_files.push(file);
        Ok(freed)
    }

    /// Flush and hand out everything produced since the last barrier
    ///
    /// Writers with nothing new return `None`.
    pub fn prepare_commit(
        &mut self,
        fs: &dyn FileStore,
        commit_identifier: u64,
    ) -> Result<Option<CommitMessage>> {
        self.flush_buffer(fs)?;
        self.state = WriterState::Idle;

        if self.pending.is_empty() {
            return Ok(None);
        }

        let increment = std::mem::take(&mut self.pending);
        self.last_modified_commit = Some(commit_identifier);
        Ok(Some(CommitMessage::new(
            self.key.partition.clone(),
            self.key.bucket,
            self.total_buckets,
            increment,
            CompactIncrement::default(),
            IndexIncrement::default(),
        )))
    }

    /// Drop the buffer and leave the pool
    pub fn expire(&mut self) -> Result<()> {
        let freed = self.buffer.discard()?;
        self.pool.release(self.id, freed);
        self.pool.unregister(self.id);
        self.state = WriterState::Expired;
        Ok(())
    }

    // =========================================================================
    // Compaction Hooks
    // =========================================================================

    /// Swap compaction inputs for outputs in the file view
    pub fn apply_compaction(&mut self, compact: &CompactIncrement, commit_identifier: u64) {
        self.levels
            .apply_compaction(&compact.compact_before, &compact.compact_after);
        self.mark_modified(commit_identifier);
    }

    pub fn mark_modified(&mut self, commit_identifier: u64) {
        self.last_modified_commit = Some(
            self.last_modified_commit
                .map_or(commit_identifier, |m| m.max(commit_identifier)),
        );
    }

    // =========================================================================
    // Restore
    // =========================================================================

    pub(super) fn restore_progress(&mut self, next_sequence: u64, last_modified_commit: Option<u64>) {
        self.next_sequence = self.next_sequence.max(next_sequence);
        self.last_modified_commit = last_modified_commit;
    }

    /// Re-add files emitted before a restart but not yet committed
    pub(super) fn restore_files(&mut self, files: impl IntoIterator<Item = DataFileMeta>) {
        for file in files {
            if file.row_count > 0 {
                self.next_sequence = self.next_sequence.max(file.max_sequence + 1);
            }
            self.levels.add(file);
        }
    }

    pub(super) fn restore_compaction(&mut self, compact: &CompactIncrement) {
        self.levels
            .apply_compaction(&compact.compact_before, &compact.compact_after);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> WriterId {
        self.id
    }

    pub fn key(&self) -> &BucketKey {
        &self.key
    }

    pub fn total_buckets(&self) -> u32 {
        self.total_buckets
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn levels(&self) -> &Levels {
        &self.levels
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn last_modified_commit(&self) -> Option<u64> {
        self.last_modified_commit
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffer.in_memory_count() + self.buffer.spilled_count()
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.buffer.reserved_bytes()
    }

    /// Unflushed rows or flushed-but-unemitted files
    pub fn has_pending_data(&self) -> bool {
        !self.buffer.is_empty() || !self.pending.is_empty()
    }
}

/// Keep the newest record per key; retractions become delete records
///
/// Input must be sorted by (key, sequence).
fn merge_by_key(records: Vec<KeyValue>) -> Vec<KeyValue> {
    let mut merged: Vec<KeyValue> = Vec::with_capacity(records.len());
    for record in records {
        let record = normalize(record);
        match merged.last_mut() {
            Some(last) if last.key == record.key => *last = record,
            _ => merged.push(record),
        }
    }
    merged
}

fn normalize(mut record: KeyValue) -> KeyValue {
    record.kind = if record.kind.is_retract() {
        RowKind::Delete
    } else {
        RowKind::Insert
    };
    record
}
