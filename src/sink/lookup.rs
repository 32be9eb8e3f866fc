//! Lookup store write
//!
//! Flushes like the plain variant, then drives the changelog compaction
//! scheduler at every barrier.
//!
//! ## Barrier Flow
//! ```text
//!   prepare_commit(n)
//!     ├── flush all writers            ──► flush messages
//!     ├── drain finished compactions   ──► compaction messages
//!     ├── plan + submit new tasks
//!     ├── (wait) block until idle      ──► compaction messages
//!     └── merge per bucket
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::compaction::{BucketView, ChangelogCompactionScheduler, CompactionResult};
use crate::config::Config;
use crate::error::Result;
use crate::metrics::WriteMetrics;
use crate::table::{BucketKey, Partition, Row};
use crate::writer::{CommitMessage, WriterManager};

use super::{merge_messages, StoreWrite, StoreWriteState};

pub struct LookupStoreWrite {
    manager: WriterManager,
    scheduler: ChangelogCompactionScheduler,
    last_completed: Option<u64>,
}

impl LookupStoreWrite {
    pub fn new(config: &Config, manager: WriterManager) -> Result<Self> {
        let scheduler = ChangelogCompactionScheduler::start(config, Arc::clone(manager.file_store()))?;
        Ok(Self {
            manager,
            scheduler,
            last_completed: None,
        })
    }

    pub fn manager(&self) -> &WriterManager {
        &self.manager
    }

    pub fn scheduler(&self) -> &ChangelogCompactionScheduler {
        &self.scheduler
    }

    /// Fold finished compactions into writer views and build their messages
    fn apply_results(
        &mut self,
        results: Vec<CompactionResult>,
        commit_identifier: u64,
    ) -> Result<Vec<CommitMessage>> {
        let mut messages = Vec::with_capacity(results.len());
        for result in results {
            self.manager
                .apply_compaction(&result.key, &result.increment, commit_identifier)?;
            messages.push(CommitMessage::compaction_only(
                &result.key,
                result.total_buckets,
                result.increment,
            ));
        }
        Ok(messages)
    }

    fn bucket_views(&self) -> Vec<BucketView> {
        self.manager
            .keys()
            .filter_map(|key| self.manager.writer(key))
            .map(|writer| BucketView {
                key: writer.key().clone(),
                total_buckets: writer.total_buckets(),
                levels: writer.levels().clone(),
            })
            .collect()
    }
}

impl StoreWrite for LookupStoreWrite {
    fn write(&mut self, partition: Partition, bucket: u32, row: Row) -> Result<()> {
        let key = BucketKey::new(partition.clone(), bucket);
        let existed = self.manager.contains(&key);
        let written = self.manager.write(partition, bucket, row);

        // The writer may outlive a rejected row; count it either way.
        if !existed && self.manager.contains(&key) {
            self.scheduler.on_writer_created(&key);
        }
        written
    }

    fn prepare_commit(&mut self, commit_identifier: u64) -> Result<Vec<CommitMessage>> {
        let flushed = self.manager.flush_all(commit_identifier)?;

        let drained = self.scheduler.collect(false)?;
        let mut compacted = self.apply_results(drained, commit_identifier)?;

        let views = self.bucket_views();
        let started = self.scheduler.submit(commit_identifier, &views)?;

        if self.scheduler.waits() && self.scheduler.in_flight() > 0 {
            tracing::debug!(
                checkpoint = commit_identifier,
                started,
                in_flight = self.scheduler.in_flight(),
                "waiting for compaction"
            );
            let waited = self.scheduler.collect(true)?;
            compacted.extend(self.apply_results(waited, commit_identifier)?);
        }

        merge_messages(flushed, compacted)
    }

    fn notify_checkpoint_complete(&mut self, commit_identifier: u64) -> Result<()> {
        let previous = self.last_completed.replace(commit_identifier);

        // Level-0 files still owe their changelog; keep their writers.
        let unsettled: BTreeSet<BucketKey> = self
            .manager
            .keys()
            .filter(|key| {
                self.manager
                    .writer(key)
                    .is_some_and(|w| w.levels().level0_count() > 0)
            })
            .cloned()
            .collect();

        let scheduler = &self.scheduler;
        let expired = self.manager.expire_idle(previous, |key| {
            scheduler.is_busy(key) || unsettled.contains(key)
        })?;
        for key in &expired {
            self.scheduler.on_writer_expired(key);
        }
        Ok(())
    }

    fn state(&self) -> StoreWriteState {
        StoreWriteState {
            writers: self.manager.checkpoint(),
            last_completed: self.last_completed,
            scheduler: self.scheduler.state(),
        }
    }

    fn restore(&mut self, state: StoreWriteState, uncommitted: &[CommitMessage]) -> Result<()> {
        self.last_completed = state.last_completed;
        self.manager.restore(&state.writers, uncommitted)?;

        // Restored writers are created eagerly and count as new writers.
        let keys: Vec<BucketKey> = self.manager.keys().cloned().collect();
        for key in &keys {
            self.scheduler.on_writer_created(key);
        }
        self.scheduler.restore(state.scheduler);
        Ok(())
    }

    fn writer_count(&self) -> usize {
        self.manager.writer_count()
    }

    fn metrics(&self) -> WriteMetrics {
        WriteMetrics::collect(
            self.manager.pool(),
            self.manager.writer_count(),
            self.scheduler.in_flight(),
        )
    }

    fn close(&mut self) -> Result<()> {
        self.scheduler.close();
        self.manager.close()
    }
}
