//! Plain store write: flush on barrier, no compaction

use crate::error::Result;
use crate::metrics::WriteMetrics;
use crate::table::{Partition, Row};
use crate::writer::{CommitMessage, WriterManager};

use super::{StoreWrite, StoreWriteState};

pub struct PlainStoreWrite {
    manager: WriterManager,
    last_completed: Option<u64>,
}

impl PlainStoreWrite {
    pub fn new(manager: WriterManager) -> Self {
        Self {
            manager,
            last_completed: None,
        }
    }

    pub fn manager(&self) -> &WriterManager {
        &self.manager
    }
}

impl StoreWrite for PlainStoreWrite {
    fn write(&mut self, partition: Partition, bucket: u32, row: Row) -> Result<()> {
        self.manager.write(partition, bucket, row)
    }

    fn prepare_commit(&mut self, commit_identifier: u64) -> Result<Vec<CommitMessage>> {
        self.manager.flush_all(commit_identifier)
    }

    fn notify_checkpoint_complete(&mut self, commit_identifier: u64) -> Result<()> {
        let previous = self.last_completed.replace(commit_identifier);
        self.manager.expire_idle(previous, |_| false)?;
        Ok(())
    }

    fn state(&self) -> StoreWriteState {
        StoreWriteState {
            writers: self.manager.checkpoint(),
            last_completed: self.last_completed,
            ..StoreWriteState::default()
        }
    }

    fn restore(&mut self, state: StoreWriteState, uncommitted: &[CommitMessage]) -> Result<()> {
        self.last_completed = state.last_completed;
        self.manager.restore(&state.writers, uncommitted)
    }

    fn writer_count(&self) -> usize {
        self.manager.writer_count()
    }

    fn metrics(&self) -> WriteMetrics {
        WriteMetrics::collect(self.manager.pool(), self.manager.writer_count(), 0)
    }

    fn close(&mut self) -> Result<()> {
        self.manager.close()
    }
}
