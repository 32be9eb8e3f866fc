//! Table Module
//!
//! Row model, partition/bucket identity and the [`Table`] handle that wires
//! stores, pool, writers and committer together for one table.

mod partition;
mod schema;

use std::fs;
use std::sync::Arc;

use crate::checkpoint::CheckpointBarrierProtocol;
use crate::config::{ChangelogProducer, Config};
use crate::error::{Result, StrataError};
use crate::memory::WriteBufferPool;
use crate::sink::{LookupStoreWrite, PlainStoreWrite, StoreWrite};
use crate::snapshot::{CommitCoordinator, LocalSnapshotStore, SnapshotStore};
use crate::storage::{FileStore, LocalFileStore};
use crate::writer::WriterManager;

pub use partition::{BucketKey, Partition};
pub use schema::{Datum, Key, KeyValue, Row, RowKind, TableSchema, ROW_HEADER_BYTES};

/// Handle to one table on local storage
///
/// Write tasks opened from the same handle share one write buffer pool.
pub struct Table {
    config: Config,
    schema: TableSchema,
    files: Arc<LocalFileStore>,
    snapshots: Arc<LocalSnapshotStore>,
    pool: Arc<WriteBufferPool>,
}

impl Table {
    /// Open or create a table under `config.data_dir`
    pub fn open(config: Config, schema: TableSchema) -> Result<Self> {
        // Step 1: Reject inconsistent options
        config.validate()?;
        if config.needs_changelog_compaction() && !schema.has_primary_key() {
            return Err(StrataError::Config(format!(
                "changelog producer {:?} requires a primary key",
                config.changelog_producer
            )));
        }

        // Step 2: Create data and scratch directories
        fs::create_dir_all(&config.data_dir)?;
        fs::create_dir_all(&config.spill_dir)?;

        // Step 3: Open stores and the shared pool
        let files = Arc::new(LocalFileStore::new(
            &config.data_dir,
            schema.clone(),
            config.stats_enabled,
        ));
        let snapshots = Arc::new(LocalSnapshotStore::open(&config.data_dir)?);
        let pool = Arc::new(WriteBufferPool::from_config(&config));

        tracing::info!(
            data_dir = %config.data_dir.display(),
            buckets = config.total_buckets,
            producer = ?config.changelog_producer,
            budget = config.write_buffer_size,
            "opened table"
        );

        Ok(Self {
            config,
            schema,
            files,
            snapshots,
            pool,
        })
    }

    /// Start a fresh write task
    pub fn new_write(&self) -> Result<CheckpointBarrierProtocol> {
        Ok(CheckpointBarrierProtocol::new(self.new_store_write()?))
    }

    /// Resume a write task from a state blob taken by `snapshot_state`
    pub fn restore_write(&self, blob: &[u8]) -> Result<CheckpointBarrierProtocol> {
        let last_committed = self
            .snapshots
            .latest_commit_of_user(&self.config.commit_user)?;
        CheckpointBarrierProtocol::restore(self.new_store_write()?, blob, last_committed)
    }

    /// Committer for this table's commit user
    pub fn new_commit(&self) -> CommitCoordinator {
        CommitCoordinator::new(
            self.config.commit_user.clone(),
            self.snapshot_store(),
            self.config.commit_max_retries,
        )
    }

    /// The write capability matching the table's changelog producer
    pub fn new_store_write(&self) -> Result<Box<dyn StoreWrite>> {
        let manager = WriterManager::new(
            &self.config,
            self.schema.clone(),
            Arc::clone(&self.pool),
            self.file_store(),
            self.snapshot_store(),
        );

        match self.config.changelog_producer {
            ChangelogProducer::Lookup | ChangelogProducer::FullCompaction => {
                Ok(Box::new(LookupStoreWrite::new(&self.config, manager)?))
            }
            ChangelogProducer::None | ChangelogProducer::Input => {
                Ok(Box::new(PlainStoreWrite::new(manager)))
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn pool(&self) -> &Arc<WriteBufferPool> {
        &self.pool
    }

    pub fn file_store(&self) -> Arc<dyn FileStore> {
        Arc::clone(&self.files) as Arc<dyn FileStore>
    }

    pub fn snapshot_store(&self) -> Arc<dyn SnapshotStore> {
        Arc::clone(&self.snapshots) as Arc<dyn SnapshotStore>
    }
}
