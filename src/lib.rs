//! # Strata
//!
//! A checkpoint-aligned write engine for append/upsert tables:
//! - Shared, page-granular write buffer budget with preemptive reclaim
//! - Per-bucket writers with lazy creation and deferred expiry
//! - Barrier protocol producing exactly-once, idempotent snapshot commits
//! - Background lookup compaction emitting before/after changelog rows
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              CheckpointBarrierProtocol                       │
//! │     prepare_barrier / snapshot_state / notify_complete      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ StoreWrite (plain | lookup)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   WriterManager                              │
//! │        (partition, bucket) ──► Writer ──► WriteBuffer        │
//! └──────────┬──────────────────────────────┬───────────────────┘
//!            │ reserve / release            │ flush
//!            ▼                              ▼
//!   ┌─────────────────┐            ┌─────────────────┐
//!   │ WriteBufferPool │            │    FileStore    │◄──── compaction
//!   └─────────────────┘            └────────┬────────┘      workers
//!                                           │ CommitMessage
//!                                           ▼
//!                                 ┌─────────────────┐
//!                                 │CommitCoordinator│──► snapshot-N
//!                                 └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod codec;

pub mod table;
pub mod memory;
pub mod buffer;
pub mod storage;
pub mod writer;
pub mod compaction;
pub mod snapshot;
pub mod sink;
pub mod checkpoint;
pub mod metrics;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use checkpoint::{BarrierPhase, CheckpointBarrierProtocol};
pub use config::{ChangelogProducer, Config, LookupCompactMode, VictimPolicy};
pub use error::{Result, StrataError};
pub use memory::WriteBufferPool;
pub use metrics::WriteMetrics;
pub use sink::{Committable, CommittableKind, StoreWrite};
pub use snapshot::{CommitCoordinator, CommitResult, Snapshot, SnapshotStore};
pub use table::{BucketKey, Datum, Partition, Row, RowKind, Table, TableSchema};
pub use writer::CommitMessage;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Strata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
