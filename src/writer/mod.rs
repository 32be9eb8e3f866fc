//! Writer Module
//!
//! Per-bucket writers and the manager that owns them.
//!
//! ## Responsibilities
//! - Route rows to the writer of their (partition, bucket)
//! - Reserve buffer memory from the shared pool, preempting when full
//! - Flush buffers into level-0 files and emit one [`CommitMessage`] per
//!   writer that changed since the last barrier
//! - Expire writers that stayed idle across a full checkpoint cycle
//!
//! ## Writer Lifecycle
//! ```text
//!   first row            prepare_commit            idle for one more cycle
//!  ──────────► ACTIVE ──────────────────► IDLE ───────────────────────► EXPIRED
//!                ▲                          │
//!                └───────── new row ────────┘
//! ```

mod bucket;
mod manager;
mod message;

use serde::{Deserialize, Serialize};

pub use bucket::{Writer, WriterSettings};
pub use manager::{WriterCheckpoint, WriterManager};
pub use message::{CommitMessage, CompactIncrement, DataIncrement, IndexIncrement};

/// Lifecycle state of a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriterState {
    /// Holds unflushed or unemitted data
    Active,

    /// Flushed and emitted; eligible for expiry
    Idle,

    /// Removed from the manager; its buffer went back to the pool
    Expired,
}
