//! Memory Module
//!
//! Shared write buffer budget for all writers of one task.
//!
//! ## Responsibilities
//! - Page-granular accounting of buffer memory per writer
//! - Never letting `used > budget`, even across threads
//! - Picking a victim and forcing it to flush or spill when full
//! - Counting preemptions for the `bufferPreemptCount` gauge

mod pool;

pub use pool::{PoolGroup, WriteBufferPool, WriterId};
