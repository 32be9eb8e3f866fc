//! Error types for Strata
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for Strata operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Memory Errors
    // -------------------------------------------------------------------------
    #[error("Write buffer exhausted: requested {requested} bytes, budget {budget} bytes")]
    ResourceExhausted { requested: u64, budget: u64 },

    // -------------------------------------------------------------------------
    // Commit Errors
    // -------------------------------------------------------------------------
    #[error("Commit conflict on {bucket}: file {file} is no longer part of the base snapshot")]
    CommitConflict { bucket: String, file: String },

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    // -------------------------------------------------------------------------
    // Compaction Errors
    // -------------------------------------------------------------------------
    #[error("Compaction error: {0}")]
    Compaction(String),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Checkpoint protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Writer is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StrataError {
    /// Whether the caller may recover by retrying.
    ///
    /// I/O and storage failures are retried by restarting from the last
    /// checkpoint; conflicts by recomputing deltas against the new base.
    /// Resource exhaustion, protocol violations and exhausted commit retries
    /// are fatal.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StrataError::Io(_)
                | StrataError::Storage(_)
                | StrataError::CommitConflict { .. }
                | StrataError::Compaction(_)
        )
    }
}

impl From<bincode::Error> for StrataError {
    fn from(e: bincode::Error) -> Self {
        StrataError::Serialization(e.to_string())
    }
}
