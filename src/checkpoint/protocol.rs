//! Checkpoint Barrier Protocol
//!
//! State machine that ties checkpoint events to flushes, committable
//! emission and writer cleanup for one write task.
//!
//! ## Phases
//! ```text
//!            prepare_barrier(n)           snapshot_state(n)
//!  RUNNING ─────────────────────► PRE_BARRIER(n) ─────────────────► BARRIER_SNAPSHOTTED(n)
//!     ▲                                                                   │
//!     └──────────── notify_checkpoint_complete(n) / abort_checkpoint(n) ──┘
//!
//!  any phase ── close() ──► CLOSED
//! ```
//!
//! `prepare_barrier(n + 1)` is also accepted from BARRIER_SNAPSHOTTED(n):
//! completion notifications may arrive late or not at all.
//!
//! ## Ordering Rules
//! - prepare identifiers strictly increase
//! - `snapshot_state(n)` only directly after `prepare_barrier(n)`
//! - `notify_checkpoint_complete(n)` only for a snapshotted `n` above the
//!   last completed identifier
//!
//! Any other order is a [`StrataError::ProtocolViolation`].

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::{Result, StrataError};
use crate::metrics::WriteMetrics;
use crate::sink::{Committable, StoreWrite};
use crate::table::{Partition, Row};

use super::OperatorState;

/// Current phase of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierPhase {
    Running,
    PreBarrier(u64),
    BarrierSnapshotted(u64),
    Closed,
}

/// Barrier-driven write task
pub struct CheckpointBarrierProtocol {
    write: Box<dyn StoreWrite>,
    phase: BarrierPhase,
    last_prepared: Option<u64>,
    last_snapshotted: Option<u64>,
    last_completed: Option<u64>,
    /// Emitted committables awaiting acknowledgment, by identifier
    outstanding: BTreeMap<u64, Vec<Committable>>,
    /// Restored committables to emit again at the next barrier
    reemit: Vec<Committable>,
}

impl CheckpointBarrierProtocol {
    pub fn new(write: Box<dyn StoreWrite>) -> Self {
        Self {
            write,
            phase: BarrierPhase::Running,
            last_prepared: None,
            last_snapshotted: None,
            last_completed: None,
            outstanding: BTreeMap::new(),
            reemit: Vec::new(),
        }
    }

    /// Resume from a state blob
    ///
    /// Outstanding committables with an identifier above
    /// `last_committed` never reached a snapshot: their files are folded
    /// back into the writers and they are emitted again at the next barrier.
    pub fn restore(
        mut write: Box<dyn StoreWrite>,
        blob: &[u8],
        last_committed: Option<u64>,
    ) -> Result<Self> {
        // Step 1: Decode and verify the blob
        let state = OperatorState::decode(blob)?;

        // Step 2: Split outstanding committables into committed / not committed
        let uncommitted: Vec<Committable> = state
            .outstanding
            .into_iter()
            .filter(|c| last_committed.map_or(true, |last| c.identifier() > last))
            .collect();
        let messages: Vec<_> = uncommitted
            .iter()
            .filter_map(|c| c.commit_message().cloned())
            .collect();

        // Step 3: Recreate writers and pending compactions
        let last_completed = state.store.last_completed;
        write.restore(state.store, &messages)?;

        tracing::info!(
            checkpoint = state.checkpoint_id,
            writers = write.writer_count(),
            reemit = uncommitted.len(),
            last_committed = ?last_committed,
            "restored write task"
        );

        Ok(Self {
            write,
            phase: BarrierPhase::Running,
            last_prepared: Some(state.checkpoint_id),
            last_snapshotted: Some(state.checkpoint_id),
            last_completed,
            outstanding: BTreeMap::new(),
            reemit: uncommitted,
        })
    }

    // =========================================================================
    // Data Path
    // =========================================================================

    pub fn write(&mut self, partition: Partition, bucket: u32, row: Row) -> Result<()> {
        match self.phase {
            BarrierPhase::Running | BarrierPhase::BarrierSnapshotted(_) => {
                self.write.write(partition, bucket, row)
            }
            BarrierPhase::PreBarrier(n) => Err(StrataError::ProtocolViolation(format!(
                "write between prepare_barrier({}) and snapshot_state({})",
                n, n
            ))),
            BarrierPhase::Closed => Err(StrataError::Closed),
        }
    }

    // =========================================================================
    // Checkpoint Events
    // =========================================================================

    /// Flush and emit this barrier's committables
    ///
    /// On error nothing is emitted and the phase is unchanged; the task is
    /// expected to fail and restore.
    pub fn prepare_barrier(&mut self, checkpoint_id: u64) -> Result<Vec<Committable>> {
        match self.phase {
            BarrierPhase::Running | BarrierPhase::BarrierSnapshotted(_) => {}
            BarrierPhase::Closed => return Err(StrataError::Closed),
            BarrierPhase::PreBarrier(n) => {
                return Err(StrataError::ProtocolViolation(format!(
                    "prepare_barrier({}) while barrier {} awaits its snapshot",
                    checkpoint_id, n
                )))
            }
        }
        if let Some(last) = self.last_prepared {
            if checkpoint_id <= last {
                return Err(StrataError::ProtocolViolation(format!(
                    "prepare_barrier({}) after barrier {}",
                    checkpoint_id, last
                )));
            }
        }

        let messages = self.write.prepare_commit(checkpoint_id)?;

        let mut emitted = std::mem::take(&mut self.reemit);
        emitted.extend(
            messages
                .into_iter()
                .map(|m| Committable::file(checkpoint_id, m)),
        );
        for committable in &emitted {
            self.outstanding
                .entry(committable.identifier())
                .or_default()
                .push(committable.clone());
        }

        self.phase = BarrierPhase::PreBarrier(checkpoint_id);
        self.last_prepared = Some(checkpoint_id);

        tracing::debug!(checkpoint = checkpoint_id, committables = emitted.len(), "prepared barrier");
        Ok(emitted)
    }

    /// Serialize recovery state for `checkpoint_id`
    pub fn snapshot_state(&mut self, checkpoint_id: u64) -> Result<Bytes> {
        match self.phase {
            BarrierPhase::PreBarrier(n) if n == checkpoint_id => {}
            BarrierPhase::Closed => return Err(StrataError::Closed),
            phase => {
                return Err(StrataError::ProtocolViolation(format!(
                    "snapshot_state({}) in phase {:?}",
                    checkpoint_id, phase
                )))
            }
        }

        let state = OperatorState {
            checkpoint_id,
            store: self.write.state(),
            outstanding: self.outstanding.values().flatten().cloned().collect(),
        };
        let blob = state.encode()?;

        self.phase = BarrierPhase::BarrierSnapshotted(checkpoint_id);
        self.last_snapshotted = Some(checkpoint_id);

        tracing::debug!(
            checkpoint = checkpoint_id,
            bytes = blob.len(),
            writers = state.store.writers.len(),
            "snapshotted state"
        );
        Ok(blob)
    }

    /// Acknowledge that `checkpoint_id` is durable downstream
    pub fn notify_checkpoint_complete(&mut self, checkpoint_id: u64) -> Result<()> {
        if self.phase == BarrierPhase::Closed {
            return Err(StrataError::Closed);
        }
        if self.last_snapshotted.map_or(true, |s| checkpoint_id > s) {
            return Err(StrataError::ProtocolViolation(format!(
                "notify_checkpoint_complete({}) before its snapshot",
                checkpoint_id
            )));
        }
        if self.last_completed.is_some_and(|c| checkpoint_id <= c) {
            return Err(StrataError::ProtocolViolation(format!(
                "notify_checkpoint_complete({}) after completion of {:?}",
                checkpoint_id, self.last_completed
            )));
        }

        self.outstanding.retain(|id, _| *id > checkpoint_id);
        self.write.notify_checkpoint_complete(checkpoint_id)?;
        self.last_completed = Some(checkpoint_id);

        if self.phase == BarrierPhase::BarrierSnapshotted(checkpoint_id) {
            self.phase = BarrierPhase::Running;
        }

        tracing::debug!(
            checkpoint = checkpoint_id,
            writers = self.write.writer_count(),
            "checkpoint complete"
        );
        Ok(())
    }

    /// Give up on `checkpoint_id`; its committables stay outstanding
    pub fn abort_checkpoint(&mut self, checkpoint_id: u64) -> Result<()> {
        match self.phase {
            BarrierPhase::PreBarrier(n) | BarrierPhase::BarrierSnapshotted(n) if n == checkpoint_id => {
                tracing::warn!(checkpoint = checkpoint_id, "checkpoint aborted");
                self.phase = BarrierPhase::Running;
                Ok(())
            }
            BarrierPhase::Closed => Err(StrataError::Closed),
            _ if self.last_prepared.is_some_and(|p| checkpoint_id <= p) => Ok(()),
            phase => Err(StrataError::ProtocolViolation(format!(
                "abort_checkpoint({}) in phase {:?}",
                checkpoint_id, phase
            ))),
        }
    }

    /// Stop writers and compaction workers
    pub fn close(&mut self) -> Result<()> {
        if self.phase == BarrierPhase::Closed {
            return Ok(());
        }
        self.phase = BarrierPhase::Closed;
        self.write.close()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn phase(&self) -> BarrierPhase {
        self.phase
    }

    pub fn last_completed(&self) -> Option<u64> {
        self.last_completed
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.values().map(Vec::len).sum()
    }

    pub fn writer_count(&self) -> usize {
        self.write.writer_count()
    }

    pub fn metrics(&self) -> WriteMetrics {
        self.write.metrics()
    }
}
