//! Changelog Compaction Scheduler
//!
//! Runs compaction tasks on a worker pool next to ingestion and hands
//! results back to the barrier protocol.
//!
//! ## Architecture
//! ```text
//!   ingestion thread                      worker threads
//!   ─────────────────                     ──────────────
//!   submit() ──► task channel ──────────► task.run(fs)
//!                                              │
//!   collect() ◄── result channel ◄─────────────┘
//! ```
//!
//! ## Concurrency
//! - The in-flight table and retry set are owned by the ingestion thread;
//!   workers only see tasks and send results.
//! - `collect(true)` is the only blocking call (wait policy).
//! - Dropping the scheduler closes the task channel and joins the workers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::storage::FileStore;
use crate::table::BucketKey;

use super::planner::{BucketView, CompactionPlanner};
use super::{CompactionResult, CompactionTask};

/// What a worker sends back
struct TaskOutcome {
    task_id: u64,
    key: BucketKey,
    result: Result<CompactionResult>,
}

/// Scheduler progress that survives a restart
///
/// Gentle-mode counters are not kept: restored writers count as
/// newly created and start a fresh interval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    /// Buckets with a task in flight or awaiting retry at snapshot time
    pub pending: BTreeSet<BucketKey>,
}

/// Background compaction with wait / no-wait / gentle policies
pub struct ChangelogCompactionScheduler {
    planner: CompactionPlanner,
    wait: bool,
    task_tx: Option<Sender<CompactionTask>>,
    result_rx: Receiver<TaskOutcome>,
    workers: Vec<JoinHandle<()>>,
    in_flight: HashMap<BucketKey, u64>,
    /// Buckets whose task failed or was restored; compacted at the next barrier
    retry: BTreeSet<BucketKey>,
    next_task_id: u64,
    failed_tasks: u64,
}

impl ChangelogCompactionScheduler {
    /// Start `config.compaction_workers` worker threads
    pub fn start(config: &Config, fs: Arc<dyn FileStore>) -> Result<Self> {
        let (task_tx, task_rx) = unbounded::<CompactionTask>();
        let (result_tx, result_rx) = unbounded::<TaskOutcome>();

        let mut workers = Vec::with_capacity(config.compaction_workers);
        for i in 0..config.compaction_workers.max(1) {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let fs = Arc::clone(&fs);
            let handle = thread::Builder::new()
                .name(format!("strata-compaction-{}", i))
                .spawn(move || {
                    for task in task_rx.iter() {
                        let outcome = TaskOutcome {
                            task_id: task.id,
                            key: task.key.clone(),
                            result: task.run(fs.as_ref()),
                        };
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                })?;
            workers.push(handle);
        }

        Ok(Self {
            planner: CompactionPlanner::new(config),
            wait: config.lookup_wait,
            task_tx: Some(task_tx),
            result_rx,
            workers,
            in_flight: HashMap::new(),
            retry: BTreeSet::new(),
            next_task_id: 1,
            failed_tasks: 0,
        })
    }

    /// Whether `prepare` blocks on compaction
    pub fn waits(&self) -> bool {
        self.wait
    }

    pub fn on_writer_created(&mut self, key: &BucketKey) {
        self.planner.on_writer_created(key);
    }

    pub fn on_writer_expired(&mut self, key: &BucketKey) {
        self.planner.forget(key);
        self.retry.remove(key);
    }

    /// Whether a task for `key` is running
    pub fn is_busy(&self, key: &BucketKey) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn failed_tasks(&self) -> u64 {
        self.failed_tasks
    }

    pub fn gentle_counter(&self, key: &BucketKey) -> u32 {
        self.planner.counter(key)
    }

    /// Plan and submit this barrier's tasks; returns how many started
    pub fn submit(&mut self, checkpoint: u64, buckets: &[BucketView]) -> Result<usize> {
        let in_flight = &self.in_flight;
        let tasks = self.planner.plan(
            buckets,
            |key| in_flight.contains_key(key),
            &self.retry,
            checkpoint,
            &mut self.next_task_id,
        );

        let sender = self.task_tx.as_ref().ok_or(StrataError::Closed)?;
        let started = tasks.len();
        for task in tasks {
            tracing::debug!(
                bucket = %task.key,
                task = task.id,
                checkpoint,
                inputs = task.inputs.len(),
                output_level = task.output_level,
                "submitting compaction"
            );
            self.retry.remove(&task.key);
            self.in_flight.insert(task.key.clone(), task.id);
            sender
                .send(task)
                .map_err(|_| StrataError::Compaction("compaction workers are gone".to_string()))?;
        }
        Ok(started)
    }

    /// Gather finished tasks
    ///
    /// With `block`, waits until nothing is in flight. Failed tasks are
    /// logged and queued for retry at the next barrier.
    pub fn collect(&mut self, block: bool) -> Result<Vec<CompactionResult>> {
        let mut finished = Vec::new();
        loop {
            let outcome = if block {
                if self.in_flight.is_empty() {
                    break;
                }
                self.result_rx.recv().map_err(|_| {
                    StrataError::Compaction("compaction workers are gone".to_string())
                })?
            } else {
                match self.result_rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        return Err(StrataError::Compaction(
                            "compaction workers are gone".to_string(),
                        ))
                    }
                }
            };

            if self.in_flight.get(&outcome.key) != Some(&outcome.task_id) {
                continue;
            }
            self.in_flight.remove(&outcome.key);

            match outcome.result {
                Ok(result) => {
                    tracing::debug!(
                        bucket = %result.key,
                        task = result.task_id,
                        before = result.increment.compact_before.len(),
                        after = result.increment.compact_after.len(),
                        changelog = result.increment.changelog_files.len(),
                        "compaction completed"
                    );
                    finished.push(result);
                }
                Err(e) => {
                    self.failed_tasks += 1;
                    tracing::warn!(
                        bucket = %outcome.key,
                        task = outcome.task_id,
                        error = %e,
                        "compaction failed; retrying at next barrier"
                    );
                    self.retry.insert(outcome.key);
                }
            }
        }
        Ok(finished)
    }

    // =========================================================================
    // Checkpoint / Restore
    // =========================================================================

    pub fn state(&self) -> SchedulerState {
        let mut pending = self.retry.clone();
        pending.extend(self.in_flight.keys().cloned());
        SchedulerState { pending }
    }

    /// Requeue buckets that had work outstanding when the state was taken
    pub fn restore(&mut self, state: SchedulerState) {
        self.retry.extend(state.pending);
    }

    /// Stop accepting tasks and join the workers
    ///
    /// Unfinished results are dropped; their buckets were recorded in the
    /// last snapshot state and are resubmitted after restore.
    pub fn close(&mut self) {
        self.task_tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("compaction worker panicked");
            }
        }
        self.in_flight.clear();
    }
}

impl Drop for ChangelogCompactionScheduler {
    fn drop(&mut self) {
        self.close();
    }
}
