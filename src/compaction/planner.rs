//! Compaction planning
//!
//! Decides, once per barrier, which buckets get a compaction task and what
//! the task merges.
//!
//! ## Policies
//! - Radical lookup: every bucket with level-0 files
//! - Gentle lookup: a bucket whose level-0 run count reaches the trigger, or
//!   whose counter reaches `max_interval`. The counter ticks when the writer
//!   is created and at every barrier, and resets when a task starts.
//! - Full compaction: every `delta_commits` barriers per bucket, all runs
//!   into the last level

use std::collections::{BTreeSet, HashMap};

use crate::config::{ChangelogProducer, Config, LookupCompactMode};
use crate::table::BucketKey;

use super::{CompactionTask, Levels};

/// Snapshot of one bucket handed to the planner
#[derive(Debug, Clone)]
pub struct BucketView {
    pub key: BucketKey,
    pub total_buckets: u32,
    pub levels: Levels,
}

/// Per-barrier task selection
pub struct CompactionPlanner {
    producer: ChangelogProducer,
    mode: LookupCompactMode,
    max_interval: u32,
    sorted_run_trigger: usize,
    delta_commits: u32,
    max_level: u8,
    max_size_amplification_percent: u64,
    max_tasks: Option<usize>,
    counters: HashMap<BucketKey, u32>,
}

impl CompactionPlanner {
    pub fn new(config: &Config) -> Self {
        Self {
            producer: config.changelog_producer,
            mode: config.lookup_compact,
            max_interval: config.lookup_compact_max_interval,
            sorted_run_trigger: config.num_sorted_run_compaction_trigger,
            delta_commits: config.full_compaction_delta_commits,
            max_level: config.max_level(),
            max_size_amplification_percent: config.max_size_amplification_percent,
            max_tasks: config.compaction_max_tasks_per_checkpoint,
            counters: HashMap::new(),
        }
    }

    /// A writer was created or restored
    pub fn on_writer_created(&mut self, key: &BucketKey) {
        if self.is_gentle() {
            *self.counters.entry(key.clone()).or_insert(0) += 1;
        }
    }

    /// A writer expired
    pub fn forget(&mut self, key: &BucketKey) {
        self.counters.remove(key);
    }

    pub fn counter(&self, key: &BucketKey) -> u32 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    /// Select this barrier's tasks
    ///
    /// Buckets in `forced` (failed or restored tasks) are compacted whenever
    /// they have something to merge. Task ids are drawn from `next_id`.
    pub fn plan<F>(
        &mut self,
        buckets: &[BucketView],
        is_busy: F,
        forced: &BTreeSet<BucketKey>,
        checkpoint: u64,
        next_id: &mut u64,
    ) -> Vec<CompactionTask>
    where
        F: Fn(&BucketKey) -> bool,
    {
        let mut tasks = Vec::new();

        for bucket in buckets {
            let due = self.tick(bucket) || forced.contains(&bucket.key);
            if !due || is_busy(&bucket.key) {
                continue;
            }
            if self.max_tasks.is_some_and(|max| tasks.len() >= max) {
                continue;
            }

            let task = match self.producer {
                ChangelogProducer::Lookup => self.lookup_task(bucket, checkpoint),
                ChangelogProducer::FullCompaction => self.full_task(bucket, checkpoint),
                ChangelogProducer::None | ChangelogProducer::Input => None,
            };

            if let Some(mut task) = task {
                task.id = *next_id;
                *next_id += 1;
                self.counters.remove(&bucket.key);
                tasks.push(task);
            }
        }

        tasks
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn is_gentle(&self) -> bool {
        self.producer == ChangelogProducer::Lookup && self.mode == LookupCompactMode::Gentle
    }

    /// Advance the bucket's counter; true when its policy says compact now
    fn tick(&mut self, bucket: &BucketView) -> bool {
        match self.producer {
            ChangelogProducer::Lookup => match self.mode {
                LookupCompactMode::Radical => true,
                LookupCompactMode::Gentle => {
                    let counter = self.counters.entry(bucket.key.clone()).or_insert(0);
                    *counter += 1;
                    *counter >= self.max_interval
                        || bucket.levels.level0_count() >= self.sorted_run_trigger
                }
            },
            ChangelogProducer::FullCompaction => {
                let counter = self.counters.entry(bucket.key.clone()).or_insert(0);
                *counter += 1;
                *counter >= self.delta_commits
            }
            ChangelogProducer::None | ChangelogProducer::Input => false,
        }
    }

    /// Merge level 0 into the first non-empty sorted run above it
    fn lookup_task(&self, bucket: &BucketView, checkpoint: u64) -> Option<CompactionTask> {
        let levels = &bucket.levels;
        if levels.level0_count() == 0 {
            return None;
        }

        let top = self.max_level;
        let upper_size = levels.size_of(0..=top - 1);
        let last_size = levels.size_of(top..=top);
        let include_last = upper_size.saturating_mul(100)
            >= last_size.saturating_mul(self.max_size_amplification_percent);

        let mut inputs = Vec::new();
        for level in 0..top {
            inputs.extend(levels.level(level));
        }
        let (output_level, lookup_files) = if include_last {
            inputs.extend(levels.level(top));
            (top, Vec::new())
        } else {
            (1, levels.level(top))
        };

        Some(CompactionTask {
            id: 0,
            key: bucket.key.clone(),
            total_buckets: bucket.total_buckets,
            inputs,
            lookup_files,
            output_level,
            drop_deletes: include_last,
            submitted_at: checkpoint,
        })
    }

    /// Rewrite everything into the last level
    fn full_task(&self, bucket: &BucketView, checkpoint: u64) -> Option<CompactionTask> {
        let levels = &bucket.levels;
        let top = self.max_level;
        let settled = levels.files().iter().all(|f| f.level == top) && levels.level(top).len() <= 1;
        if levels.is_empty() || settled {
            return None;
        }

        Some(CompactionTask {
            id: 0,
            key: bucket.key.clone(),
            total_buckets: bucket.total_buckets,
            inputs: levels.files().to_vec(),
            lookup_files: Vec::new(),
            output_level: top,
            drop_deletes: true,
            submitted_at: checkpoint,
        })
    }
}
