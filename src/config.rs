//! Configuration for Strata
//!
//! Centralized configuration with sensible defaults. Options can be set with
//! the builder or parsed from the table-option key/value form
//! (`"write-buffer-size" = "256 b"`).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Result, StrataError};

/// Main configuration for a Strata table writer
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory of the table
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── snapshot/                    (snapshot chain + LATEST hint)
    ///     └── {partition}/bucket-{n}/      (data and changelog files)
    pub data_dir: PathBuf,

    /// Scratch directory for spilled write buffers (never committed)
    pub spill_dir: PathBuf,

    /// Identity used as the idempotency scope for commit identifiers
    pub commit_user: String,

    /// Number of buckets per partition, recorded in every commit message
    pub total_buckets: u32,

    /// Collect per-field statistics when writing files
    pub stats_enabled: bool,

    // -------------------------------------------------------------------------
    // Write Buffer Configuration
    // -------------------------------------------------------------------------
    /// Total byte budget shared by all writers of one task
    pub write_buffer_size: u64,

    /// Allocation granularity of the write buffer budget
    pub page_size: u64,

    /// Spill sorted runs to `spill_dir` instead of flushing a table file
    pub write_buffer_spillable: bool,

    /// Which writer gives up memory when the budget is exhausted
    pub victim_policy: VictimPolicy,

    // -------------------------------------------------------------------------
    // Changelog / Compaction Configuration
    // -------------------------------------------------------------------------
    pub changelog_producer: ChangelogProducer,

    /// Block `prepare_barrier` until compaction started before it completes
    pub lookup_wait: bool,

    pub lookup_compact: LookupCompactMode,

    /// Gentle mode: force a compaction after this many idle checkpoints
    pub lookup_compact_max_interval: u32,

    /// Full-compaction producer: compact fully every N checkpoints
    pub full_compaction_delta_commits: u32,

    /// Number of LSM levels including level 0 (minimum 3)
    pub num_levels: u8,

    /// Merge into the last level once L0+L1 reaches this percentage of it
    pub max_size_amplification_percent: u64,

    /// Gentle mode: compact early once a bucket has this many level-0 files
    pub num_sorted_run_compaction_trigger: usize,

    /// Worker threads executing compaction tasks
    pub compaction_workers: usize,

    /// Upper bound on compactions started by one barrier (None = one per bucket)
    pub compaction_max_tasks_per_checkpoint: Option<usize>,

    // -------------------------------------------------------------------------
    // Commit Configuration
    // -------------------------------------------------------------------------
    /// Publication attempts before a lost race becomes a fatal commit failure
    pub commit_max_retries: u32,
}

/// How changelog rows are produced for primary-key tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangelogProducer {
    /// No changelog files
    None,

    /// Input rows are written as-is to a changelog file on flush
    Input,

    /// Before/after images from point lookups during compaction
    Lookup,

    /// Before/after images from periodic full compaction
    FullCompaction,
}

/// Eagerness of lookup compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupCompactMode {
    /// Compact every bucket with level-0 data at every barrier
    Radical,

    /// Compact only on sorted-run pressure or after `max_interval` checkpoints
    Gentle,
}

/// Victim selection when the write buffer budget is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimPolicy {
    /// Largest reservation first, ties broken by least recently written
    LargestBuffer,

    /// Least recently written writer first
    LeastRecentlyWritten,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./strata_data"),
            spill_dir: std::env::temp_dir().join("strata_spill"),
            commit_user: "strata".to_string(),
            total_buckets: 1,
            stats_enabled: true,
            write_buffer_size: 256 * 1024 * 1024, // 256 MB
            page_size: 64 * 1024,                 // 64 KB
            write_buffer_spillable: false,
            victim_policy: VictimPolicy::LargestBuffer,
            changelog_producer: ChangelogProducer::None,
            lookup_wait: true,
            lookup_compact: LookupCompactMode::Radical,
            lookup_compact_max_interval: 10,
            full_compaction_delta_commits: 1,
            num_levels: 3,
            max_size_amplification_percent: 200,
            num_sorted_run_compaction_trigger: 5,
            compaction_workers: 2,
            compaction_max_tasks_per_checkpoint: None,
            commit_max_retries: 10,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Build a config from table options, starting from defaults
    ///
    /// Unknown keys are ignored so that options meant for other layers can be
    /// passed through untouched.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self> {
        let mut config = Config::default();

        for (key, value) in options {
            let value = value.trim();
            match key.as_str() {
                "path" => config.data_dir = PathBuf::from(value),
                "spill-dir" => config.spill_dir = PathBuf::from(value),
                "commit.user" => config.commit_user = value.to_string(),
                "bucket" => config.total_buckets = parse_number(key, value)?,
                "stats.enabled" => config.stats_enabled = parse_bool(key, value)?,
                "write-buffer-size" => config.write_buffer_size = parse_memory_size(key, value)?,
                "page-size" => config.page_size = parse_memory_size(key, value)?,
                "write-buffer-spillable" => {
                    config.write_buffer_spillable = parse_bool(key, value)?
                }
                "write-buffer.victim-policy" => {
                    config.victim_policy = match value.to_ascii_lowercase().as_str() {
                        "largest" => VictimPolicy::LargestBuffer,
                        "least-recently-written" | "lrw" => VictimPolicy::LeastRecentlyWritten,
                        other => return Err(invalid(key, other)),
                    }
                }
                "changelog-producer" => {
                    config.changelog_producer = match value.to_ascii_lowercase().as_str() {
                        "none" => ChangelogProducer::None,
                        "input" => ChangelogProducer::Input,
                        "lookup" => ChangelogProducer::Lookup,
                        "full-compaction" => ChangelogProducer::FullCompaction,
                        other => return Err(invalid(key, other)),
                    }
                }
                "lookup-wait" => config.lookup_wait = parse_bool(key, value)?,
                "lookup-compact" => {
                    config.lookup_compact = match value.to_ascii_lowercase().as_str() {
                        "radical" => LookupCompactMode::Radical,
                        "gentle" => LookupCompactMode::Gentle,
                        other => return Err(invalid(key, other)),
                    }
                }
                "lookup-compact.max-interval" => {
                    config.lookup_compact_max_interval = parse_number(key, value)?
                }
                "full-compaction.delta-commits" => {
                    config.full_compaction_delta_commits = parse_number(key, value)?
                }
                "num-levels" => config.num_levels = parse_number(key, value)?,
                "compaction.max-size-amplification-percent" => {
                    config.max_size_amplification_percent = parse_number(key, value)?
                }
                "num-sorted-run.compaction-trigger" => {
                    config.num_sorted_run_compaction_trigger = parse_number(key, value)?
                }
                "compaction.workers" => config.compaction_workers = parse_number(key, value)?,
                "compaction.max-tasks-per-checkpoint" => {
                    config.compaction_max_tasks_per_checkpoint = Some(parse_number(key, value)?)
                }
                "commit.max-retries" => config.commit_max_retries = parse_number(key, value)?,
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.write_buffer_size == 0 {
            return Err(StrataError::Config("write-buffer-size must be positive".into()));
        }
        if self.page_size == 0 || self.page_size > self.write_buffer_size {
            return Err(StrataError::Config(format!(
                "page-size {} must be in 1..={}",
                self.page_size, self.write_buffer_size
            )));
        }
        if self.total_buckets == 0 {
            return Err(StrataError::Config("bucket must be positive".into()));
        }
        if self.num_levels < 3 {
            return Err(StrataError::Config(format!(
                "num-levels must be at least 3, got {}",
                self.num_levels
            )));
        }
        if self.compaction_workers == 0 {
            return Err(StrataError::Config("compaction.workers must be positive".into()));
        }
        if self.lookup_compact == LookupCompactMode::Gentle && self.lookup_compact_max_interval == 0
        {
            return Err(StrataError::Config(
                "lookup-compact.max-interval must be positive in gentle mode".into(),
            ));
        }
        if self.changelog_producer == ChangelogProducer::FullCompaction
            && self.full_compaction_delta_commits == 0
        {
            return Err(StrataError::Config(
                "full-compaction.delta-commits must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Highest level index; the last level holds fully merged data
    pub fn max_level(&self) -> u8 {
        self.num_levels - 1
    }

    /// Whether the configured producer needs the compaction scheduler
    pub fn needs_changelog_compaction(&self) -> bool {
        matches!(
            self.changelog_producer,
            ChangelogProducer::Lookup | ChangelogProducer::FullCompaction
        )
    }
}

// =============================================================================
// Option Parsing Helpers
// =============================================================================

fn invalid(key: &str, value: &str) -> StrataError {
    StrataError::Config(format!("invalid value '{}' for option '{}'", value, key))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Parse "256 b", "64kb", "1 mb", "2gb" or a plain byte count
pub fn parse_memory_size(key: &str, value: &str) -> Result<u64> {
    let lower = value.trim().to_ascii_lowercase();
    let split = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (digits, unit) = lower.split_at(split);

    let amount: u64 = digits.parse().map_err(|_| invalid(key, value))?;
    let multiplier: u64 = match unit.trim() {
        "" | "b" | "bytes" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => return Err(invalid(key, value)),
    };

    amount
        .checked_mul(multiplier)
        .ok_or_else(|| invalid(key, value))
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the table root directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the scratch directory for spilled buffers
    pub fn spill_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.spill_dir = path.into();
        self
    }

    pub fn commit_user(mut self, user: impl Into<String>) -> Self {
        self.config.commit_user = user.into();
        self
    }

    pub fn total_buckets(mut self, buckets: u32) -> Self {
        self.config.total_buckets = buckets;
        self
    }

    pub fn stats_enabled(mut self, enabled: bool) -> Self {
        self.config.stats_enabled = enabled;
        self
    }

    /// Set the shared write buffer budget (in bytes)
    pub fn write_buffer_size(mut self, bytes: u64) -> Self {
        self.config.write_buffer_size = bytes;
        self
    }

    /// Set the allocation page size (in bytes)
    pub fn page_size(mut self, bytes: u64) -> Self {
        self.config.page_size = bytes;
        self
    }

    pub fn write_buffer_spillable(mut self, spillable: bool) -> Self {
        self.config.write_buffer_spillable = spillable;
        self
    }

    pub fn victim_policy(mut self, policy: VictimPolicy) -> Self {
        self.config.victim_policy = policy;
        self
    }

    pub fn changelog_producer(mut self, producer: ChangelogProducer) -> Self {
        self.config.changelog_producer = producer;
        self
    }

    pub fn lookup_wait(mut self, wait: bool) -> Self {
        self.config.lookup_wait = wait;
        self
    }

    pub fn lookup_compact(mut self, mode: LookupCompactMode) -> Self {
        self.config.lookup_compact = mode;
        self
    }

    pub fn lookup_compact_max_interval(mut self, interval: u32) -> Self {
        self.config.lookup_compact_max_interval = interval;
        self
    }

    pub fn full_compaction_delta_commits(mut self, commits: u32) -> Self {
        self.config.full_compaction_delta_commits = commits;
        self
    }

    pub fn num_levels(mut self, levels: u8) -> Self {
        self.config.num_levels = levels;
        self
    }

    pub fn max_size_amplification_percent(mut self, percent: u64) -> Self {
        self.config.max_size_amplification_percent = percent;
        self
    }

    pub fn num_sorted_run_compaction_trigger(mut self, runs: usize) -> Self {
        self.config.num_sorted_run_compaction_trigger = runs;
        self
    }

    pub fn compaction_workers(mut self, workers: usize) -> Self {
        self.config.compaction_workers = workers;
        self
    }

    pub fn compaction_max_tasks_per_checkpoint(mut self, tasks: usize) -> Self {
        self.config.compaction_max_tasks_per_checkpoint = Some(tasks);
        self
    }

    pub fn commit_max_retries(mut self, retries: u32) -> Self {
        self.config.commit_max_retries = retries;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
