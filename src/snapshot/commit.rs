//! Commit Coordinator
//!
//! Applies batches of commit messages to the snapshot chain.
//!
//! ## Commit Flow
//! ```text
//!   commit(id, messages)
//!     │
//!     ├── already committed? ──► prior result (memory cache, then snapshot scan)
//!     ├── nothing to apply?  ──► Empty
//!     ▼
//!   group by bucket ──► base = latest ──► apply deltas ──► try_publish(base + 1)
//!                          ▲                                   │
//!                          └────────── lost race (retry) ◄─────┘
//! ```
//!
//! ## Concurrency
//! Commits through one coordinator are serialized by a mutex. Independent
//! coordinators race on the snapshot id; the loser rebuilds on the new base,
//! and a compaction whose inputs vanished from that base is a conflict.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::storage::DataFileMeta;
use crate::table::BucketKey;
use crate::writer::CommitMessage;

use super::{BucketFiles, Snapshot, SnapshotStore};

/// File counts of one commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    pub added_files: u64,
    pub deleted_files: u64,
    pub changelog_files: u64,
    pub added_rows: u64,
}

/// Outcome of a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// A snapshot was published for the identifier
    Committed {
        commit_identifier: u64,
        snapshot_id: u64,
        stats: CommitStats,
    },

    /// Nothing to apply; no snapshot was created
    Empty { commit_identifier: u64 },
}

impl CommitResult {
    pub fn commit_identifier(&self) -> u64 {
        match self {
            CommitResult::Committed {
                commit_identifier, ..
            }
            | CommitResult::Empty { commit_identifier } => *commit_identifier,
        }
    }

    pub fn snapshot_id(&self) -> Option<u64> {
        match self {
            CommitResult::Committed { snapshot_id, .. } => Some(*snapshot_id),
            CommitResult::Empty { .. } => None,
        }
    }

    fn from_snapshot(snapshot: &Snapshot) -> Self {
        CommitResult::Committed {
            commit_identifier: snapshot.commit_identifier,
            snapshot_id: snapshot.id,
            stats: snapshot.stats,
        }
    }
}

#[derive(Debug, Default)]
struct CommitState {
    results: BTreeMap<u64, CommitResult>,
    /// Highest identifier with a published snapshot, loaded lazily
    last_committed: Option<Option<u64>>,
}

/// Exactly-once committer for one commit user
pub struct CommitCoordinator {
    commit_user: String,
    store: Arc<dyn SnapshotStore>,
    max_retries: u32,
    state: Mutex<CommitState>,
}

impl CommitCoordinator {
    pub fn new(commit_user: impl Into<String>, store: Arc<dyn SnapshotStore>, max_retries: u32) -> Self {
        Self {
            commit_user: commit_user.into(),
            store,
            max_retries,
            state: Mutex::new(CommitState::default()),
        }
    }

    pub fn commit_user(&self) -> &str {
        &self.commit_user
    }

    /// Highest identifier this user has committed a snapshot for
    pub fn last_committed(&self) -> Result<Option<u64>> {
        let mut state = self.state.lock();
        self.load_last_committed(&mut state)
    }

    /// Apply `messages` as the commit of `commit_identifier`
    ///
    /// Replaying an identifier returns its first result without touching the
    /// snapshot chain.
    pub fn commit(&self, commit_identifier: u64, messages: Vec<CommitMessage>) -> Result<CommitResult> {
        let mut state = self.state.lock();

        if let Some(result) = state.results.get(&commit_identifier) {
            tracing::debug!(checkpoint = commit_identifier, "commit replay served from cache");
            return Ok(result.clone());
        }

        if let Some(snapshot) = self
            .store
            .find_by_commit(&self.commit_user, commit_identifier)?
        {
            tracing::info!(
                checkpoint = commit_identifier,
                snapshot = snapshot.id,
                "commit already published; replay is a no-op"
            );
            let result = CommitResult::from_snapshot(&snapshot);
            state.results.insert(commit_identifier, result.clone());
            return Ok(result);
        }

        let messages: Vec<CommitMessage> = messages.into_iter().filter(|m| !m.is_empty()).collect();
        let last_committed = self.load_last_committed(&mut state)?;

        if messages.is_empty() {
            let result = CommitResult::Empty { commit_identifier };
            cache_result(&mut state, result.clone());
            return Ok(result);
        }

        if let Some(last) = last_committed {
            if commit_identifier < last {
                return Err(StrataError::ProtocolViolation(format!(
                    "commit identifier {} regresses below last committed {}",
                    commit_identifier, last
                )));
            }
        }

        let grouped = group_by_bucket(messages)?;
        let result = self.publish(commit_identifier, &grouped)?;

        cache_result(&mut state, result.clone());
        state.last_committed = Some(Some(
            last_committed.map_or(commit_identifier, |l| l.max(commit_identifier)),
        ));
        Ok(result)
    }

    /// Number of results held for fast replay
    pub fn cached_results(&self) -> usize {
        self.state.lock().results.len()
    }

    /// Drop cached results up to `commit_identifier`
    ///
    /// Replays of evicted identifiers are still answered from the store.
    pub fn evict_results_up_to(&self, commit_identifier: u64) {
        let mut state = self.state.lock();
        state.results.retain(|id, _| *id > commit_identifier);
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn load_last_committed(&self, state: &mut CommitState) -> Result<Option<u64>> {
        if let Some(last) = state.last_committed {
            return Ok(last);
        }
        let last = self.store.latest_commit_of_user(&self.commit_user)?;
        state.last_committed = Some(last);
        Ok(last)
    }

    fn publish(
        &self,
        commit_identifier: u64,
        grouped: &BTreeMap<BucketKey, CommitMessage>,
    ) -> Result<CommitResult> {
        for attempt in 0..=self.max_retries {
            let base = self.store.latest()?;

            if attempt > 0 {
                tracing::warn!(
                    checkpoint = commit_identifier,
                    attempt,
                    base = ?base.as_ref().map(|s| s.id),
                    "lost snapshot race; rebuilding on new base"
                );
            }

            let snapshot = self.build_snapshot(commit_identifier, base.as_ref(), grouped)?;
            if self.store.try_publish(&snapshot)? {
                tracing::info!(
                    checkpoint = commit_identifier,
                    snapshot = snapshot.id,
                    added = snapshot.stats.added_files,
                    deleted = snapshot.stats.deleted_files,
                    changelog = snapshot.stats.changelog_files,
                    "published snapshot"
                );
                return Ok(CommitResult::from_snapshot(&snapshot));
            }
        }

        Err(StrataError::CommitFailed(format!(
            "commit {} lost the snapshot race {} times",
            commit_identifier,
            self.max_retries + 1
        )))
    }

    fn build_snapshot(
        &self,
        commit_identifier: u64,
        base: Option<&Snapshot>,
        grouped: &BTreeMap<BucketKey, CommitMessage>,
    ) -> Result<Snapshot> {
        let mut buckets = base.map(|s| s.buckets.clone()).unwrap_or_default();
        let mut changelog_files = Vec::new();
        let mut stats = CommitStats::default();

        for (key, message) in grouped {
            let entry = buckets.entry(key.clone()).or_insert_with(|| BucketFiles {
                total_buckets: message.total_buckets(),
                ..BucketFiles::default()
            });
            apply_message(key, entry, message, &mut stats)?;

            for file in message
                .new_files_increment()
                .changelog_files
                .iter()
                .chain(&message.compact_increment().changelog_files)
            {
                changelog_files.push((key.clone(), file.clone()));
            }
        }
        buckets.retain(|_, files| !files.data_files.is_empty() || !files.index_files.is_empty());
        stats.changelog_files = changelog_files.len() as u64;

        let time_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Ok(Snapshot {
            id: base.map_or(1, |s| s.id + 1),
            parent: base.map(|s| s.id),
            commit_user: self.commit_user.clone(),
            commit_identifier,
            time_millis,
            buckets,
            changelog_files,
            delta: grouped.values().cloned().collect(),
            stats,
        })
    }
}

/// Keep `result` and drop results of older identifiers
///
/// Replays of dropped identifiers are answered from the snapshot chain.
fn cache_result(state: &mut CommitState, result: CommitResult) {
    let identifier = result.commit_identifier();
    state.results.insert(identifier, result);
    state.results.retain(|id, _| *id >= identifier);
}

/// Merge every message of a bucket into one
fn group_by_bucket(messages: Vec<CommitMessage>) -> Result<BTreeMap<BucketKey, CommitMessage>> {
    let mut grouped: BTreeMap<BucketKey, CommitMessage> = BTreeMap::new();
    for message in messages {
        let key = message.bucket_key();
        let merged = match grouped.remove(&key) {
            Some(existing) => existing.merge(message)?,
            None => message,
        };
        grouped.insert(key, merged);
    }
    Ok(grouped)
}

/// Apply one bucket's increments: new files first, then compaction
fn apply_message(
    key: &BucketKey,
    files: &mut BucketFiles,
    message: &CommitMessage,
    stats: &mut CommitStats,
) -> Result<()> {
    let data = message.new_files_increment();
    let compact = message.compact_increment();

    for file in &data.new_files {
        add_file(files, file, stats);
    }
    for file in data.deleted_files.iter().chain(&compact.compact_before) {
        remove_file(key, files, file, stats)?;
    }
    for file in &compact.compact_after {
        add_file(files, file, stats);
    }

    let index = message.index_increment();
    let deleted: HashSet<&String> = index.deleted_index_files.iter().collect();
    files.index_files.retain(|f| !deleted.contains(f));
    for name in &index.new_index_files {
        if !files.index_files.contains(name) {
            files.index_files.push(name.clone());
        }
    }
    Ok(())
}

fn add_file(files: &mut BucketFiles, file: &DataFileMeta, stats: &mut CommitStats) {
    if files.data_files.iter().any(|f| f.file_name == file.file_name) {
        return;
    }
    stats.added_files += 1;
    stats.added_rows += file.row_count;
    files.data_files.push(file.clone());
}

fn remove_file(
    key: &BucketKey,
    files: &mut BucketFiles,
    file: &DataFileMeta,
    stats: &mut CommitStats,
) -> Result<()> {
    let position = files
        .data_files
        .iter()
        .position(|f| f.file_name == file.file_name)
        .ok_or_else(|| StrataError::CommitConflict {
            bucket: key.to_string(),
            file: file.file_name.clone(),
        })?;
    files.data_files.remove(position);
    stats.deleted_files += 1;
    Ok(())
}
