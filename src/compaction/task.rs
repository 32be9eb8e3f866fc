//! Compaction task execution
//!
//! ## Task Flow
//! ```text
//!   inputs (L0 .. Ln) ──read──► newest record per key ──► output run (level n)
//!                                     │
//!          before-image (inputs at level > 0, else lookup) ──► changelog file
//! ```
//!
//! Inputs are only read; the task writes new files and reports which files
//! they replace. The caller decides when the swap becomes visible.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::storage::{DataFileMeta, FileKind, FileStore};
use crate::table::{BucketKey, Key, KeyValue, RowKind};
use crate::writer::CompactIncrement;

use super::lookup::{LookupLevels, LookupSource};

/// A merge of some runs of one bucket
#[derive(Debug, Clone)]
pub struct CompactionTask {
    pub id: u64,
    pub key: BucketKey,
    pub total_buckets: u32,
    /// Files merged and replaced by the output
    pub inputs: Vec<DataFileMeta>,
    /// Files searched for before-images but left untouched
    pub lookup_files: Vec<DataFileMeta>,
    pub output_level: u8,
    /// Output holds every run of the bucket, so deletes can be dropped
    pub drop_deletes: bool,
    /// Checkpoint at which the task was submitted
    pub submitted_at: u64,
}

/// Outcome of a finished task
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub task_id: u64,
    pub key: BucketKey,
    pub total_buckets: u32,
    pub increment: CompactIncrement,
}

impl CompactionTask {
    /// Merge the inputs and emit changelog rows
    pub fn run(&self, fs: &dyn FileStore) -> Result<CompactionResult> {
        let mut latest: BTreeMap<Key, KeyValue> = BTreeMap::new();
        let mut persisted: BTreeMap<Key, KeyValue> = BTreeMap::new();

        for file in &self.inputs {
            for record in fs.read_file(&self.key, file)? {
                if file.level > 0 {
                    keep_newest(&mut persisted, record.clone());
                }
                keep_newest(&mut latest, record);
            }
        }

        let mut lookup = LookupLevels::new(fs, &self.key, self.lookup_files.clone());
        let mut changelog = Vec::new();
        let mut output = Vec::with_capacity(latest.len());

        for (key, after) in latest {
            let before = match persisted.remove(&key) {
                Some(found) => Some(found),
                None => lookup.lookup(&key)?,
            };
            emit_changelog(before.as_ref(), &after, &mut changelog);

            if after.kind == RowKind::Delete && self.drop_deletes {
                continue;
            }
            output.push(after);
        }

        let mut increment = CompactIncrement {
            compact_before: self.inputs.clone(),
            ..CompactIncrement::default()
        };
        if !output.is_empty() {
            increment
                .compact_after
                .push(fs.write_file(&self.key, self.output_level, FileKind::Data, &output)?);
        }
        if !changelog.is_empty() {
            increment
                .changelog_files
                .push(fs.write_file(&self.key, 0, FileKind::Changelog, &changelog)?);
        }

        tracing::debug!(
            bucket = %self.key,
            task = self.id,
            inputs = self.inputs.len(),
            output_rows = output.len(),
            changelog_rows = changelog.len(),
            level = self.output_level,
            "compaction task finished"
        );

        Ok(CompactionResult {
            task_id: self.id,
            key: self.key.clone(),
            total_buckets: self.total_buckets,
            increment,
        })
    }
}

fn keep_newest(map: &mut BTreeMap<Key, KeyValue>, record: KeyValue) {
    match map.get(&record.key) {
        Some(existing) if existing.sequence >= record.sequence => {}
        _ => {
            map.insert(record.key.clone(), record);
        }
    }
}

/// Changelog rows for one key given its persisted and merged values
fn emit_changelog(before: Option<&KeyValue>, after: &KeyValue, out: &mut Vec<KeyValue>) {
    let before = before.filter(|b| b.kind != RowKind::Delete);
    match (before, after.kind == RowKind::Delete) {
        (None, false) => out.push(after.with_kind(RowKind::Insert)),
        (None, true) => {}
        (Some(before), true) => out.push(KeyValue {
            sequence: after.sequence,
            ..before.with_kind(RowKind::Delete)
        }),
        (Some(before), false) => {
            if before.values != after.values {
                out.push(KeyValue {
                    sequence: after.sequence,
                    ..before.with_kind(RowKind::UpdateBefore)
                });
                out.push(after.with_kind(RowKind::UpdateAfter));
            }
        }
    }
}
