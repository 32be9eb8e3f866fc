//! Level view of one bucket
//!
//! Level 0 holds flush output (overlapping runs, newest last); every higher
//! level holds at most one sorted run.

use serde::{Deserialize, Serialize};

use crate::storage::{DataFileMeta, FileKind};

/// Data files of one bucket, grouped by level
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Levels {
    files: Vec<DataFileMeta>,
}

impl Levels {
    /// Build from an unordered file list (restore / snapshot read)
    pub fn from_files(files: impl IntoIterator<Item = DataFileMeta>) -> Self {
        let mut levels = Self::default();
        for file in files {
            levels.add(file);
        }
        levels
    }

    /// Add a data file; changelog files are not part of the level structure
    pub fn add(&mut self, file: DataFileMeta) {
        if file.kind != FileKind::Data {
            return;
        }
        if self.files.iter().any(|f| f.file_name == file.file_name) {
            return;
        }
        self.files.push(file);
        self.files
            .sort_by(|a, b| a.level.cmp(&b.level).then(a.min_sequence.cmp(&b.min_sequence)));
    }

    /// Replace compaction inputs with outputs
    pub fn apply_compaction(&mut self, before: &[DataFileMeta], after: &[DataFileMeta]) {
        self.files
            .retain(|f| !before.iter().any(|b| b.file_name == f.file_name));
        for file in after {
            self.add(file.clone());
        }
    }

    pub fn files(&self) -> &[DataFileMeta] {
        &self.files
    }

    pub fn level(&self, level: u8) -> Vec<DataFileMeta> {
        self.files
            .iter()
            .filter(|f| f.level == level)
            .cloned()
            .collect()
    }

    pub fn level0_count(&self) -> usize {
        self.files.iter().filter(|f| f.level == 0).count()
    }

    /// Total file size of levels in `range`
    pub fn size_of(&self, range: std::ops::RangeInclusive<u8>) -> u64 {
        self.files
            .iter()
            .filter(|f| range.contains(&f.level))
            .map(|f| f.file_size)
            .sum()
    }

    /// Highest sequence number present in any file
    pub fn max_sequence(&self) -> Option<u64> {
        self.files
            .iter()
            .filter(|f| f.row_count > 0)
            .map(|f| f.max_sequence)
            .max()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
