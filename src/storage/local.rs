//! Local File Store
//!
//! Lays out data and changelog files on the local filesystem.
//!
//! ## Layout
//! ```text
//! {root}/{partition path}/bucket-{n}/data-000001.dat
//!                                   /changelog-000002.dat
//! ```
//!
//! ## Concurrency:
//! - `next_ids`: per-bucket file id counters behind a Mutex; the ingest
//!   thread and compaction workers allocate from the same counters
//! - File creation uses `create_new`, so a name clash with another process
//!   just moves on to the next id

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Result, StrataError};
use crate::table::{BucketKey, KeyValue, TableSchema};

use super::{DataFileBuilder, DataFileMeta, DataFileReader, FileKind, FileStore, StatsCollector};

/// Attempts at finding a free file name before giving up
const MAX_NAME_ATTEMPTS: u32 = 64;

/// [`FileStore`] backed by a local directory tree
pub struct LocalFileStore {
    root: PathBuf,
    schema: TableSchema,
    stats_enabled: bool,
    /// Next file id per bucket directory
    next_ids: Mutex<HashMap<PathBuf, u64>>,
}

impl LocalFileStore {
    pub fn new(root: &Path, schema: TableSchema, stats_enabled: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            schema,
            stats_enabled,
            next_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding every file of a bucket
    pub fn bucket_dir(&self, bucket: &BucketKey) -> PathBuf {
        self.root
            .join(self.schema.partition_path(&bucket.partition))
            .join(format!("bucket-{}", bucket.bucket))
    }

    /// Full path of a file of `bucket`
    pub fn file_path(&self, bucket: &BucketKey, file: &DataFileMeta) -> PathBuf {
        self.bucket_dir(bucket).join(&file.file_name)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Take the next id for `dir`, discovering existing files on first use
    fn allocate_id(&self, dir: &Path) -> Result<u64> {
        let mut next_ids = self.next_ids.lock();
        if let Some(next) = next_ids.get_mut(dir) {
            let id = *next;
            *next += 1;
            return Ok(id);
        }

        let mut max_id = 0;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(id) = Self::parse_file_id(&entry.path()) {
                max_id = max_id.max(id);
            }
        }

        next_ids.insert(dir.to_path_buf(), max_id + 2);
        Ok(max_id + 1)
    }

    fn file_name(kind: FileKind, id: u64) -> String {
        match kind {
            FileKind::Data => format!("data-{:06}.dat", id),
            FileKind::Changelog => format!("changelog-{:06}.dat", id),
        }
    }

    /// Parse file id from filename
    /// "data-000042.dat" → Some(42), "changelog-000007.dat" → Some(7)
    fn parse_file_id(path: &Path) -> Option<u64> {
        let name = path.file_stem()?.to_string_lossy();
        let id_str = name
            .strip_prefix("data-")
            .or_else(|| name.strip_prefix("changelog-"))?;
        id_str.parse().ok()
    }
}

impl FileStore for LocalFileStore {
    fn write_file(
        &self,
        bucket: &BucketKey,
        level: u8,
        kind: FileKind,
        records: &[KeyValue],
    ) -> Result<DataFileMeta> {
        let dir = self.bucket_dir(bucket);
        fs::create_dir_all(&dir)?;

        let keyed = kind == FileKind::Data && self.schema.has_primary_key();

        for _ in 0..MAX_NAME_ATTEMPTS {
            let file_name = Self::file_name(kind, self.allocate_id(&dir)?);
            let stats = self
                .stats_enabled
                .then(|| StatsCollector::new(self.schema.field_count()));

            let mut builder = match DataFileBuilder::new(&dir.join(&file_name), keyed, stats) {
                Ok(builder) => builder,
                Err(StrataError::Io(e)) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            };
            for record in records {
                builder.add(record)?;
            }
            let written = builder.finish()?;

            tracing::trace!(
                %bucket,
                file = %file_name,
                level,
                rows = written.row_count,
                "wrote file"
            );

            return Ok(DataFileMeta {
                file_name,
                kind,
                level,
                row_count: written.row_count,
                delete_row_count: written.delete_row_count,
                file_size: written.file_size,
                min_key: written.min_key,
                max_key: written.max_key,
                min_sequence: written.min_sequence,
                max_sequence: written.max_sequence,
                value_stats: written.value_stats,
            });
        }

        Err(StrataError::Storage(format!(
            "no free file name in {} after {} attempts",
            dir.display(),
            MAX_NAME_ATTEMPTS
        )))
    }

    fn read_file(&self, bucket: &BucketKey, file: &DataFileMeta) -> Result<Vec<KeyValue>> {
        self.open_reader(bucket, file)?.read_all()
    }

    fn open_reader(&self, bucket: &BucketKey, file: &DataFileMeta) -> Result<DataFileReader> {
        DataFileReader::open(&self.file_path(bucket, file))
    }
}
