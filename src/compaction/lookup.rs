//! Point lookups into persisted levels
//!
//! Used by compaction to find the current value of a key that is not part of
//! the compaction inputs.

use std::collections::HashMap;

use crate::error::Result;
use crate::storage::{DataFileMeta, DataFileReader, FileStore};
use crate::table::{BucketKey, Key, KeyValue};

/// Current persisted value of a key, if any
pub trait LookupSource {
    fn lookup(&mut self, key: &Key) -> Result<Option<KeyValue>>;
}

/// Lookup over a set of files of one bucket, lowest (newest) level first
pub struct LookupLevels<'a> {
    fs: &'a dyn FileStore,
    bucket: &'a BucketKey,
    files: Vec<DataFileMeta>,
    readers: HashMap<String, DataFileReader>,
}

impl<'a> LookupLevels<'a> {
    pub fn new(fs: &'a dyn FileStore, bucket: &'a BucketKey, mut files: Vec<DataFileMeta>) -> Self {
        files.sort_by(|a, b| {
            a.level
                .cmp(&b.level)
                .then(b.max_sequence.cmp(&a.max_sequence))
        });
        Self {
            fs,
            bucket,
            files,
            readers: HashMap::new(),
        }
    }
}

impl LookupSource for LookupLevels<'_> {
    fn lookup(&mut self, key: &Key) -> Result<Option<KeyValue>> {
        for file in &self.files {
            if !file.may_contain(key) {
                continue;
            }
            if !self.readers.contains_key(&file.file_name) {
                let reader = self.fs.open_reader(self.bucket, file)?;
                self.readers.insert(file.file_name.clone(), reader);
            }
            let Some(reader) = self.readers.get_mut(&file.file_name) else {
                continue;
            };
            if let Some(found) = reader.get(key)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}
