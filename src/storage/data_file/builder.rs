//! Data File Builder
//!
//! Writes sorted records to a new data file and collects the metadata the
//! commit path needs (key range, sequence range, per-field stats).

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StrataError};
use crate::storage::stats::StatsCollector;
use crate::storage::FieldStats;
use crate::table::{Key, KeyValue, RowKind};

use super::{FLAG_KEYED, HEADER_SIZE, MAGIC, VERSION};

/// What the builder learned while writing
#[derive(Debug, Clone)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub row_count: u64,
    pub delete_row_count: u64,
    pub file_size: u64,
    pub min_key: Key,
    pub max_key: Key,
    pub min_sequence: u64,
    pub max_sequence: u64,
    pub value_stats: Vec<FieldStats>,
}

/// Builder for data files
pub struct DataFileBuilder {
    /// Output file path
    path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Whether to write a key index (primary-key data files)
    keyed: bool,
    row_count: u64,
    delete_row_count: u64,
    /// Current write position (for index)
    current_offset: u64,
    /// Index: key → file offset of record
    index: Vec<(Vec<u8>, u64)>,
    min_key: Option<Key>,
    max_key: Option<Key>,
    min_sequence: u64,
    max_sequence: u64,
    stats: Option<StatsCollector>,
    /// Running CRC hasher for data section
    data_hasher: crc32fast::Hasher,
}

impl DataFileBuilder {
    /// Create a builder; fails with `AlreadyExists` if `path` is taken
    ///
    /// Writes the header immediately; call `add()` in key order for keyed
    /// files, then `finish()` to write index and footer.
    pub fn new(path: &Path, keyed: bool, stats: Option<StatsCollector>) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);

        // Write header (record count placeholder, updated in finish)
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            keyed,
            row_count: 0,
            delete_row_count: 0,
            current_offset: HEADER_SIZE,
            index: Vec::new(),
            min_key: None,
            max_key: None,
            min_sequence: u64::MAX,
            max_sequence: 0,
            stats,
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Append one record
    pub fn add(&mut self, record: &KeyValue) -> Result<()> {
        if self.keyed {
            if let Some(last) = &self.max_key {
                if record.key <= *last {
                    return Err(StrataError::Storage(format!(
                        "keyed data file requires strictly increasing keys: {:?} after {:?}",
                        record.key, last
                    )));
                }
            }
            self.index
                .push((bincode::serialize(&record.key)?, self.current_offset));
        }

        let bytes = bincode::serialize(record)?;
        let len_bytes = (bytes.len() as u32).to_le_bytes();

        self.writer.write_all(&len_bytes)?;
        self.writer.write_all(&bytes)?;
        self.data_hasher.update(&len_bytes);
        self.data_hasher.update(&bytes);
        self.current_offset += 4 + bytes.len() as u64;

        // Key range is tracked for every file; append files compare empty keys
        if self.min_key.as_ref().map_or(true, |min| record.key < *min) {
            self.min_key = Some(record.key.clone());
        }
        if self.max_key.as_ref().map_or(true, |max| record.key > *max) {
            self.max_key = Some(record.key.clone());
        }
        self.min_sequence = self.min_sequence.min(record.sequence);
        self.max_sequence = self.max_sequence.max(record.sequence);

        if record.kind == RowKind::Delete {
            self.delete_row_count += 1;
        }
        if let Some(stats) = self.stats.as_mut() {
            stats.collect(&record.values);
        }

        self.row_count += 1;
        Ok(())
    }

    /// Finish building: write index block, footer, and return metadata
    pub fn finish(mut self) -> Result<WrittenFile> {
        let index_offset = self.current_offset;

        for (key, offset) in &self.index {
            self.writer.write_all(&(key.len() as u32).to_le_bytes())?;
            self.writer.write_all(&offset.to_le_bytes())?;
            self.writer.write_all(key)?;
        }

        let data_crc = self.data_hasher.finalize();
        let flags = if self.keyed { FLAG_KEYED } else { 0 };

        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(&flags.to_le_bytes())?;

        self.writer.flush()?;

        // Seek back and update record count in header
        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| StrataError::Storage(format!("Failed to flush data file: {}", e)))?;
        file.seek(SeekFrom::Start(6))?; // After magic + version
        file.write_all(&self.row_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();

        Ok(WrittenFile {
            path: self.path,
            row_count: self.row_count,
            delete_row_count: self.delete_row_count,
            file_size,
            min_key: self.min_key.unwrap_or_default(),
            max_key: self.max_key.unwrap_or_default(),
            min_sequence: if self.row_count == 0 { 0 } else { self.min_sequence },
            max_sequence: self.max_sequence,
            value_stats: self.stats.map(StatsCollector::finish).unwrap_or_default(),
        })
    }
}
