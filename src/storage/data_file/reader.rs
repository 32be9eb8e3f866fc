//! Data File Reader
//!
//! Opens data files and provides O(log n) key lookups via an in-memory index.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, StrataError};
use crate::table::{Key, KeyValue};

use super::iterator::DataFileIterator;
use super::{FLAG_KEYED, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Reader for data files
pub struct DataFileReader {
    /// File handle for reading records
    pub(super) file: BufReader<File>,
    /// In-memory index: key → file offset (empty for unkeyed files)
    index: BTreeMap<Key, u64>,
    keyed: bool,
    row_count: u64,
    data_crc: u32,
    /// Index block starting offset (end of data block)
    pub(super) index_offset: u64,
}

impl DataFileReader {
    /// Open a data file, loading its key index into memory
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(StrataError::Corruption(format!(
                "data file {} is truncated ({} bytes)",
                path.display(),
                file_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(StrataError::Corruption(format!(
                "Invalid data file magic: expected STDF, got {:?}",
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(StrataError::Corruption(format!(
                "Unsupported data file version: {}",
                version
            )));
        }

        let mut count = [0u8; 8];
        count.copy_from_slice(&header[6..14]);
        let row_count = u64::from_le_bytes(count);

        // Footer: index offset, data CRC, flags
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let mut word = [0u8; 8];
        word.copy_from_slice(&footer[0..8]);
        let index_offset = u64::from_le_bytes(word);
        let data_crc = u32::from_le_bytes([footer[8], footer[9], footer[10], footer[11]]);
        let flags = u32::from_le_bytes([footer[12], footer[13], footer[14], footer[15]]);

        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(StrataError::Corruption(format!(
                "index offset {} out of bounds",
                index_offset
            )));
        }

        // Index block size = file_size - footer_size - index_offset
        let mut index = BTreeMap::new();
        let keyed = flags & FLAG_KEYED != 0;
        if keyed {
            file.seek(SeekFrom::Start(index_offset))?;
            let mut index_data = vec![0u8; (file_size - FOOTER_SIZE - index_offset) as usize];
            file.read_exact(&mut index_data)?;

            // [key_len(4)][offset(8)][key]
            let mut pos = 0;
            while pos + 12 <= index_data.len() {
                let key_len = u32::from_le_bytes([
                    index_data[pos],
                    index_data[pos + 1],
                    index_data[pos + 2],
                    index_data[pos + 3],
                ]) as usize;
                word.copy_from_slice(&index_data[pos + 4..pos + 12]);
                let offset = u64::from_le_bytes(word);
                pos += 12;

                if pos + key_len > index_data.len() {
                    return Err(StrataError::Corruption("truncated index entry".to_string()));
                }
                let key: Key = bincode::deserialize(&index_data[pos..pos + key_len])?;
                pos += key_len;

                index.insert(key, offset);
            }
        }

        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            file: BufReader::new(file),
            index,
            keyed,
            row_count,
            data_crc,
            index_offset,
        })
    }

    /// Point lookup, O(log n) via the in-memory index
    ///
    /// Returns the stored record (which may be a delete record) or `None`
    /// when the key is not in this file. Unkeyed files never match.
    pub fn get(&mut self, key: &Key) -> Result<Option<KeyValue>> {
        let offset = match self.index.get(key) {
            Some(&off) => off,
            None => return Ok(None),
        };

        if offset < HEADER_SIZE || offset >= self.index_offset {
            return Err(StrataError::Corruption(format!(
                "index points at {} outside the data block",
                offset
            )));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        read_record(&mut self.file, self.index_offset - offset).map(Some)
    }

    /// Read every record and verify the data block checksum
    pub fn read_all(&mut self) -> Result<Vec<KeyValue>> {
        let expected_crc = self.data_crc;
        let mut hasher = crc32fast::Hasher::new();
        // Every record carries at least its 4-byte length prefix
        let max_records = (self.index_offset - HEADER_SIZE) / 4;
        let mut records = Vec::with_capacity(self.row_count.min(max_records) as usize);

        self.file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut offset = HEADER_SIZE;
        while offset < self.index_offset {
            let mut len_bytes = [0u8; 4];
            self.file.read_exact(&mut len_bytes)?;
            let len = checked_record_len(len_bytes, self.index_offset - offset)?;
            let mut bytes = vec![0u8; len];
            self.file.read_exact(&mut bytes)?;

            hasher.update(&len_bytes);
            hasher.update(&bytes);
            records.push(bincode::deserialize(&bytes)?);
            offset += 4 + len as u64;
        }

        if hasher.finalize() != expected_crc {
            return Err(StrataError::Corruption("data block CRC mismatch".to_string()));
        }
        Ok(records)
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    /// Quick check if a key might be in this file (range check)
    pub fn might_contain(&self, key: &Key) -> bool {
        match (self.index.keys().next(), self.index.keys().next_back()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false,
        }
    }

    /// Create an iterator over all records
    pub fn iter(&mut self) -> Result<DataFileIterator<'_>> {
        DataFileIterator::new(&mut self.file, self.index_offset)
    }
}

/// Read one length-prefixed record at the current position
///
/// `remaining` is the number of data block bytes left from that position.
pub(super) fn read_record<R: Read>(reader: &mut R, remaining: u64) -> Result<KeyValue> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let mut bytes = vec![0u8; checked_record_len(len_bytes, remaining)?];
    reader.read_exact(&mut bytes)?;
    Ok(bincode::deserialize(&bytes)?)
}

/// Decode a length prefix, rejecting records that overrun the data block
fn checked_record_len(len_bytes: [u8; 4], remaining: u64) -> Result<usize> {
    let len = u32::from_le_bytes(len_bytes) as u64;
    if 4 + len > remaining {
        return Err(StrataError::Corruption(format!(
            "record of {} bytes overruns the data block ({} bytes left)",
            len,
            remaining.saturating_sub(4)
        )));
    }
    Ok(len as usize)
}
