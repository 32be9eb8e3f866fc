//! Data File Iterator
//!
//! Sequential iteration over all records in a data file.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};

use crate::error::Result;
use crate::table::KeyValue;

use super::reader::read_record;
use super::HEADER_SIZE;

/// Iterator over data file records in file order
pub struct DataFileIterator<'a> {
    file: &'a mut BufReader<File>,
    /// Stop reading when we reach this offset (start of index block)
    end_offset: u64,
    failed: bool,
}

impl<'a> DataFileIterator<'a> {
    pub(super) fn new(file: &'a mut BufReader<File>, end_offset: u64) -> Result<Self> {
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end_offset,
            failed: false,
        })
    }
}

impl<'a> Iterator for DataFileIterator<'a> {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let position = match self.file.stream_position() {
            Ok(pos) => pos,
            Err(e) => {
                self.failed = true;
                return Some(Err(e.into()));
            }
        };
        if position >= self.end_offset {
            return None;
        }

        let record = read_record(&mut *self.file, self.end_offset - position);
        if record.is_err() {
            self.failed = true;
        }
        Some(record)
    }
}
