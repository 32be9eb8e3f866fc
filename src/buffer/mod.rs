//! Write Buffer Module
//!
//! In-memory store of row mutations for one writer.
//!
//! ## Responsibilities
//! - Hold unflushed records and track their byte footprint
//! - Track how many pool bytes (whole pages) back those records
//! - Spill sorted runs to scratch storage when allowed
//! - Hand back every record, sorted, on flush and reset for reuse
//!
//! ## Accounting
//! `payload_bytes` is the sum of row estimates currently in memory;
//! `reserved_bytes` is what the writer holds from the pool and is always a
//! whole number of pages with `payload_bytes <= reserved_bytes`.

mod spill;

use std::path::PathBuf;

use crate::error::{Result, StrataError};
use crate::table::KeyValue;

pub use spill::SpillRun;

/// Buffered, spill-capable mutations of one writer
#[derive(Debug)]
pub struct WriteBuffer {
    /// Primary-key buffers sort by (key, sequence); append buffers keep order
    keyed: bool,
    records: Vec<KeyValue>,
    payload_bytes: u64,
    reserved_bytes: u64,
    page_size: u64,
    spillable: bool,
    spill_dir: PathBuf,
    spilled: Vec<SpillRun>,
}

impl WriteBuffer {
    pub fn new(keyed: bool, page_size: u64, spillable: bool, spill_dir: PathBuf) -> Self {
        Self {
            keyed,
            records: Vec::new(),
            payload_bytes: 0,
            reserved_bytes: 0,
            page_size,
            spillable,
            spill_dir,
            spilled: Vec::new(),
        }
    }

    /// Pool bytes that must be granted before a row of `size` fits
    ///
    /// Always a multiple of the page size; zero when the current pages
    /// still have room.
    pub fn reservation_needed(&self, size: u64) -> u64 {
        let needed = self.payload_bytes + size;
        if needed <= self.reserved_bytes {
            return 0;
        }
        let missing = needed - self.reserved_bytes;
        missing.div_ceil(self.page_size) * self.page_size
    }

    /// Record bytes granted by the pool
    pub fn grant(&mut self, bytes: u64) {
        self.reserved_bytes += bytes;
    }

    /// Add a record whose pages have already been granted
    pub fn add(&mut self, record: KeyValue, size: u64) -> Result<()> {
        if self.payload_bytes + size > self.reserved_bytes {
            return Err(StrataError::Storage(format!(
                "write buffer overrun: {} + {} bytes with {} reserved",
                self.payload_bytes, size, self.reserved_bytes
            )));
        }
        self.payload_bytes += size;
        self.records.push(record);
        Ok(())
    }

    /// Whether anything (in memory or spilled) is waiting to be flushed
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.spilled.is_empty()
    }

    pub fn in_memory_count(&self) -> usize {
        self.records.len()
    }

    pub fn spilled_count(&self) -> usize {
        self.spilled.iter().map(SpillRun::record_count).sum()
    }

    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes
    }

    /// Spilling is only worth it when there is something in memory
    pub fn can_spill(&self) -> bool {
        self.spillable && !self.records.is_empty()
    }

    /// Sort the in-memory records into a scratch run and free their pages
    ///
    /// Returns the bytes the caller must release to the pool.
    pub fn spill(&mut self) -> Result<u64> {
        if !self.can_spill() {
            return Ok(0);
        }
        self.sort_records();
        let run = SpillRun::write(&self.spill_dir, &self.records)?;
        tracing::debug!(
            records = run.record_count(),
            path = %run.path().display(),
            "spilled write buffer"
        );
        self.spilled.push(run);
        Ok(self.reset_memory())
    }

    /// Take every buffered record, sorted, and reset the buffer
    ///
    /// Keyed buffers come back ordered by (key, sequence), append buffers by
    /// sequence. The record vector is cleared, not reallocated. Returns the
    /// records and the bytes the caller must release to the pool.
    pub fn drain_sorted(&mut self) -> Result<(Vec<KeyValue>, u64)> {
        let mut all = Vec::with_capacity(self.records.len() + self.spilled_count());
        for run in &self.spilled {
            all.extend(run.read()?);
        }
        all.extend(self.records.drain(..));

        if self.keyed {
            all.sort_by(|a, b| a.key.cmp(&b.key).then(a.sequence.cmp(&b.sequence)));
        } else {
            all.sort_by_key(|r| r.sequence);
        }

        for run in self.spilled.drain(..) {
            run.remove()?;
        }

        Ok((all, self.reset_memory()))
    }

    /// Drop everything without producing output (writer expiry / close)
    pub fn discard(&mut self) -> Result<u64> {
        self.records.clear();
        for run in self.spilled.drain(..) {
            run.remove()?;
        }
        Ok(self.reset_memory())
    }

    fn sort_records(&mut self) {
        if self.keyed {
            self.records
                .sort_by(|a, b| a.key.cmp(&b.key).then(a.sequence.cmp(&b.sequence)));
        }
    }

    fn reset_memory(&mut self) -> u64 {
        self.records.clear();
        self.payload_bytes = 0;
        std::mem::take(&mut self.reserved_bytes)
    }
}
