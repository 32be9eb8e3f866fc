//! Spill runs
//!
//! A sorted slice of a write buffer parked on local scratch storage. Spill
//! runs are never referenced by a snapshot; they are merged back into the
//! buffer's output on flush and removed afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec::{decode_frame, encode_frame};
use crate::error::Result;
use crate::table::KeyValue;

const SPILL_MAGIC: &[u8; 4] = b"STSP";
const SPILL_VERSION: u16 = 1;

static NEXT_SPILL_ID: AtomicU64 = AtomicU64::new(0);

/// One spilled, sorted run
#[derive(Debug)]
pub struct SpillRun {
    path: PathBuf,
    record_count: usize,
}

impl SpillRun {
    /// Write `records` (already sorted) to a fresh file under `dir`
    pub fn write(dir: &Path, records: &[KeyValue]) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let id = NEXT_SPILL_ID.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("spill-{}-{:06}.run", std::process::id(), id));

        let frame = encode_frame(SPILL_MAGIC, SPILL_VERSION, &records)?;
        fs::write(&path, &frame)?;

        Ok(Self {
            path,
            record_count: records.len(),
        })
    }

    /// Load the run back into memory
    pub fn read(&self) -> Result<Vec<KeyValue>> {
        let bytes = fs::read(&self.path)?;
        decode_frame(SPILL_MAGIC, SPILL_VERSION, &bytes)
    }

    /// Delete the scratch file
    pub fn remove(self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
