//! Local Snapshot Store
//!
//! ## Layout
//! ```text
//! {data_dir}/snapshot/
//!   ├── snapshot-1
//!   ├── snapshot-2
//!   └── LATEST          (hint, may lag behind the newest snapshot)
//! ```
//!
//! ## Publication
//! A snapshot is written to a private temp file and then hard-linked to
//! `snapshot-{id}`. The link fails if the name exists, which makes the
//! publish a compare-and-swap on the id, and readers never observe a
//! partially written snapshot.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec::{decode_frame, encode_frame};
use crate::error::{Result, StrataError};

use super::{Snapshot, SnapshotStore};

const SNAPSHOT_MAGIC: &[u8; 4] = b"STSN";
const SNAPSHOT_VERSION: u16 = 1;
const SNAPSHOT_PREFIX: &str = "snapshot-";
const LATEST_HINT: &str = "LATEST";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// [`SnapshotStore`] on the local filesystem
pub struct LocalSnapshotStore {
    dir: PathBuf,
}

impl LocalSnapshotStore {
    /// Open (creating if needed) the snapshot directory under `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("snapshot");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn snapshot_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}{}", SNAPSHOT_PREFIX, id))
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read_hint(&self) -> Result<Option<u64>> {
        match fs::read_to_string(self.dir.join(LATEST_HINT)) {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_hint(&self, id: u64) -> Result<()> {
        let tmp = self.temp_path();
        fs::write(&tmp, id.to_string())?;
        fs::rename(&tmp, self.dir.join(LATEST_HINT))?;
        Ok(())
    }

    /// Highest snapshot id found by listing the directory
    fn scan_latest(&self) -> Result<Option<u64>> {
        let mut latest = None;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let id = name
                .to_str()
                .and_then(|n| n.strip_prefix(SNAPSHOT_PREFIX))
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(id) = id {
                latest = Some(latest.map_or(id, |l: u64| l.max(id)));
            }
        }
        Ok(latest)
    }

    fn temp_path(&self) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir
            .join(format!(".tmp-{}-{}", std::process::id(), n))
    }
}

impl SnapshotStore for LocalSnapshotStore {
    fn latest_id(&self) -> Result<Option<u64>> {
        let mut latest = match self.read_hint()? {
            Some(id) if self.snapshot_path(id).exists() => id,
            _ => return self.scan_latest(),
        };
        // The hint is written after the snapshot, so it may be behind.
        while self.snapshot_path(latest + 1).exists() {
            latest += 1;
        }
        Ok(Some(latest))
    }

    fn read(&self, id: u64) -> Result<Snapshot> {
        let bytes = match fs::read(self.snapshot_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StrataError::Storage(format!("snapshot {} does not exist", id)))
            }
            Err(e) => return Err(e.into()),
        };
        decode_frame(SNAPSHOT_MAGIC, SNAPSHOT_VERSION, &bytes)
    }

    fn try_publish(&self, snapshot: &Snapshot) -> Result<bool> {
        let encoded = encode_frame(SNAPSHOT_MAGIC, SNAPSHOT_VERSION, snapshot)?;

        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }

        let linked = fs::hard_link(&tmp, self.snapshot_path(snapshot.id));
        fs::remove_file(&tmp)?;
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        self.write_hint(snapshot.id)?;
        Ok(true)
    }
}
