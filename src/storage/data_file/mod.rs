//! Data File Module
//!
//! Immutable on-disk sorted runs of [`KeyValue`] records.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "STDF" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [RecordLen: u32][bincode KeyValue]                    │
//! │   ... repeated for each record ...                      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (variable, keyed files only)                │
//! │   [KeyLen: u32][Offset: u64][bincode Key]               │
//! │   ... repeated for each record ...                      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (16 bytes)                                       │
//! │   IndexOffset: u64 (8) | DataCRC: u32 (4) | Flags (4)   │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod builder;
mod iterator;
mod reader;

pub use builder::{DataFileBuilder, WrittenFile};
pub use iterator::DataFileIterator;
pub use reader::DataFileReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying a Strata data file
pub(crate) const MAGIC: &[u8; 4] = b"STDF";

/// Current data file format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + RecordCount (8) = 14 bytes
pub(crate) const HEADER_SIZE: u64 = 14;

/// Footer size: IndexOffset (8) + DataCRC (4) + Flags (4) = 16 bytes
pub(crate) const FOOTER_SIZE: u64 = 16;

/// Footer flag set when the file carries a key index
pub(crate) const FLAG_KEYED: u32 = 1;
