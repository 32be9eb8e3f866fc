//! Partition and bucket identity
//!
//! Bucket assignment happens upstream; this crate only consumes the resulting
//! `(partition, bucket)` pair, which keys writers, files and commit messages.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::schema::Datum;

/// Partition values of a row, in partition key order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Partition(Vec<Datum>);

impl Partition {
    pub fn new(values: Vec<Datum>) -> Self {
        Self(values)
    }

    /// The partition of an unpartitioned table
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn values(&self) -> &[Datum] {
        &self.0
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, "]")
    }
}

/// The shard a writer owns: one bucket of one partition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub partition: Partition,
    pub bucket: u32,
}

impl BucketKey {
    pub fn new(partition: Partition, bucket: u32) -> Self {
        Self { partition, bucket }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition={} bucket={}", self.partition, self.bucket)
    }
}
