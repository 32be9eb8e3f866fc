//! Row model and table schema
//!
//! Rows are flat vectors of [`Datum`] tagged with a [`RowKind`]. The schema
//! only knows field names and which of them form the partition and primary
//! key; physical column encoding lives behind the file store.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

use super::partition::Partition;

/// Fixed per-row overhead charged against the write buffer budget
pub const ROW_HEADER_BYTES: u64 = 8;

/// Primary key values of a row, in primary key order
pub type Key = Vec<Datum>;

/// A single field value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Datum {
    /// Bytes this value occupies in the write buffer
    pub fn estimated_size(&self) -> u64 {
        match self {
            Datum::Null | Datum::Bool(_) => 1,
            Datum::Int(_) => 8,
            Datum::Str(s) => 4 + s.len() as u64,
            Datum::Bytes(b) => 4 + b.len() as u64,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "null"),
            Datum::Bool(b) => write!(f, "{}", b),
            Datum::Int(i) => write!(f, "{}", i),
            Datum::Str(s) => write!(f, "{}", s),
            Datum::Bytes(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Datum::Int(v as i64)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Bool(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Str(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::Str(v)
    }
}

/// Change kind carried by every row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowKind {
    Insert,
    UpdateBefore,
    UpdateAfter,
    Delete,
}

impl RowKind {
    /// "+I", "-U", "+U", "-D"
    pub fn short_string(&self) -> &'static str {
        match self {
            RowKind::Insert => "+I",
            RowKind::UpdateBefore => "-U",
            RowKind::UpdateAfter => "+U",
            RowKind::Delete => "-D",
        }
    }

    /// Whether the row removes the key's current value
    pub fn is_retract(&self) -> bool {
        matches!(self, RowKind::UpdateBefore | RowKind::Delete)
    }
}

/// A row mutation as it arrives from the input stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub kind: RowKind,
    pub values: Vec<Datum>,
}

impl Row {
    /// Insert row from values
    pub fn of(values: Vec<Datum>) -> Self {
        Self::of_kind(RowKind::Insert, values)
    }

    pub fn of_kind(kind: RowKind, values: Vec<Datum>) -> Self {
        Self { kind, values }
    }

    /// Bytes charged against the write buffer for this row
    pub fn estimated_size(&self) -> u64 {
        ROW_HEADER_BYTES + self.values.iter().map(Datum::estimated_size).sum::<u64>()
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.kind.short_string())?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, "]")
    }
}

/// A row as stored in buffers and files: key, sequence number, kind, values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Key,
    pub sequence: u64,
    pub kind: RowKind,
    pub values: Vec<Datum>,
}

impl KeyValue {
    pub fn to_row(&self) -> Row {
        Row::of_kind(self.kind, self.values.clone())
    }

    /// Same record re-tagged with another kind (changelog images)
    pub fn with_kind(&self, kind: RowKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }
}

/// Table schema: field names plus partition and primary key columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    fields: Vec<String>,
    partition_keys: Vec<usize>,
    primary_keys: Vec<usize>,
}

impl TableSchema {
    /// Create a schema, resolving key names against `fields`
    pub fn new(fields: &[&str], partition_keys: &[&str], primary_keys: &[&str]) -> Result<Self> {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let resolve = |names: &[&str]| -> Result<Vec<usize>> {
            names
                .iter()
                .map(|name| {
                    fields.iter().position(|f| f == name).ok_or_else(|| {
                        StrataError::Config(format!("unknown key field '{}'", name))
                    })
                })
                .collect()
        };

        let partition_keys = resolve(partition_keys)?;
        let primary_keys = resolve(primary_keys)?;

        Ok(Self {
            fields,
            partition_keys,
            primary_keys,
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_keys.is_empty()
    }

    /// Extract the primary key; append-only tables have an empty key
    pub fn key_of(&self, row: &Row) -> Result<Key> {
        self.project(row, &self.primary_keys)
    }

    /// Extract the partition values of a row
    pub fn partition_of(&self, row: &Row) -> Result<Partition> {
        Ok(Partition::new(self.project(row, &self.partition_keys)?))
    }

    /// Relative directory of a partition, e.g. `dt=2024-01-01/hr=3`
    pub fn partition_path(&self, partition: &Partition) -> String {
        if self.partition_keys.is_empty() || partition.values().is_empty() {
            return "default".to_string();
        }
        self.partition_keys
            .iter()
            .zip(partition.values())
            .map(|(&idx, value)| format!("{}={}", self.fields[idx], value))
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Reject rows whose arity does not match the schema
    pub fn check_row(&self, row: &Row) -> Result<()> {
        if row.values.len() != self.fields.len() {
            return Err(StrataError::Storage(format!(
                "row has {} fields, schema has {}",
                row.values.len(),
                self.fields.len()
            )));
        }
        Ok(())
    }

    fn project(&self, row: &Row, indices: &[usize]) -> Result<Vec<Datum>> {
        self.check_row(row)?;
        Ok(indices.iter().map(|&i| row.values[i].clone()).collect())
    }
}
