//! Per-field statistics collected while a file is written

use crate::storage::FieldStats;
use crate::table::Datum;

/// Accumulates min / max / null count for every field
#[derive(Debug)]
pub struct StatsCollector {
    fields: Vec<FieldStats>,
}

impl StatsCollector {
    pub fn new(field_count: usize) -> Self {
        Self {
            fields: vec![FieldStats::default(); field_count],
        }
    }

    pub fn collect(&mut self, values: &[Datum]) {
        for (stats, value) in self.fields.iter_mut().zip(values) {
            if value.is_null() {
                stats.null_count += 1;
                continue;
            }
            if stats.min.as_ref().map_or(true, |min| value < min) {
                stats.min = Some(value.clone());
            }
            if stats.max.as_ref().map_or(true, |max| value > max) {
                stats.max = Some(value.clone());
            }
        }
    }

    pub fn finish(self) -> Vec<FieldStats> {
        self.fields
    }
}
