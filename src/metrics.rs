//! Write-side gauges
//!
//! Read-only values sampled on demand; exporting them is left to the host.

use crate::memory::WriteBufferPool;

pub const BUFFER_PREEMPT_COUNT: &str = "bufferPreemptCount";
pub const TOTAL_WRITE_BUFFER_SIZE: &str = "totalWriteBufferSizeByte";
pub const USED_WRITE_BUFFER_SIZE: &str = "usedWriteBufferSizeByte";
pub const NUM_WRITERS: &str = "numWriters";
pub const COMPACTIONS_IN_FLIGHT: &str = "compactionsInFlight";

/// Point-in-time gauge values of one write task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteMetrics {
    pub buffer_preempt_count: u64,
    pub total_write_buffer_bytes: u64,
    pub used_write_buffer_bytes: u64,
    pub num_writers: usize,
    pub compactions_in_flight: usize,
}

impl WriteMetrics {
    pub fn collect(pool: &WriteBufferPool, num_writers: usize, compactions_in_flight: usize) -> Self {
        Self {
            buffer_preempt_count: pool.preempt_count(),
            total_write_buffer_bytes: pool.budget(),
            used_write_buffer_bytes: pool.used_bytes(),
            num_writers,
            compactions_in_flight,
        }
    }

    /// Name/value pairs
    pub fn gauges(&self) -> Vec<(&'static str, u64)> {
        vec![
            (BUFFER_PREEMPT_COUNT, self.buffer_preempt_count),
            (TOTAL_WRITE_BUFFER_SIZE, self.total_write_buffer_bytes),
            (USED_WRITE_BUFFER_SIZE, self.used_write_buffer_bytes),
            (NUM_WRITERS, self.num_writers as u64),
            (COMPACTIONS_IN_FLIGHT, self.compactions_in_flight as u64),
        ]
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }
}
