//! Batch writer for decoded log records
//!
//! Records are accumulated in memory and written to a [`TransactionalSink`]
//! in one transaction per batch. A batch is flushed when it reaches
//! `max_rows`, when `flush_interval` elapses with records waiting, and on
//! shutdown.
//!
//! [`TransactionalSink`]: logpipe_writer::TransactionalSink

use std::time::Duration;

mod buffered_batch;
mod channel;
mod flush;
mod writer;

pub use channel::{SubmitError, Submitter};
pub use flush::{flush_batch, FlushError, FlushReport, FlushTrigger};
pub use writer::BatchWriter;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_rows: usize,
    pub flush_interval: Duration,
    /// Records the hand-off channel holds before `submit` waits; 0 means
    /// unbounded.
    pub channel_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_rows: 100,
            flush_interval: Duration::from_secs(5),
            channel_capacity: 1000,
        }
    }
}

/// Running totals for a batch writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub flushes: u64,
    pub rows_written: u64,
    pub failed_flushes: u64,
    pub rows_dropped: u64,
}
