// Buffered batch accumulation logic
//
// Accumulates decoded records in arrival order until the flush loop takes them

use logpipe_core::LogRecord;
use tokio::time::{Duration, Instant};

/// Records waiting for the next flush
#[derive(Debug)]
pub(crate) struct BufferedBatch {
    records: Vec<LogRecord>,
    max_rows: usize,
    opened_at: Option<Instant>,
}

impl BufferedBatch {
    pub fn new(max_rows: usize) -> Self {
        Self {
            records: Vec::with_capacity(max_rows),
            max_rows,
            opened_at: None,
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        if self.records.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.records.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.max_rows
    }

    /// Time since the first record of the current batch arrived.
    pub fn age(&self) -> Duration {
        self.opened_at
            .map(|opened| opened.elapsed())
            .unwrap_or_default()
    }

    /// Take every buffered record, leaving an empty batch behind.
    pub fn take(&mut self) -> Vec<LogRecord> {
        self.opened_at = None;
        std::mem::replace(&mut self.records, Vec::with_capacity(self.max_rows))
    }
}
