// Transactional flush of one batch
//
// Every row of a batch goes through a single transaction: either all rows are
// committed or none are.

use logpipe_core::{LogRecord, INSERT_LOG_SQL};
use logpipe_writer::{SinkError, TransactionalSink};
use thiserror::Error;
use tracing::{debug, warn};

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The buffer reached `max_rows`
    Size,
    /// The flush interval elapsed with a non-empty buffer
    Interval,
    /// The writer is shutting down
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Interval => "interval",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Outcome of a committed flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub rows: usize,
    pub trigger: FlushTrigger,
}

/// A flush that did not commit. None of the batch's rows were persisted.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("could not begin transaction for {rows} rows: {source}")]
    Begin {
        rows: usize,
        #[source]
        source: SinkError,
    },

    #[error("insert {index} of {rows} failed, batch rolled back: {source}")]
    Execute {
        index: usize,
        rows: usize,
        #[source]
        source: SinkError,
    },

    #[error("commit of {rows} rows failed: {source}")]
    Commit {
        rows: usize,
        #[source]
        source: SinkError,
    },
}

impl FlushError {
    /// Rows lost with this batch.
    pub fn rows(&self) -> usize {
        match self {
            Self::Begin { rows, .. } | Self::Execute { rows, .. } | Self::Commit { rows, .. } => {
                *rows
            }
        }
    }
}

/// Insert `records` in order inside one transaction.
///
/// On an insert failure the transaction is rolled back and the error returned;
/// the caller owns the decision of what happens to the records.
#[tracing::instrument(
    name = "batch.flush",
    skip(sink, records, trigger),
    fields(rows = records.len(), trigger = trigger.as_str())
)]
pub async fn flush_batch(
    sink: &dyn TransactionalSink,
    records: &[LogRecord],
    trigger: FlushTrigger,
) -> Result<FlushReport, FlushError> {
    let rows = records.len();
    let mut tx = sink
        .begin()
        .await
        .map_err(|source| FlushError::Begin { rows, source })?;

    for (index, record) in records.iter().enumerate() {
        if let Err(source) = tx.execute(INSERT_LOG_SQL, &record.params()).await {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback after failed insert also failed");
            }
            return Err(FlushError::Execute {
                index,
                rows,
                source,
            });
        }
    }

    tx.commit()
        .await
        .map_err(|source| FlushError::Commit { rows, source })?;

    debug!(rows, "Batch committed");
    Ok(FlushReport { rows, trigger })
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe_writer::MemorySink;

    fn records(messages: &[&str]) -> Vec<LogRecord> {
        messages
            .iter()
            .map(|m| LogRecord::builder(*m).build())
            .collect()
    }

    #[tokio::test]
    async fn test_commits_rows_in_order() {
        let sink = MemorySink::new();
        let batch = records(&["a", "b", "c"]);

        let report = flush_batch(&sink, &batch, FlushTrigger::Size).await.unwrap();
        assert_eq!(report.rows, 3);
        assert_eq!(sink.rows(), batch);
        assert_eq!(sink.transactions_committed(), 1);
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_whole_batch() {
        let sink = MemorySink::new();
        sink.fail_on_message("bad");

        let err = flush_batch(&sink, &records(&["a", "bad", "c"]), FlushTrigger::Interval)
            .await
            .unwrap_err();

        assert!(matches!(err, FlushError::Execute { index: 1, rows: 3, .. }));
        assert_eq!(sink.row_count(), 0);
        assert_eq!(sink.transactions_rolled_back(), 1);
    }

    #[tokio::test]
    async fn test_begin_and_commit_failures() {
        let sink = MemorySink::new();

        sink.fail_next_begins(1);
        let err = flush_batch(&sink, &records(&["a"]), FlushTrigger::Size)
            .await
            .unwrap_err();
        assert!(matches!(err, FlushError::Begin { rows: 1, .. }));

        sink.fail_next_commits(1);
        let err = flush_batch(&sink, &records(&["a", "b"]), FlushTrigger::Shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, FlushError::Commit { rows: 2, .. }));
        assert_eq!(err.rows(), 2);
        assert_eq!(sink.row_count(), 0);
    }
}
