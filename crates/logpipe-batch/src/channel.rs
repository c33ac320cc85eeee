// Hand-off channel between the consumer and the flush loop
//
// Bounded by default so a stalled store pushes back on the consumer instead
// of growing memory; capacity 0 selects an unbounded channel.

use logpipe_core::LogRecord;
use thiserror::Error;
use tokio::sync::mpsc;

/// Returned when the writer no longer accepts records. The record is handed
/// back so the caller can decide what to do with the original message.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("batch writer is closed")]
    Closed(LogRecord),
}

impl SubmitError {
    pub fn into_record(self) -> LogRecord {
        match self {
            Self::Closed(record) => record,
        }
    }
}

#[derive(Debug, Clone)]
enum RecordSender {
    Bounded(mpsc::Sender<LogRecord>),
    Unbounded(mpsc::UnboundedSender<LogRecord>),
}

/// Cloneable handle for handing records to a running batch writer.
#[derive(Debug, Clone)]
pub struct Submitter {
    sender: RecordSender,
}

impl Submitter {
    /// Queue a record for the next flush. Waits for room when the channel is
    /// bounded and full.
    pub async fn submit(&self, record: LogRecord) -> Result<(), SubmitError> {
        match &self.sender {
            RecordSender::Bounded(tx) => tx
                .send(record)
                .await
                .map_err(|e| SubmitError::Closed(e.0)),
            RecordSender::Unbounded(tx) => tx.send(record).map_err(|e| SubmitError::Closed(e.0)),
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.sender {
            RecordSender::Bounded(tx) => tx.is_closed(),
            RecordSender::Unbounded(tx) => tx.is_closed(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum RecordReceiver {
    Bounded(mpsc::Receiver<LogRecord>),
    Unbounded(mpsc::UnboundedReceiver<LogRecord>),
}

impl RecordReceiver {
    pub async fn recv(&mut self) -> Option<LogRecord> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Stop accepting new records; already queued ones stay readable.
    pub fn close(&mut self) {
        match self {
            Self::Bounded(rx) => rx.close(),
            Self::Unbounded(rx) => rx.close(),
        }
    }
}

pub(crate) fn record_channel(capacity: usize) -> (Submitter, RecordReceiver) {
    if capacity == 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Submitter {
                sender: RecordSender::Unbounded(tx),
            },
            RecordReceiver::Unbounded(rx),
        )
    } else {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Submitter {
                sender: RecordSender::Bounded(tx),
            },
            RecordReceiver::Bounded(rx),
        )
    }
}
