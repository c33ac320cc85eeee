// Background flush loop
//
// One task owns the buffer. It flushes when the buffer reaches max_rows, when
// the interval ticks with a non-empty buffer, and once more on shutdown after
// draining whatever is still queued in the channel.

use std::sync::Arc;

use logpipe_core::LogRecord;
use logpipe_writer::TransactionalSink;
use metrics::{counter, histogram};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::buffered_batch::BufferedBatch;
use crate::channel::{record_channel, RecordReceiver, SubmitError, Submitter};
use crate::flush::{flush_batch, FlushTrigger};
use crate::{BatchConfig, WriterStats};

/// Tokio intervals reject a zero period.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a running batch writer.
///
/// Dropping the handle without calling [`BatchWriter::shutdown`] stops the
/// flush loop the same way, but nobody waits for the final flush.
pub struct BatchWriter {
    submitter: Submitter,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
    stats: Arc<Mutex<WriterStats>>,
}

impl BatchWriter {
    /// Start the flush loop on the current tokio runtime.
    pub fn spawn(config: BatchConfig, sink: Arc<dyn TransactionalSink>) -> Self {
        let max_rows = config.max_rows.max(1);
        let flush_interval = config.flush_interval.max(MIN_FLUSH_INTERVAL);
        if config.channel_capacity == 0 {
            warn!("Batch channel is unbounded; a slow store will grow memory without limit");
        }

        let (submitter, receiver) = record_channel(config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stats = Arc::new(Mutex::new(WriterStats::default()));

        info!(
            max_rows,
            flush_interval_ms = flush_interval.as_millis() as u64,
            channel_capacity = config.channel_capacity,
            "Batch writer started"
        );

        let flush_loop = FlushLoop {
            batch: BufferedBatch::new(max_rows),
            config: BatchConfig {
                max_rows,
                flush_interval,
                ..config
            },
            sink,
            receiver,
            stats: Arc::clone(&stats),
        };
        let task = tokio::spawn(flush_loop.run(shutdown_rx));

        Self {
            submitter,
            shutdown: shutdown_tx,
            task,
            stats,
        }
    }

    /// A cloneable handle for submitting records from other tasks.
    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    pub async fn submit(&self, record: LogRecord) -> Result<(), SubmitError> {
        self.submitter.submit(record).await
    }

    pub fn stats(&self) -> WriterStats {
        *self.stats.lock()
    }

    /// Stop accepting records, flush what is buffered or queued, and wait for
    /// the loop to finish.
    pub async fn shutdown(self) -> WriterStats {
        let BatchWriter {
            shutdown,
            task,
            stats,
            ..
        } = self;

        let _ = shutdown.send(());
        if let Err(e) = task.await {
            error!(error = %e, "Batch writer task ended abnormally");
        }

        let stats = *stats.lock();
        stats
    }
}

struct FlushLoop {
    config: BatchConfig,
    sink: Arc<dyn TransactionalSink>,
    receiver: RecordReceiver,
    batch: BufferedBatch,
    stats: Arc<Mutex<WriterStats>>,
}

impl FlushLoop {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let period = self.config.flush_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                received = self.receiver.recv() => match received {
                    Some(record) => {
                        self.batch.push(record);
                        if self.batch.is_full() {
                            self.flush(FlushTrigger::Size).await;
                            ticker.reset();
                        }
                    }
                    None => break,
                },

                _ = ticker.tick() => {
                    if !self.batch.is_empty() {
                        self.flush(FlushTrigger::Interval).await;
                    }
                }
            }
        }

        self.drain().await;
    }

    async fn drain(&mut self) {
        self.receiver.close();
        while let Some(record) = self.receiver.recv().await {
            self.batch.push(record);
            if self.batch.is_full() {
                self.flush(FlushTrigger::Shutdown).await;
            }
        }
        if !self.batch.is_empty() {
            self.flush(FlushTrigger::Shutdown).await;
        }

        let stats = *self.stats.lock();
        info!(
            flushes = stats.flushes,
            rows_written = stats.rows_written,
            failed_flushes = stats.failed_flushes,
            rows_dropped = stats.rows_dropped,
            "Batch writer stopped"
        );
    }

    async fn flush(&mut self, trigger: FlushTrigger) {
        let age_ms = self.batch.age().as_millis() as u64;
        let records = self.batch.take();
        let started = Instant::now();

        match flush_batch(self.sink.as_ref(), &records, trigger).await {
            Ok(report) => {
                {
                    let mut stats = self.stats.lock();
                    stats.flushes += 1;
                    stats.rows_written += report.rows as u64;
                }
                counter!("logpipe.batch.flushes", 1, "trigger" => trigger.as_str());
                counter!("logpipe.batch.rows", report.rows as u64);
                info!(
                    rows = report.rows,
                    trigger = trigger.as_str(),
                    age_ms,
                    "Flushed batch"
                );
            }
            Err(err) => {
                let rows = err.rows();
                {
                    let mut stats = self.stats.lock();
                    stats.failed_flushes += 1;
                    stats.rows_dropped += rows as u64;
                }
                counter!("logpipe.batch.flush_failures", 1, "trigger" => trigger.as_str());
                counter!("logpipe.batch.rows_dropped", rows as u64);
                error!(
                    rows,
                    trigger = trigger.as_str(),
                    error = %err,
                    "Flush failed; batch dropped"
                );
            }
        }

        histogram!(
            "logpipe.batch.flush_seconds",
            started.elapsed().as_secs_f64()
        );
    }
}
