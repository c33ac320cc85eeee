use std::sync::Arc;
use std::time::Duration;

use logpipe_batch::{BatchConfig, BatchWriter, SubmitError, WriterStats};
use logpipe_core::LogRecord;
use logpipe_writer::MemorySink;
use tokio::time::sleep;

fn config(max_rows: usize, interval_secs: u64) -> BatchConfig {
    BatchConfig {
        max_rows,
        flush_interval: Duration::from_secs(interval_secs),
        channel_capacity: 1000,
    }
}

fn record(n: usize) -> LogRecord {
    LogRecord::builder(format!("message {}", n))
        .service("checkout")
        .build()
}

async fn submit_range(writer: &BatchWriter, range: std::ops::Range<usize>) {
    for n in range {
        writer.submit(record(n)).await.unwrap();
    }
}

fn messages(sink: &MemorySink) -> Vec<String> {
    sink.rows()
        .iter()
        .map(|r| r.message().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn partial_batch_flushes_when_interval_elapses() {
    let sink = MemorySink::new();
    let writer = BatchWriter::spawn(config(100, 5), Arc::new(sink.clone()));

    submit_range(&writer, 0..3).await;
    sleep(Duration::from_secs(4)).await;
    assert_eq!(sink.row_count(), 0);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(messages(&sink), ["message 0", "message 1", "message 2"]);
    assert_eq!(sink.transactions_committed(), 1);

    writer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn full_batch_flushes_without_waiting_for_interval() {
    let sink = MemorySink::new();
    let writer = BatchWriter::spawn(config(100, 5), Arc::new(sink.clone()));

    submit_range(&writer, 0..100).await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(sink.row_count(), 100);
    assert_eq!(sink.transactions_committed(), 1);

    writer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn overflow_is_written_by_the_next_interval_flush() {
    let sink = MemorySink::new();
    let writer = BatchWriter::spawn(config(100, 5), Arc::new(sink.clone()));

    submit_range(&writer, 0..150).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.row_count(), 100);

    sleep(Duration::from_secs(6)).await;
    assert_eq!(sink.row_count(), 150);
    assert_eq!(sink.transactions_committed(), 2);

    let expected: Vec<String> = (0..150).map(|n| format!("message {}", n)).collect();
    assert_eq!(messages(&sink), expected);

    let stats = writer.shutdown().await;
    assert_eq!(
        stats,
        WriterStats {
            flushes: 2,
            rows_written: 150,
            failed_flushes: 0,
            rows_dropped: 0,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn size_flush_restarts_the_interval_timer() {
    let sink = MemorySink::new();
    let writer = BatchWriter::spawn(config(3, 5), Arc::new(sink.clone()));

    sleep(Duration::from_secs(4)).await;
    submit_range(&writer, 0..3).await;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.transactions_committed(), 1);

    submit_range(&writer, 3..4).await;
    sleep(Duration::from_millis(1490)).await;
    // t = 5.5s: the original deadline has passed but the timer was restarted at t = 4s.
    assert_eq!(sink.transactions_committed(), 1);

    sleep(Duration::from_secs(4)).await;
    assert_eq!(sink.transactions_committed(), 2);
    assert_eq!(
        messages(&sink),
        ["message 0", "message 1", "message 2", "message 3"]
    );

    writer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_batch_is_dropped_and_writer_keeps_going() {
    let sink = MemorySink::new();
    sink.fail_on_message("message 2");
    let writer = BatchWriter::spawn(config(5, 5), Arc::new(sink.clone()));

    submit_range(&writer, 0..5).await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(sink.row_count(), 0);
    assert_eq!(sink.transactions_rolled_back(), 1);
    let stats = writer.stats();
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.rows_dropped, 5);

    sink.clear_failures();
    submit_range(&writer, 5..7).await;
    sleep(Duration::from_secs(6)).await;

    assert_eq!(messages(&sink), ["message 5", "message 6"]);
    writer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn begin_failure_drops_batch() {
    let sink = MemorySink::new();
    sink.fail_next_begins(1);
    let writer = BatchWriter::spawn(config(3, 5), Arc::new(sink.clone()));

    submit_range(&writer, 0..3).await;
    sleep(Duration::from_millis(10)).await;
    submit_range(&writer, 3..6).await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(messages(&sink), ["message 3", "message 4", "message 5"]);
    let stats = writer.shutdown().await;
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.flushes, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_queued_records() {
    let sink = MemorySink::new();
    let writer = BatchWriter::spawn(config(100, 60), Arc::new(sink.clone()));

    submit_range(&writer, 0..7).await;
    let stats = writer.shutdown().await;

    assert_eq!(sink.row_count(), 7);
    assert_eq!(sink.transactions_committed(), 1);
    assert_eq!(stats.rows_written, 7);
}

#[tokio::test(start_paused = true)]
async fn shutdown_with_blocked_producer_loses_nothing() {
    let sink = MemorySink::new();
    let writer = BatchWriter::spawn(
        BatchConfig {
            channel_capacity: 2,
            ..config(100, 60)
        },
        Arc::new(sink.clone()),
    );

    let submitter = writer.submitter();
    let producer = tokio::spawn(async move {
        let mut returned = Vec::new();
        for n in 0..50 {
            if let Err(SubmitError::Closed(rejected)) = submitter.submit(record(n)).await {
                returned.push(rejected.message().to_string());
            }
        }
        returned
    });
    tokio::task::yield_now().await;

    let stats = writer.shutdown().await;
    let returned = producer.await.unwrap();

    let written = messages(&sink);
    assert_eq!(written.len() + returned.len(), 50);
    assert_eq!(stats.rows_written as usize, written.len());
    let expected: Vec<String> = (0..written.len())
        .map(|n| format!("message {}", n))
        .collect();
    assert_eq!(written, expected);
}

#[tokio::test(start_paused = true)]
async fn submit_after_shutdown_returns_record() {
    let sink = MemorySink::new();
    let writer = BatchWriter::spawn(config(10, 5), Arc::new(sink.clone()));
    let submitter = writer.submitter();

    writer.shutdown().await;

    let err = submitter.submit(record(1)).await.unwrap_err();
    let SubmitError::Closed(returned) = err;
    assert_eq!(returned.message(), "message 1");
    assert_eq!(sink.row_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn small_and_unbounded_channels_deliver_everything_in_order() {
    for capacity in [1, 0] {
        let sink = MemorySink::new();
        let writer = BatchWriter::spawn(
            BatchConfig {
                channel_capacity: capacity,
                ..config(4, 5)
            },
            Arc::new(sink.clone()),
        );

        let submitter = writer.submitter();
        let producer = tokio::spawn(async move {
            for n in 0..10 {
                submitter.submit(record(n)).await.unwrap();
            }
        });
        producer.await.unwrap();

        writer.shutdown().await;
        let expected: Vec<String> = (0..10).map(|n| format!("message {}", n)).collect();
        assert_eq!(messages(&sink), expected);
    }
}
