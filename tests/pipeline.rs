use std::sync::Arc;
use std::time::Duration;

use logpipe_batch::BatchConfig;
use logpipe_consumer::{ConsumerError, ConsumerOptions, MemoryBroker};
use logpipe_server::run_pipeline;
use logpipe_writer::MemorySink;
use tokio::sync::oneshot;
use tokio::time::sleep;

fn batch(max_rows: usize) -> BatchConfig {
    BatchConfig {
        max_rows,
        flush_interval: Duration::from_secs(5),
        channel_capacity: 1000,
    }
}

fn payload(n: usize) -> String {
    if n % 2 == 0 {
        serde_json::json!({
            "level": "INFO",
            "message": format!("event {}", n),
            "service": "orders",
            "requestId": format!("req-{}", n),
        })
        .to_string()
    } else {
        format!("[DEBUG] event {}", n)
    }
}

#[tokio::test(start_paused = true)]
async fn messages_flow_from_queue_to_store_in_order() {
    let broker = MemoryBroker::new();
    for n in 0..150 {
        broker.publish(payload(n));
    }
    let sink = MemorySink::new();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let pipeline = tokio::spawn(run_pipeline(
        broker.clone(),
        Arc::new(sink.clone()),
        batch(100),
        ConsumerOptions::default(),
        async move {
            let _ = stop_rx.await;
        },
    ));

    sleep(Duration::from_millis(500)).await;
    assert_eq!(broker.acked_count(), 150);
    assert_eq!(sink.row_count(), 100);

    stop_tx.send(()).unwrap();
    let stats = pipeline.await.unwrap().unwrap();
    assert_eq!(stats.flushes, 2);
    assert_eq!(stats.rows_written, 150);

    let rows = sink.rows();
    let expected: Vec<String> = (0..150).map(|n| format!("event {}", n)).collect();
    let actual: Vec<&str> = rows.iter().map(|r| r.message()).collect();
    assert_eq!(actual, expected);

    assert_eq!(rows[0].service(), "orders");
    assert_eq!(rows[0].request_id(), "req-0");
    assert_eq!(rows[1].level(), "DEBUG");
    assert_eq!(rows[1].service(), "unknown");
}

#[tokio::test(start_paused = true)]
async fn failed_batch_is_dropped_but_later_messages_land() {
    let broker = MemoryBroker::new();
    let sink = MemorySink::new();
    sink.fail_on_message("poison");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let pipeline = tokio::spawn(run_pipeline(
        broker.clone(),
        Arc::new(sink.clone()),
        batch(3),
        ConsumerOptions::default(),
        async move {
            let _ = stop_rx.await;
        },
    ));

    broker.publish("first");
    broker.publish("poison");
    broker.publish("third");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.row_count(), 0);

    broker.publish("fourth");
    sleep(Duration::from_secs(6)).await;

    stop_tx.send(()).unwrap();
    let stats = pipeline.await.unwrap().unwrap();

    let messages: Vec<String> = sink
        .rows()
        .iter()
        .map(|r| r.message().to_string())
        .collect();
    assert_eq!(messages, ["fourth"]);
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.rows_dropped, 3);
    assert_eq!(broker.acked_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn unreachable_broker_is_fatal_at_startup() {
    let broker = MemoryBroker::new();
    broker.fail_next_connects(5);
    let sink = MemorySink::new();

    let err = run_pipeline(
        broker.clone(),
        Arc::new(sink.clone()),
        batch(100),
        ConsumerOptions::default(),
        std::future::pending(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        ConsumerError::StartupFailed { attempts: 5, .. }
    ));
    assert_eq!(broker.connect_attempts(), 5);
    assert_eq!(sink.transactions_begun(), 0);
}
